//! Core traits for the inventory sync system
//!
//! This module defines the abstract interfaces that the engine is handed.
//!
//! - [`EndpointCaller`]: Perform a configured platform API call
//! - [`EntityStore`]: Persistent inventory, run and change-event storage

pub mod endpoint_caller;
pub mod entity_store;

pub use endpoint_caller::{EndpointCaller, EndpointCallerFactory};
pub use entity_store::{EntityStore, EntityStoreFactory, HostWrite, NetworkWrite, VmWrite};
