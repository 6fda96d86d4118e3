// # vmsync-core
//
// Core library for the multi-platform VM inventory sync system.
//
// ## Architecture Overview
//
// This library reconciles what the virtualization platforms report with a
// persistent inventory:
// - **EndpointCaller**: Trait for calling a configured platform API endpoint
// - **SourceAdapter**: Per-platform normalization of raw JSON payloads
// - **EntityStore**: Trait for the inventory, run and change-event storage
// - **SyncEngine**: Runs reconciliation passes per (platform, resource kind)
// - **ChangeTracker**: Classifies field-level differences between passes
// - **Registry**: Plugin-based registry for stores and endpoint callers
//
// ## Design Principles
//
// 1. **Idempotency**: Re-applying an unchanged payload changes nothing but timestamps
// 2. **Soft Delete**: VMs are retired, never removed, and come back when seen again
// 3. **Partial Failure**: One failing endpoint never aborts a pass
// 4. **Library-First**: The daemon is a thin shell around this crate

pub mod adapter;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod reconcile;
pub mod registry;
pub mod store;
pub mod tracker;
pub mod traits;

// Re-export core types for convenience
pub use config::{EndpointConfig, EngineConfig, HttpMethod, ScheduleConfig, StoreConfig, SyncConfig};
pub use engine::{EngineEvent, SyncEngine};
pub use error::{Error, Result};
pub use model::{Platform, ResourceKind, ResourceTag, RunResult, RunStatus};
pub use registry::Registry;
pub use store::{FileEntityStore, MemoryEntityStore};
pub use tracker::ChangeTracker;
pub use traits::{EndpointCaller, EntityStore};
