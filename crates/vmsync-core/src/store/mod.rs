// # Entity Store Implementations
//
// This module provides implementations of the EntityStore trait for
// different persistence strategies.

pub mod file;
pub mod memory;
mod tables;

pub use file::{FileEntityStore, FileEntityStoreFactory};
pub use memory::{MemoryEntityStore, MemoryEntityStoreFactory};
