//! Child-record reconcilers
//!
//! A VM's NICs (with their IPs) and disks are replaced wholesale on every
//! pass. These functions compute the replacement sets; the engine hands them
//! to the store inside the VM's atomic commit.

pub mod disk;
pub mod nic;

pub use disk::{disk_identity, reconcile_disks};
pub use nic::{NicReconciliation, reconcile_nics};
