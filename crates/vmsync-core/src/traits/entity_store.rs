// # Entity Store Trait
//
// Defines the interface for persistent inventory storage.
//
// ## Purpose
//
// The entity store holds everything a reconciliation pass reads and writes:
// - VM rows with their fact, NICs (with IPs) and disks
// - Host and network rows
// - Reconciliation runs and the change events they produced
// - Endpoint configuration
//
// It is the only shared mutable resource of the system. The engine reads a
// VM snapshot, computes the new state in memory and hands the whole result
// back as a single [`VmWrite`], which the store commits atomically.
//
// ## Implementations
//
// - In-memory: `MemoryEntityStore`
// - File-based: `FileEntityStore` (JSON snapshot)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;

use crate::config::EndpointConfig;
use crate::model::{
    ChangeEvent, DetectedChange, DiskRecord, Host, HostId, HostRecord, Network, NetworkId,
    NetworkRecord, NicRecord, Platform, RecordState, ResourceTag, RunId, SyncRun, Vm, VmFact,
    VmId, VmSnapshot,
};

/// Complete new state of one VM, committed as one unit
#[derive(Debug, Clone, PartialEq)]
pub struct VmWrite {
    /// `None` creates the VM and allocates an id
    pub id: Option<VmId>,
    pub platform: Platform,
    pub vm_uuid: String,
    pub name: String,
    pub bios_uuid: Option<String>,
    pub state: RecordState,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub last_sync_run_id: RunId,
    /// Replaces the stored fact
    pub fact: VmFact,
    /// Replaces all stored NICs (and their IPs)
    pub nics: Vec<NicRecord>,
    /// Replaces all stored disks
    pub disks: Vec<DiskRecord>,
}

impl VmWrite {
    /// The VM row this write produces, once an id is known
    pub fn to_vm(&self, id: VmId) -> Vm {
        Vm {
            id,
            platform: self.platform,
            vm_uuid: self.vm_uuid.clone(),
            name: self.name.clone(),
            bios_uuid: self.bios_uuid.clone(),
            state: self.state.clone(),
            first_seen_at: self.first_seen_at,
            last_seen_at: self.last_seen_at,
            last_sync_run_id: Some(self.last_sync_run_id),
        }
    }
}

/// New state of one host
#[derive(Debug, Clone, PartialEq)]
pub struct HostWrite {
    /// `None` creates the host and allocates an id
    pub id: Option<HostId>,
    pub platform: Platform,
    pub record: HostRecord,
    pub created_at: DateTime<Utc>,
    pub last_sync_at: DateTime<Utc>,
}

/// New state of one network
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkWrite {
    /// `None` creates the network and allocates an id
    pub id: Option<NetworkId>,
    pub platform: Platform,
    pub record: NetworkRecord,
    pub created_at: DateTime<Utc>,
    pub last_sync_at: DateTime<Utc>,
}

/// Trait for entity store implementations
///
/// Implementations must be thread-safe and usable across async tasks.
///
/// # Atomicity
///
/// Every method is atomic on its own. `commit_vm` in particular must either
/// apply the VM row, fact, NICs, IPs and disks together or leave the stored
/// VM untouched.
///
/// # Identity
///
/// VMs are unique by (platform, vm_uuid), hosts by (platform, host_id) and
/// networks by (platform, network_id). Creating a second row for an
/// existing identity is a store error.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Create a run in the RUNNING state and persist it immediately
    async fn create_run(
        &self,
        resource: ResourceTag,
        started_at: DateTime<Utc>,
    ) -> Result<SyncRun, crate::Error>;

    /// Replace a stored run (finalization)
    async fn update_run(&self, run: &SyncRun) -> Result<(), crate::Error>;

    /// Get a run by id
    async fn get_run(&self, id: RunId) -> Result<Option<SyncRun>, crate::Error>;

    /// List all runs, oldest first
    async fn list_runs(&self) -> Result<Vec<SyncRun>, crate::Error>;

    /// Create or replace an endpoint configuration (keyed by name)
    async fn upsert_endpoint(&self, endpoint: &EndpointConfig) -> Result<(), crate::Error>;

    /// Make `endpoints` the active set
    ///
    /// Each given endpoint is upserted. Stored endpoints missing from the
    /// set are kept for history but marked inactive.
    async fn replace_endpoints(&self, endpoints: &[EndpointConfig]) -> Result<(), crate::Error>;

    /// List all endpoint configurations in configuration order
    async fn list_endpoints(&self) -> Result<Vec<EndpointConfig>, crate::Error>;

    /// Active endpoints serving a (platform, kind), in configuration order
    async fn active_endpoints(
        &self,
        resource: ResourceTag,
    ) -> Result<Vec<EndpointConfig>, crate::Error> {
        Ok(self
            .list_endpoints()
            .await?
            .into_iter()
            .filter(|e| e.is_active && e.resource_type == resource)
            .collect())
    }

    /// Load everything stored for a VM identity
    ///
    /// Soft-deleted VMs are returned too.
    async fn load_vm(
        &self,
        platform: Platform,
        vm_uuid: &str,
    ) -> Result<Option<VmSnapshot>, crate::Error>;

    /// Atomically write a VM with its fact, NICs and disks
    ///
    /// # Returns
    ///
    /// The stored VM row, with its allocated id for new VMs
    async fn commit_vm(&self, write: VmWrite) -> Result<Vm, crate::Error>;

    /// Soft-delete the active VMs of a platform that a run did not observe
    ///
    /// A VM is retired when its uuid is not in `seen` and its last-observing
    /// run is not `run_id`. Retired VMs are stamped with `run_id`.
    ///
    /// # Returns
    ///
    /// The retired VM rows
    async fn retire_missing(
        &self,
        platform: Platform,
        run_id: RunId,
        seen: &HashSet<String>,
        at: DateTime<Utc>,
    ) -> Result<Vec<Vm>, crate::Error>;

    /// List the VMs of a platform (active and deleted)
    async fn list_vms(&self, platform: Platform) -> Result<Vec<Vm>, crate::Error>;

    /// Append change events for a run in one batch
    async fn append_changes(
        &self,
        run_id: RunId,
        changes: Vec<DetectedChange>,
    ) -> Result<Vec<ChangeEvent>, crate::Error>;

    /// Change events produced by a run
    async fn changes_for_run(&self, run_id: RunId) -> Result<Vec<ChangeEvent>, crate::Error>;

    /// Change events recorded against a VM
    async fn changes_for_vm(&self, vm_id: VmId) -> Result<Vec<ChangeEvent>, crate::Error>;

    /// Find a host by identity
    async fn find_host(
        &self,
        platform: Platform,
        host_id: &str,
    ) -> Result<Option<Host>, crate::Error>;

    /// Create or replace a host
    async fn save_host(&self, write: HostWrite) -> Result<Host, crate::Error>;

    /// List the hosts of a platform
    async fn list_hosts(&self, platform: Platform) -> Result<Vec<Host>, crate::Error>;

    /// Find a network by identity
    async fn find_network(
        &self,
        platform: Platform,
        network_id: &str,
    ) -> Result<Option<Network>, crate::Error>;

    /// Create or replace a network
    async fn save_network(&self, write: NetworkWrite) -> Result<Network, crate::Error>;

    /// List the networks of a platform
    async fn list_networks(&self, platform: Platform) -> Result<Vec<Network>, crate::Error>;

    /// Persist any pending changes
    async fn flush(&self) -> Result<(), crate::Error>;
}

/// Helper trait for constructing entity stores from configuration
///
/// Creation is async because persistent stores load their snapshot up front.
#[async_trait]
pub trait EntityStoreFactory: Send + Sync {
    /// Create an EntityStore instance from configuration
    ///
    /// # Parameters
    ///
    /// - `config`: The serialized [`StoreConfig`](crate::config::StoreConfig)
    ///
    /// # Returns
    ///
    /// A boxed EntityStore trait object
    async fn create(
        &self,
        config: &serde_json::Value,
    ) -> Result<Box<dyn EntityStore>, crate::Error>;
}
