// # Memory Entity Store
//
// In-memory implementation of EntityStore.
//
// ## Purpose
//
// Provides a fast store that doesn't persist across restarts. Useful for
// testing and for dry runs against live endpoints.
//
// ## Crash Behavior
//
// - All inventory is lost on restart/crash
// - The first pass after a restart sees every VM as new (no change events)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::tables::Tables;
use crate::Error;
use crate::config::EndpointConfig;
use crate::model::{
    ChangeEvent, DetectedChange, Host, Network, Platform, ResourceTag, RunId, SyncRun, Vm, VmId,
    VmSnapshot,
};
use crate::traits::{EntityStore, EntityStoreFactory, HostWrite, NetworkWrite, VmWrite};

/// In-memory entity store implementation
///
/// All tables live behind a single RwLock, so every operation, including a
/// whole VM commit, is atomic with respect to every other.
///
/// # Example
///
/// ```rust,no_run
/// use vmsync_core::store::MemoryEntityStore;
/// use vmsync_core::traits::EntityStore;
/// use vmsync_core::model::{Platform, ResourceKind, ResourceTag};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryEntityStore::new();
///
///     let run = store
///         .create_run(ResourceTag::new(Platform::Vmware, ResourceKind::Vm), chrono::Utc::now())
///         .await?;
///     assert!(store.get_run(run.id).await?.is_some());
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryEntityStore {
    inner: Arc<RwLock<Tables>>,
}

impl MemoryEntityStore {
    /// Create a new empty memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of VMs in the store (active and deleted)
    pub async fn vm_count(&self) -> usize {
        self.inner.read().await.vm_count()
    }

    /// Check if the store holds no VM
    pub async fn is_empty(&self) -> bool {
        self.vm_count().await == 0
    }
}

#[async_trait]
impl EntityStore for MemoryEntityStore {
    async fn create_run(&self, resource: ResourceTag, started_at: DateTime<Utc>) -> Result<SyncRun, Error> {
        Ok(self.inner.write().await.create_run(resource, started_at))
    }

    async fn update_run(&self, run: &SyncRun) -> Result<(), Error> {
        self.inner.write().await.update_run(run)
    }

    async fn get_run(&self, id: RunId) -> Result<Option<SyncRun>, Error> {
        Ok(self.inner.read().await.get_run(id))
    }

    async fn list_runs(&self) -> Result<Vec<SyncRun>, Error> {
        Ok(self.inner.read().await.list_runs())
    }

    async fn upsert_endpoint(&self, endpoint: &EndpointConfig) -> Result<(), Error> {
        self.inner.write().await.upsert_endpoint(endpoint);
        Ok(())
    }

    async fn replace_endpoints(&self, endpoints: &[EndpointConfig]) -> Result<(), Error> {
        self.inner.write().await.replace_endpoints(endpoints);
        Ok(())
    }

    async fn list_endpoints(&self) -> Result<Vec<EndpointConfig>, Error> {
        Ok(self.inner.read().await.list_endpoints())
    }

    async fn load_vm(&self, platform: Platform, vm_uuid: &str) -> Result<Option<VmSnapshot>, Error> {
        Ok(self.inner.read().await.load_vm(platform, vm_uuid))
    }

    async fn commit_vm(&self, write: VmWrite) -> Result<Vm, Error> {
        self.inner.write().await.commit_vm(write)
    }

    async fn retire_missing(
        &self,
        platform: Platform,
        run_id: RunId,
        seen: &HashSet<String>,
        at: DateTime<Utc>,
    ) -> Result<Vec<Vm>, Error> {
        Ok(self.inner.write().await.retire_missing(platform, run_id, seen, at))
    }

    async fn list_vms(&self, platform: Platform) -> Result<Vec<Vm>, Error> {
        Ok(self.inner.read().await.list_vms(platform))
    }

    async fn append_changes(
        &self,
        run_id: RunId,
        changes: Vec<DetectedChange>,
    ) -> Result<Vec<ChangeEvent>, Error> {
        Ok(self.inner.write().await.append_changes(run_id, changes))
    }

    async fn changes_for_run(&self, run_id: RunId) -> Result<Vec<ChangeEvent>, Error> {
        Ok(self.inner.read().await.changes_for_run(run_id))
    }

    async fn changes_for_vm(&self, vm_id: VmId) -> Result<Vec<ChangeEvent>, Error> {
        Ok(self.inner.read().await.changes_for_vm(vm_id))
    }

    async fn find_host(&self, platform: Platform, host_id: &str) -> Result<Option<Host>, Error> {
        Ok(self.inner.read().await.find_host(platform, host_id))
    }

    async fn save_host(&self, write: HostWrite) -> Result<Host, Error> {
        self.inner.write().await.save_host(write)
    }

    async fn list_hosts(&self, platform: Platform) -> Result<Vec<Host>, Error> {
        Ok(self.inner.read().await.list_hosts(platform))
    }

    async fn find_network(&self, platform: Platform, network_id: &str) -> Result<Option<Network>, Error> {
        Ok(self.inner.read().await.find_network(platform, network_id))
    }

    async fn save_network(&self, write: NetworkWrite) -> Result<Network, Error> {
        self.inner.write().await.save_network(write)
    }

    async fn list_networks(&self, platform: Platform) -> Result<Vec<Network>, Error> {
        Ok(self.inner.read().await.list_networks(platform))
    }

    async fn flush(&self) -> Result<(), Error> {
        // Nothing to persist
        Ok(())
    }
}

/// Factory for the `memory` store type
#[derive(Debug, Default)]
pub struct MemoryEntityStoreFactory;

#[async_trait]
impl EntityStoreFactory for MemoryEntityStoreFactory {
    async fn create(&self, _config: &serde_json::Value) -> Result<Box<dyn EntityStore>, Error> {
        Ok(Box::new(MemoryEntityStore::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        NetworkRecord, RecordState, ResourceKind, RunStatus, VmFact, VmFactValues,
    };

    fn vm_write(uuid: &str, id: Option<VmId>, run_id: RunId) -> VmWrite {
        let now = Utc::now();
        VmWrite {
            id,
            platform: Platform::Vmware,
            vm_uuid: uuid.to_string(),
            name: format!("vm-{}", uuid),
            bios_uuid: None,
            state: RecordState::Active,
            first_seen_at: now,
            last_seen_at: now,
            last_sync_run_id: run_id,
            fact: VmFact {
                values: VmFactValues::default(),
                raw: serde_json::json!({}),
                fact_updated_at: now,
            },
            nics: Vec::new(),
            disks: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_memory_store_basic() {
        let store = MemoryEntityStore::new();
        assert!(store.is_empty().await);

        let vm = store.commit_vm(vm_write("u-1", None, 1)).await.unwrap();
        assert_eq!(vm.id, 1);

        let snapshot = store.load_vm(Platform::Vmware, "u-1").await.unwrap().unwrap();
        assert_eq!(snapshot.vm.name, "vm-u-1");
        assert!(snapshot.fact.is_some());

        // Same uuid on the other platform is a different VM
        assert!(store.load_vm(Platform::Nutanix, "u-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_identity_is_rejected() {
        let store = MemoryEntityStore::new();
        store.commit_vm(vm_write("u-1", None, 1)).await.unwrap();

        let err = store.commit_vm(vm_write("u-1", None, 1)).await.unwrap_err();
        assert!(matches!(err, Error::Store(_)));
        assert_eq!(store.vm_count().await, 1);
    }

    #[tokio::test]
    async fn test_retire_missing_respects_seen_and_run() {
        let store = MemoryEntityStore::new();
        store.commit_vm(vm_write("seen", None, 1)).await.unwrap();
        store.commit_vm(vm_write("gone", None, 1)).await.unwrap();
        store.commit_vm(vm_write("stamped", None, 2)).await.unwrap();

        let seen: HashSet<String> = ["seen".to_string()].into();
        let retired = store
            .retire_missing(Platform::Vmware, 2, &seen, Utc::now())
            .await
            .unwrap();

        assert_eq!(retired.len(), 1);
        assert_eq!(retired[0].vm_uuid, "gone");
        assert_eq!(retired[0].last_sync_run_id, Some(2));
        match &retired[0].state {
            RecordState::Deleted { actor, reason, .. } => {
                assert_eq!(actor, "sync-job");
                assert_eq!(reason, "not present in latest sync");
            }
            RecordState::Active => panic!("VM should be retired"),
        }

        // Already deleted VMs are not retired twice
        let again = store
            .retire_missing(Platform::Vmware, 3, &seen, Utc::now())
            .await
            .unwrap();
        assert!(again.iter().all(|vm| vm.vm_uuid != "gone"));
    }

    #[tokio::test]
    async fn test_run_lifecycle() {
        let store = MemoryEntityStore::new();
        let resource = ResourceTag::new(Platform::Nutanix, ResourceKind::Host);

        let mut run = store.create_run(resource, Utc::now()).await.unwrap();
        assert_eq!(run.status, RunStatus::Running);

        run.status = RunStatus::Success;
        run.finished_at = Some(Utc::now());
        store.update_run(&run).await.unwrap();

        let stored = store.get_run(run.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Success);
        assert_eq!(store.list_runs().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_network_identity_is_per_platform() {
        let store = MemoryEntityStore::new();
        let now = Utc::now();
        let record = NetworkRecord {
            network_id: "net-1".into(),
            name: "prod".into(),
            ..NetworkRecord::default()
        };

        for platform in Platform::ALL {
            store
                .save_network(NetworkWrite {
                    id: None,
                    platform,
                    record: record.clone(),
                    created_at: now,
                    last_sync_at: now,
                })
                .await
                .unwrap();
        }

        assert_eq!(store.list_networks(Platform::Vmware).await.unwrap().len(), 1);
        assert_eq!(store.list_networks(Platform::Nutanix).await.unwrap().len(), 1);
        assert!(store.find_network(Platform::Nutanix, "net-1").await.unwrap().is_some());
    }
}
