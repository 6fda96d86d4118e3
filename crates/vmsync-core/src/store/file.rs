// # File Entity Store
//
// File-based implementation of EntityStore with crash recovery.
//
// ## Purpose
//
// Keeps the reconciled inventory, runs and change history across daemon
// restarts without an external database.
//
// ## Durability
//
// - Run rows, retirements, change batches and endpoint configs are written
//   through immediately
// - VM, host and network writes are applied in memory and reach disk with
//   the next write-through or `flush()`; a pass always ends with a run
//   update, so a finished pass is on disk
//
// ## Crash Recovery
//
// - Atomic writes: snapshot written to a temporary file, then renamed
// - Automatic backup: `.backup` keeps the previous snapshot
// - Recovery: falls back to the backup if the snapshot does not parse
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "tables": {
//     "sequences": { "vm": 2, "run": 5, "host": 0, "network": 0, "change": 3 },
//     "vms": { "1": { "vm": { ... }, "fact": { ... }, "nics": [], "disks": [] } },
//     "runs": { ... },
//     "changes": [ ... ],
//     "endpoints": [ ... ]
//   }
// }
// ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use super::tables::Tables;
use crate::Error;
use crate::config::{EndpointConfig, StoreConfig};
use crate::model::{
    ChangeEvent, DetectedChange, Host, Network, Platform, ResourceTag, RunId, SyncRun, Vm, VmId,
    VmSnapshot,
};
use crate::traits::{EntityStore, EntityStoreFactory, HostWrite, NetworkWrite, VmWrite};

/// Snapshot file format version
const SNAPSHOT_VERSION: &str = "1.0";

/// File-based entity store with crash recovery
///
/// # Example
///
/// ```rust,no_run
/// use vmsync_core::store::FileEntityStore;
/// use vmsync_core::traits::EntityStore;
/// use vmsync_core::model::Platform;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileEntityStore::open("/var/lib/vmsync/inventory.json").await?;
///
///     let vms = store.list_vms(Platform::Vmware).await?;
///     println!("{} VMware VMs on record", vms.len());
///
///     store.flush().await?;
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct FileEntityStore {
    path: PathBuf,
    state: Arc<RwLock<FileState>>,
}

#[derive(Debug)]
struct FileState {
    tables: Tables,
    dirty: bool,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct SnapshotFile {
    version: String,
    tables: Tables,
}

#[derive(serde::Serialize)]
struct SnapshotFileRef<'a> {
    version: &'a str,
    tables: &'a Tables,
}

impl FileEntityStore {
    /// Open or create a file store
    ///
    /// This will:
    /// 1. Create parent directories if needed
    /// 2. Load the existing snapshot
    /// 3. If it does not parse, load the backup
    /// 4. If both fail, start empty
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    Error::config(format!(
                        "Failed to create store directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let mut tables = Self::load_with_recovery(&path).await?;
        tables.reindex();

        Ok(Self {
            path,
            state: Arc::new(RwLock::new(FileState {
                tables,
                dirty: false,
            })),
        })
    }

    async fn load_with_recovery(path: &Path) -> Result<Tables, Error> {
        match Self::load(path).await {
            Ok(tables) => {
                tracing::debug!("Loaded inventory snapshot: {} VMs", tables.vm_count());
                Ok(tables)
            }
            Err(Error::Json(e)) => {
                tracing::warn!(
                    "Inventory snapshot {} is corrupted: {}. Attempting recovery from backup.",
                    path.display(),
                    e
                );

                let backup_path = Self::backup_path(path);
                if !backup_path.exists() {
                    tracing::warn!("No backup file found. Starting with empty inventory.");
                    return Ok(Tables::default());
                }

                match Self::load(&backup_path).await {
                    Ok(tables) => {
                        tracing::info!("Recovered inventory from backup: {} VMs", tables.vm_count());
                        if let Err(restore_err) = fs::copy(&backup_path, path).await {
                            tracing::error!("Failed to restore snapshot from backup: {}", restore_err);
                        }
                        Ok(tables)
                    }
                    Err(backup_err) => {
                        tracing::error!(
                            "Backup also unreadable: {}. Starting with empty inventory.",
                            backup_err
                        );
                        Ok(Tables::default())
                    }
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn load(path: &Path) -> Result<Tables, Error> {
        if !path.exists() {
            tracing::debug!("Inventory snapshot does not exist: {}", path.display());
            return Ok(Tables::default());
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            Error::store(format!("Failed to read snapshot {}: {}", path.display(), e))
        })?;

        let snapshot: SnapshotFile = serde_json::from_str(&content)?;

        if snapshot.version != SNAPSHOT_VERSION {
            tracing::warn!(
                "Snapshot version mismatch: expected {}, got {}. Attempting to load anyway.",
                SNAPSHOT_VERSION,
                snapshot.version
            );
        }

        Ok(snapshot.tables)
    }

    /// Write the snapshot atomically; the caller holds the state lock
    async fn write_snapshot(&self, tables: &Tables) -> Result<(), Error> {
        let json = serde_json::to_string_pretty(&SnapshotFileRef {
            version: SNAPSHOT_VERSION,
            tables,
        })
        .map_err(|e| Error::store(format!("Failed to serialize inventory: {}", e)))?;

        let temp_path = self.temp_path();
        {
            let mut file = fs::File::create(&temp_path).await.map_err(|e| {
                Error::store(format!("Failed to create temp file {}: {}", temp_path.display(), e))
            })?;
            file.write_all(json.as_bytes()).await.map_err(|e| {
                Error::store(format!("Failed to write temp file {}: {}", temp_path.display(), e))
            })?;
            file.flush().await.map_err(|e| {
                Error::store(format!("Failed to flush temp file {}: {}", temp_path.display(), e))
            })?;
        }

        if self.path.exists() {
            if let Err(e) = fs::copy(&self.path, Self::backup_path(&self.path)).await {
                tracing::warn!("Failed to create backup: {}", e);
            }
        }

        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::store(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        tracing::trace!("Inventory written to {}", self.path.display());
        Ok(())
    }

    /// Apply a mutation and write the snapshot through
    ///
    /// The mutation runs on a copy of the tables; the copy replaces the
    /// in-memory state only once it is on disk.
    async fn write_through<T>(&self, apply: impl FnOnce(&mut Tables) -> Result<T, Error>) -> Result<T, Error> {
        let mut state = self.state.write().await;
        let mut next = state.tables.clone();
        let value = apply(&mut next)?;
        self.write_snapshot(&next).await?;
        state.tables = next;
        state.dirty = false;
        Ok(value)
    }

    /// Apply a mutation in memory only
    async fn buffered<T>(&self, apply: impl FnOnce(&mut Tables) -> Result<T, Error>) -> Result<T, Error> {
        let mut state = self.state.write().await;
        let value = apply(&mut state.tables)?;
        state.dirty = true;
        Ok(value)
    }

    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        temp.set_extension("tmp");
        temp
    }

    fn backup_path(path: &Path) -> PathBuf {
        let mut backup = path.to_path_buf();
        backup.set_extension("backup");
        backup
    }
}

#[async_trait]
impl EntityStore for FileEntityStore {
    async fn create_run(&self, resource: ResourceTag, started_at: DateTime<Utc>) -> Result<SyncRun, Error> {
        self.write_through(|t| Ok(t.create_run(resource, started_at))).await
    }

    async fn update_run(&self, run: &SyncRun) -> Result<(), Error> {
        self.write_through(|t| t.update_run(run)).await
    }

    async fn get_run(&self, id: RunId) -> Result<Option<SyncRun>, Error> {
        Ok(self.state.read().await.tables.get_run(id))
    }

    async fn list_runs(&self) -> Result<Vec<SyncRun>, Error> {
        Ok(self.state.read().await.tables.list_runs())
    }

    async fn upsert_endpoint(&self, endpoint: &EndpointConfig) -> Result<(), Error> {
        self.write_through(|t| {
            t.upsert_endpoint(endpoint);
            Ok(())
        })
        .await
    }

    async fn replace_endpoints(&self, endpoints: &[EndpointConfig]) -> Result<(), Error> {
        self.write_through(|t| {
            t.replace_endpoints(endpoints);
            Ok(())
        })
        .await
    }

    async fn list_endpoints(&self) -> Result<Vec<EndpointConfig>, Error> {
        Ok(self.state.read().await.tables.list_endpoints())
    }

    async fn load_vm(&self, platform: Platform, vm_uuid: &str) -> Result<Option<VmSnapshot>, Error> {
        Ok(self.state.read().await.tables.load_vm(platform, vm_uuid))
    }

    async fn commit_vm(&self, write: VmWrite) -> Result<Vm, Error> {
        self.buffered(|t| t.commit_vm(write)).await
    }

    async fn retire_missing(
        &self,
        platform: Platform,
        run_id: RunId,
        seen: &HashSet<String>,
        at: DateTime<Utc>,
    ) -> Result<Vec<Vm>, Error> {
        self.write_through(|t| Ok(t.retire_missing(platform, run_id, seen, at))).await
    }

    async fn list_vms(&self, platform: Platform) -> Result<Vec<Vm>, Error> {
        Ok(self.state.read().await.tables.list_vms(platform))
    }

    async fn append_changes(
        &self,
        run_id: RunId,
        changes: Vec<DetectedChange>,
    ) -> Result<Vec<ChangeEvent>, Error> {
        self.write_through(|t| Ok(t.append_changes(run_id, changes))).await
    }

    async fn changes_for_run(&self, run_id: RunId) -> Result<Vec<ChangeEvent>, Error> {
        Ok(self.state.read().await.tables.changes_for_run(run_id))
    }

    async fn changes_for_vm(&self, vm_id: VmId) -> Result<Vec<ChangeEvent>, Error> {
        Ok(self.state.read().await.tables.changes_for_vm(vm_id))
    }

    async fn find_host(&self, platform: Platform, host_id: &str) -> Result<Option<Host>, Error> {
        Ok(self.state.read().await.tables.find_host(platform, host_id))
    }

    async fn save_host(&self, write: HostWrite) -> Result<Host, Error> {
        self.buffered(|t| t.save_host(write)).await
    }

    async fn list_hosts(&self, platform: Platform) -> Result<Vec<Host>, Error> {
        Ok(self.state.read().await.tables.list_hosts(platform))
    }

    async fn find_network(&self, platform: Platform, network_id: &str) -> Result<Option<Network>, Error> {
        Ok(self.state.read().await.tables.find_network(platform, network_id))
    }

    async fn save_network(&self, write: NetworkWrite) -> Result<Network, Error> {
        self.buffered(|t| t.save_network(write)).await
    }

    async fn list_networks(&self, platform: Platform) -> Result<Vec<Network>, Error> {
        Ok(self.state.read().await.tables.list_networks(platform))
    }

    async fn flush(&self) -> Result<(), Error> {
        let mut state = self.state.write().await;
        if state.dirty {
            self.write_snapshot(&state.tables).await?;
            state.dirty = false;
        }
        Ok(())
    }
}

/// Factory for the `file` store type
#[derive(Debug, Default)]
pub struct FileEntityStoreFactory;

#[async_trait]
impl EntityStoreFactory for FileEntityStoreFactory {
    async fn create(&self, config: &serde_json::Value) -> Result<Box<dyn EntityStore>, Error> {
        match serde_json::from_value::<StoreConfig>(config.clone()) {
            Ok(StoreConfig::File { path }) => Ok(Box::new(FileEntityStore::open(path).await?)),
            Ok(other) => Err(Error::config(format!(
                "File store factory cannot build a '{}' store",
                other.type_name()
            ))),
            Err(e) => Err(Error::config(format!("Invalid file store config: {}", e))),
        }
    }
}
