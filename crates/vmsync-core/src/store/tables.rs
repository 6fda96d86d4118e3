// # Inventory Tables
//
// The in-memory table set shared by the memory and file stores. Every
// operation validates before it mutates, so a failed call leaves the tables
// untouched and a successful one is applied as a whole.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::Error;
use crate::config::EndpointConfig;
use crate::model::{
    ChangeEvent, DetectedChange, Host, HostId, Network, NetworkId, Platform, RETIRE_ACTOR,
    RETIRE_REASON, RecordState, ResourceTag, RunDetails, RunId, RunStatus, SyncRun, Vm, VmId,
    VmSnapshot,
};
use crate::traits::{HostWrite, NetworkWrite, VmWrite};

/// Last allocated id per table
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Sequences {
    vm: VmId,
    run: RunId,
    host: HostId,
    network: NetworkId,
    change: u64,
}

fn next(seq: &mut u64) -> u64 {
    *seq += 1;
    *seq
}

/// All stored entities
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct Tables {
    #[serde(default)]
    sequences: Sequences,
    #[serde(default)]
    vms: BTreeMap<VmId, VmSnapshot>,
    #[serde(default)]
    runs: BTreeMap<RunId, SyncRun>,
    #[serde(default)]
    hosts: BTreeMap<HostId, Host>,
    #[serde(default)]
    networks: BTreeMap<NetworkId, Network>,
    #[serde(default)]
    changes: Vec<ChangeEvent>,
    #[serde(default)]
    endpoints: Vec<EndpointConfig>,

    /// (platform, uuid) → id, rebuilt on load
    #[serde(skip)]
    vm_index: HashMap<(Platform, String), VmId>,
}

impl Tables {
    /// Rebuild derived indexes after deserialization
    pub(crate) fn reindex(&mut self) {
        self.vm_index = self
            .vms
            .iter()
            .map(|(id, s)| ((s.vm.platform, s.vm.vm_uuid.clone()), *id))
            .collect();
    }

    pub(crate) fn vm_count(&self) -> usize {
        self.vms.len()
    }

    pub(crate) fn create_run(&mut self, resource: ResourceTag, started_at: DateTime<Utc>) -> SyncRun {
        let run = SyncRun {
            id: next(&mut self.sequences.run),
            resource,
            started_at,
            finished_at: None,
            status: RunStatus::Running,
            records_seen: 0,
            records_retired: 0,
            changes_detected: 0,
            details: RunDetails::default(),
        };
        self.runs.insert(run.id, run.clone());
        run
    }

    pub(crate) fn update_run(&mut self, run: &SyncRun) -> Result<(), Error> {
        let stored = self
            .runs
            .get_mut(&run.id)
            .ok_or_else(|| Error::not_found(format!("run {}", run.id)))?;
        *stored = run.clone();
        Ok(())
    }

    pub(crate) fn get_run(&self, id: RunId) -> Option<SyncRun> {
        self.runs.get(&id).cloned()
    }

    pub(crate) fn list_runs(&self) -> Vec<SyncRun> {
        self.runs.values().cloned().collect()
    }

    pub(crate) fn upsert_endpoint(&mut self, endpoint: &EndpointConfig) {
        match self.endpoints.iter_mut().find(|e| e.name == endpoint.name) {
            Some(existing) => *existing = endpoint.clone(),
            None => self.endpoints.push(endpoint.clone()),
        }
    }

    /// Upsert `endpoints` and deactivate every stored endpoint not among them
    pub(crate) fn replace_endpoints(&mut self, endpoints: &[EndpointConfig]) {
        for existing in &mut self.endpoints {
            if !endpoints.iter().any(|e| e.name == existing.name) {
                existing.is_active = false;
            }
        }
        for endpoint in endpoints {
            self.upsert_endpoint(endpoint);
        }
    }

    pub(crate) fn list_endpoints(&self) -> Vec<EndpointConfig> {
        self.endpoints.clone()
    }

    pub(crate) fn load_vm(&self, platform: Platform, vm_uuid: &str) -> Option<VmSnapshot> {
        self.vm_index
            .get(&(platform, vm_uuid.to_string()))
            .and_then(|id| self.vms.get(id))
            .cloned()
    }

    pub(crate) fn commit_vm(&mut self, write: VmWrite) -> Result<Vm, Error> {
        let key = (write.platform, write.vm_uuid.clone());
        let indexed = self.vm_index.get(&key).copied();

        let id = match (write.id, indexed) {
            (Some(id), Some(existing)) if id == existing => id,
            (Some(id), _) => {
                return Err(Error::store(format!(
                    "VM {} does not hold identity {}:{}",
                    id, write.platform, write.vm_uuid
                )));
            }
            (None, Some(existing)) => {
                return Err(Error::store(format!(
                    "VM {}:{} already exists as {}",
                    write.platform, write.vm_uuid, existing
                )));
            }
            (None, None) => next(&mut self.sequences.vm),
        };

        let vm = write.to_vm(id);
        self.vms.insert(
            id,
            VmSnapshot {
                vm: vm.clone(),
                fact: Some(write.fact),
                nics: write.nics,
                disks: write.disks,
            },
        );
        self.vm_index.insert(key, id);
        Ok(vm)
    }

    pub(crate) fn retire_missing(
        &mut self,
        platform: Platform,
        run_id: RunId,
        seen: &HashSet<String>,
        at: DateTime<Utc>,
    ) -> Vec<Vm> {
        self.vms
            .values_mut()
            .map(|snapshot| &mut snapshot.vm)
            .filter(|vm| {
                vm.platform == platform
                    && !vm.is_deleted()
                    && vm.last_sync_run_id != Some(run_id)
                    && !seen.contains(&vm.vm_uuid)
            })
            .map(|vm| {
                vm.state = RecordState::Deleted {
                    at,
                    reason: RETIRE_REASON.to_string(),
                    actor: RETIRE_ACTOR.to_string(),
                };
                vm.last_sync_run_id = Some(run_id);
                vm.clone()
            })
            .collect()
    }

    pub(crate) fn list_vms(&self, platform: Platform) -> Vec<Vm> {
        self.vms
            .values()
            .filter(|s| s.vm.platform == platform)
            .map(|s| s.vm.clone())
            .collect()
    }

    pub(crate) fn append_changes(&mut self, run_id: RunId, changes: Vec<DetectedChange>) -> Vec<ChangeEvent> {
        let appended: Vec<ChangeEvent> = changes
            .into_iter()
            .map(|change| ChangeEvent {
                id: next(&mut self.sequences.change),
                sync_run_id: run_id,
                change,
            })
            .collect();
        self.changes.extend(appended.iter().cloned());
        appended
    }

    pub(crate) fn changes_for_run(&self, run_id: RunId) -> Vec<ChangeEvent> {
        self.changes
            .iter()
            .filter(|c| c.sync_run_id == run_id)
            .cloned()
            .collect()
    }

    pub(crate) fn changes_for_vm(&self, vm_id: VmId) -> Vec<ChangeEvent> {
        self.changes
            .iter()
            .filter(|c| c.change.vm_id == vm_id)
            .cloned()
            .collect()
    }

    pub(crate) fn find_host(&self, platform: Platform, host_id: &str) -> Option<Host> {
        self.hosts
            .values()
            .find(|h| h.platform == platform && h.record.host_id == host_id)
            .cloned()
    }

    pub(crate) fn save_host(&mut self, write: HostWrite) -> Result<Host, Error> {
        let existing = self.find_host(write.platform, &write.record.host_id).map(|h| h.id);

        let id = match (write.id, existing) {
            (Some(id), Some(existing)) if id == existing => id,
            (None, None) => next(&mut self.sequences.host),
            _ => {
                return Err(Error::store(format!(
                    "host {}:{} identity mismatch",
                    write.platform, write.record.host_id
                )));
            }
        };

        let host = Host {
            id,
            platform: write.platform,
            record: write.record,
            last_sync_at: write.last_sync_at,
            created_at: write.created_at,
        };
        self.hosts.insert(id, host.clone());
        Ok(host)
    }

    pub(crate) fn list_hosts(&self, platform: Platform) -> Vec<Host> {
        self.hosts
            .values()
            .filter(|h| h.platform == platform)
            .cloned()
            .collect()
    }

    pub(crate) fn find_network(&self, platform: Platform, network_id: &str) -> Option<Network> {
        self.networks
            .values()
            .find(|n| n.platform == platform && n.record.network_id == network_id)
            .cloned()
    }

    pub(crate) fn save_network(&mut self, write: NetworkWrite) -> Result<Network, Error> {
        let existing = self
            .find_network(write.platform, &write.record.network_id)
            .map(|n| n.id);

        let id = match (write.id, existing) {
            (Some(id), Some(existing)) if id == existing => id,
            (None, None) => next(&mut self.sequences.network),
            _ => {
                return Err(Error::store(format!(
                    "network {}:{} identity mismatch",
                    write.platform, write.record.network_id
                )));
            }
        };

        let network = Network {
            id,
            platform: write.platform,
            record: write.record,
            last_sync_at: write.last_sync_at,
            created_at: write.created_at,
        };
        self.networks.insert(id, network.clone());
        Ok(network)
    }

    pub(crate) fn list_networks(&self, platform: Platform) -> Vec<Network> {
        self.networks
            .values()
            .filter(|n| n.platform == platform)
            .cloned()
            .collect()
    }
}
