//! Reconciliation engine
//!
//! The SyncEngine runs reconciliation passes. One pass covers one
//! (platform, resource kind) and:
//! - Records a run row (RUNNING) before doing anything else
//! - Calls every active endpoint for the pair concurrently
//! - Adapts each payload and applies its records one by one
//! - Retires the platform's VMs that no endpoint reported
//! - Writes the pass's change events in one batch and finalizes the run
//!
//! ## Architecture
//!
//! ```text
//!                 ┌────────────────┐
//!                 │ EndpointCaller │ ×N, concurrent, with deadline
//!                 └────────────────┘
//!                         │ JSON
//!                         ▼
//!                 ┌────────────────┐
//!                 │ SourceAdapter  │ normalized records
//!                 └────────────────┘
//!                         │
//!                         ▼
//! ┌──────────────────────────────────────────────┐
//! │ SyncEngine (serial, per record)              │
//! │  identity → NIC/IP + disk reconcile → diff   │
//! └──────────────────────────────────────────────┘
//!          │                              │
//!          ▼                              ▼
//! ┌─────────────────┐            ┌─────────────────┐
//! │  EntityStore    │            │     Events      │
//! │ (atomic commit) │            │    (notify)     │
//! └─────────────────┘            └─────────────────┘
//! ```
//!
//! ## Failure Model
//!
//! An endpoint failure (transport, status, timeout, bad JSON) is recorded
//! against the run and the pass continues. A record that cannot be
//! normalized is skipped into the run detail. Only an entity store error
//! aborts a pass, which then ends FAILED with the error text. `run()` never
//! returns an error: the [`RunResult`] carries status and detail.

pub mod identity;

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::adapter::{self, NormalizedVm};
use crate::config::{EndpointConfig, EngineConfig};
use crate::error::{Error, Result};
use crate::model::{
    EndpointOutcome, Platform, ResourceKind, ResourceTag, RunId, RunResult, RunStatus, SyncRun,
    VmId,
};
use crate::reconcile::{reconcile_disks, reconcile_nics};
use crate::tracker::{ChangeTracker, VmState, vm_changes};
use crate::traits::{EndpointCaller, EntityStore, VmWrite};

/// Events emitted by the SyncEngine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// A pass started
    RunStarted { run_id: RunId, resource: ResourceTag },

    /// An endpoint failed during a pass
    EndpointFailed {
        run_id: RunId,
        endpoint: String,
        error: String,
    },

    /// A soft-deleted VM was observed again
    VmResurrected { vm_id: VmId, vm_uuid: String },

    /// VMs were retired at the end of a pass
    VmsRetired { run_id: RunId, count: usize },

    /// A pass finished (any status)
    RunFinished { result: RunResult },
}

/// Mutable state of one pass
#[derive(Default)]
struct Pass {
    /// Identities observed so far (uuid, host id or network id)
    seen: HashSet<String>,
    tracker: ChangeTracker,
    succeeded: usize,
    failed: usize,
}

/// Core reconciliation engine
///
/// The engine is handed its collaborators explicitly and holds no global
/// state; share it behind an `Arc` to run passes from several tasks.
///
/// ## Concurrency
///
/// At most one pass per (platform, kind) runs at a time: a second `run()`
/// for the same pair waits for the first to finish. Passes for different
/// pairs run concurrently.
pub struct SyncEngine {
    /// Entity store, the only shared mutable resource
    store: Arc<dyn EntityStore>,

    /// Endpoint caller, shared with the fan-out tasks
    caller: Arc<dyn EndpointCaller>,

    /// Engine settings
    config: EngineConfig,

    /// One run lock per (platform, kind)
    run_locks: HashMap<ResourceTag, Mutex<()>>,

    /// Event sender for external monitoring
    event_tx: mpsc::Sender<EngineEvent>,
}

impl SyncEngine {
    /// Create a new engine
    ///
    /// # Returns
    ///
    /// A tuple of (engine, event_receiver) where event_receiver yields engine events
    pub fn new(
        store: Arc<dyn EntityStore>,
        caller: Arc<dyn EndpointCaller>,
        config: EngineConfig,
    ) -> Result<(Self, mpsc::Receiver<EngineEvent>)> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(config.event_channel_capacity);

        let run_locks = Platform::ALL
            .iter()
            .flat_map(|p| ResourceKind::ALL.iter().map(|k| ResourceTag::new(*p, *k)))
            .map(|tag| (tag, Mutex::new(())))
            .collect();

        let engine = Self {
            store,
            caller,
            config,
            run_locks,
            event_tx: tx,
        };

        Ok((engine, rx))
    }

    /// The engine's entity store
    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    /// Run one reconciliation pass for a (platform, kind)
    pub async fn run(&self, platform: Platform, kind: ResourceKind) -> RunResult {
        let resource = ResourceTag::new(platform, kind);

        let lock = self.run_locks.get(&resource);
        let _guard = match lock {
            Some(lock) => match lock.try_lock() {
                Ok(guard) => Some(guard),
                Err(_) => {
                    debug!("{} pass already running, waiting for it to finish", resource);
                    Some(lock.lock().await)
                }
            },
            None => None,
        };

        let started_at = Utc::now();
        let mut run = match self.store.create_run(resource, started_at).await {
            Ok(run) => run,
            Err(e) => {
                error!("Failed to record {} run: {}", resource, e);
                let result = RunResult {
                    run_id: None,
                    resource,
                    status: RunStatus::Failed,
                    records_seen: 0,
                    records_retired: 0,
                    changes_detected: 0,
                    error: Some(e.to_string()),
                };
                self.emit_event(EngineEvent::RunFinished {
                    result: result.clone(),
                });
                return result;
            }
        };

        info!("Starting {} pass (run {})", resource, run.id);
        self.emit_event(EngineEvent::RunStarted {
            run_id: run.id,
            resource,
        });

        let mut pass = Pass::default();
        let outcome = self.execute(&mut run, &mut pass).await;

        if let Err(e) = outcome {
            error!("{} pass aborted (run {}): {}", resource, run.id, e);
            run.status = RunStatus::Failed;
            run.details.error = Some(e.to_string());

            // VMs already committed keep their history
            let changes = pass.tracker.take();
            if !changes.is_empty() {
                match self.store.append_changes(run.id, changes).await {
                    Ok(appended) => run.changes_detected = appended.len(),
                    Err(e) => warn!("Failed to write change events of aborted run {}: {}", run.id, e),
                }
            }
        }

        run.records_seen = pass.seen.len();
        run.finished_at = Some(Utc::now());

        if let Err(e) = self.store.update_run(&run).await {
            error!("Failed to finalize run {}: {}", run.id, e);
            run.status = RunStatus::Failed;
            run.details.error.get_or_insert_with(|| e.to_string());
        }

        let result = RunResult::from(&run);
        info!(
            "{} pass finished (run {}): {} seen={} retired={} changes={}",
            resource,
            run.id,
            result.status,
            result.records_seen,
            result.records_retired,
            result.changes_detected
        );
        self.emit_event(EngineEvent::RunFinished {
            result: result.clone(),
        });

        result
    }

    /// Run the VM, host and network passes of a platform, in that order
    pub async fn run_platform(&self, platform: Platform) -> Vec<RunResult> {
        let mut results = Vec::with_capacity(ResourceKind::ALL.len());
        for kind in ResourceKind::ALL {
            results.push(self.run(platform, kind).await);
        }
        results
    }

    /// Body of a pass; an `Err` is a store failure that aborts the pass
    async fn execute(&self, run: &mut SyncRun, pass: &mut Pass) -> Result<()> {
        let resource = run.resource;
        let endpoints = self.store.active_endpoints(resource).await?;

        if endpoints.is_empty() {
            info!("No active endpoints configured for {}", resource);
            run.details.note = Some(format!("No active endpoints configured for {}", resource));
            run.status = if self.config.empty_configuration_is_warning {
                RunStatus::Warning
            } else {
                RunStatus::Success
            };
            return Ok(());
        }

        let responses = self.fetch_all(&endpoints).await;
        let now = Utc::now();

        for (endpoint, response) in endpoints.iter().zip(responses) {
            let payload = match response {
                Ok(payload) => payload,
                Err(e) => {
                    warn!("Endpoint {} failed: {}", endpoint.name, e);
                    pass.failed += 1;
                    run.details.endpoints.push(EndpointOutcome {
                        endpoint: endpoint.name.clone(),
                        records: 0,
                        error: Some(e.to_string()),
                    });
                    self.emit_event(EngineEvent::EndpointFailed {
                        run_id: run.id,
                        endpoint: endpoint.name.clone(),
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            pass.succeeded += 1;
            let applied = self.apply_payload(run, pass, endpoint, &payload, now).await?;
            debug!("Endpoint {}: {} record(s) applied", endpoint.name, applied);
            run.details.endpoints.push(EndpointOutcome {
                endpoint: endpoint.name.clone(),
                records: applied,
                error: None,
            });
        }

        if resource.kind == ResourceKind::Vm {
            if pass.succeeded > 0 {
                let retired = self
                    .store
                    .retire_missing(resource.platform, run.id, &pass.seen, Utc::now())
                    .await?;
                for vm in &retired {
                    info!("Retired {} VM {} ({})", vm.platform, vm.vm_uuid, vm.name);
                }
                run.records_retired = retired.len();
                if !retired.is_empty() {
                    self.emit_event(EngineEvent::VmsRetired {
                        run_id: run.id,
                        count: retired.len(),
                    });
                }
            } else {
                warn!("No endpoint succeeded for {}, skipping retirement", resource);
            }
        }

        let changes = pass.tracker.take();
        if !changes.is_empty() {
            run.changes_detected = self.store.append_changes(run.id, changes).await?.len();
        }

        run.status = if pass.failed == 0 {
            RunStatus::Success
        } else if pass.succeeded == 0 {
            RunStatus::Failed
        } else {
            RunStatus::Warning
        };

        Ok(())
    }

    /// Call every endpoint concurrently; results come back in endpoint order
    async fn fetch_all(&self, endpoints: &[EndpointConfig]) -> Vec<Result<Value>> {
        let timeout_secs = self.config.endpoint_timeout_secs;
        let mut tasks = JoinSet::new();

        for (index, endpoint) in endpoints.iter().cloned().enumerate() {
            let caller = Arc::clone(&self.caller);
            tasks.spawn(async move {
                debug!("Calling endpoint {} via {}", endpoint.name, caller.caller_name());
                let result = match tokio::time::timeout(
                    Duration::from_secs(timeout_secs),
                    caller.call(&endpoint),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(Error::timeout(&endpoint.name, timeout_secs)),
                };
                (index, result)
            });
        }

        let mut results: Vec<Option<Result<Value>>> = endpoints.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => results[index] = Some(result),
                Err(e) => error!("Endpoint task failed: {}", e),
            }
        }

        results
            .into_iter()
            .zip(endpoints)
            .map(|(result, endpoint)| {
                result.unwrap_or_else(|| Err(Error::endpoint(&endpoint.name, "endpoint call did not complete")))
            })
            .collect()
    }

    /// Apply one endpoint's payload; returns the number of records applied
    async fn apply_payload(
        &self,
        run: &mut SyncRun,
        pass: &mut Pass,
        endpoint: &EndpointConfig,
        payload: &Value,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let platform = run.resource.platform;
        let mut applied = 0;

        match run.resource.kind {
            ResourceKind::Vm => {
                let adapted = adapter::adapt_vms(platform, payload);
                Self::note_skipped(run, endpoint, adapted.skipped);

                for vm in adapted.records {
                    if pass.seen.contains(&vm.vm_uuid) {
                        debug!("VM {} already supplied by an earlier endpoint", vm.vm_uuid);
                        run.details.duplicate_records += 1;
                        continue;
                    }
                    let vm_uuid = vm.vm_uuid.clone();
                    self.apply_vm(run.id, platform, vm, &mut pass.tracker, now).await?;
                    pass.seen.insert(vm_uuid);
                    applied += 1;
                }
            }
            ResourceKind::Host => {
                let adapted = adapter::adapt_hosts(platform, payload);
                Self::note_skipped(run, endpoint, adapted.skipped);

                for record in adapted.records {
                    if pass.seen.contains(&record.host_id) {
                        run.details.duplicate_records += 1;
                        continue;
                    }
                    let existing = self.store.find_host(platform, &record.host_id).await?;
                    let write = identity::resolve_host(platform, existing.as_ref(), record, now);
                    let host = self.store.save_host(write).await?;
                    pass.seen.insert(host.record.host_id);
                    applied += 1;
                }
            }
            ResourceKind::Network => {
                let adapted = adapter::adapt_networks(platform, payload);
                Self::note_skipped(run, endpoint, adapted.skipped);

                for record in adapted.records {
                    if pass.seen.contains(&record.network_id) {
                        run.details.duplicate_records += 1;
                        continue;
                    }
                    let existing = self.store.find_network(platform, &record.network_id).await?;
                    let write = identity::resolve_network(platform, existing.as_ref(), record, now);
                    let network = self.store.save_network(write).await?;
                    pass.seen.insert(network.record.network_id);
                    applied += 1;
                }
            }
        }

        Ok(applied)
    }

    /// Identity, child reconciliation, diff and atomic commit for one VM
    async fn apply_vm(
        &self,
        run_id: RunId,
        platform: Platform,
        vm: NormalizedVm,
        tracker: &mut ChangeTracker,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let snapshot = self.store.load_vm(platform, &vm.vm_uuid).await?;
        let resolved = identity::resolve_vm(snapshot.as_ref().map(|s| &s.vm), &vm, now);

        let stored_nics = snapshot.as_ref().map(|s| s.nics.as_slice()).unwrap_or(&[]);
        let nics = reconcile_nics(stored_nics, vm.nics).nics;
        let disks = reconcile_disks(vm.disks);

        // Only a VM with a stored fact has something to diff against
        let changes = match (&snapshot, resolved.id) {
            (Some(snapshot), Some(vm_id)) => match &snapshot.fact {
                Some(fact) => vm_changes(
                    vm_id,
                    &VmState {
                        facts: &fact.values,
                        nics: &snapshot.nics,
                        disks: &snapshot.disks,
                    },
                    &VmState {
                        facts: &vm.facts,
                        nics: &nics,
                        disks: &disks,
                    },
                    now,
                ),
                None => Vec::new(),
            },
            _ => Vec::new(),
        };

        let write = VmWrite {
            id: resolved.id,
            platform,
            vm_uuid: vm.vm_uuid.clone(),
            name: resolved.name.clone(),
            bios_uuid: resolved.bios_uuid.clone(),
            state: resolved.state(),
            first_seen_at: resolved.first_seen_at,
            last_seen_at: now,
            last_sync_run_id: run_id,
            fact: crate::model::VmFact {
                values: vm.facts,
                raw: vm.raw,
                fact_updated_at: now,
            },
            nics,
            disks,
        };

        let stored = self.store.commit_vm(write).await?;
        tracker.record(changes);

        if resolved.is_new() {
            debug!("New {} VM {} ({}) as {}", platform, stored.vm_uuid, stored.name, stored.id);
        } else if resolved.resurrected {
            info!("Resurrected {} VM {} ({})", platform, stored.vm_uuid, stored.name);
            self.emit_event(EngineEvent::VmResurrected {
                vm_id: stored.id,
                vm_uuid: stored.vm_uuid.clone(),
            });
        }

        Ok(())
    }

    fn note_skipped(run: &mut SyncRun, endpoint: &EndpointConfig, skipped: Vec<String>) {
        run.details.skipped_records.extend(
            skipped
                .into_iter()
                .map(|reason| format!("{}: {}", endpoint.name, reason)),
        );
    }

    /// Emit an engine event
    ///
    /// # Parameters
    ///
    /// - `event`: The event to emit
    fn emit_event(&self, event: EngineEvent) {
        if self.event_tx.try_send(event).is_err() {
            warn!("Event channel full, dropping event. Consider increasing event_channel_capacity.");
        }
    }
}
