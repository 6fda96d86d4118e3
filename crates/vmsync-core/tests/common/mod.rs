//! Test doubles and common utilities for the engine contract tests
//!
//! The scripted caller plays the platform APIs: each endpoint name maps to
//! a canned JSON body, a failure, or a slow response.

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use vmsync_core::config::{EndpointConfig, EngineConfig};
use vmsync_core::error::{Error, Result};
use vmsync_core::model::{
    ChangeEvent, DetectedChange, Host, Network, Platform, ResourceKind, ResourceTag, RunId,
    SyncRun, Vm, VmId, VmSnapshot,
};
use vmsync_core::traits::{EndpointCaller, EntityStore, HostWrite, NetworkWrite, VmWrite};
use vmsync_core::{EngineEvent, MemoryEntityStore, SyncEngine};

/// What an endpoint does when called
#[derive(Debug, Clone)]
pub enum Script {
    /// Return this body
    Respond(Value),
    /// Fail with this message
    Fail(String),
    /// Sleep, then return this body
    Delay(Duration, Value),
}

/// An EndpointCaller whose responses are set by the test
#[derive(Default)]
pub struct ScriptedEndpointCaller {
    scripts: Mutex<HashMap<String, Script>>,
    calls: AtomicUsize,
}

impl ScriptedEndpointCaller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set (or replace) what an endpoint does
    pub fn script(&self, endpoint: &str, script: Script) {
        self.scripts
            .lock()
            .unwrap()
            .insert(endpoint.to_string(), script);
    }

    pub fn respond(&self, endpoint: &str, body: Value) {
        self.script(endpoint, Script::Respond(body));
    }

    pub fn fail(&self, endpoint: &str, message: &str) {
        self.script(endpoint, Script::Fail(message.to_string()));
    }

    /// Number of calls made so far
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl EndpointCaller for ScriptedEndpointCaller {
    async fn call(&self, endpoint: &EndpointConfig) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let script = self.scripts.lock().unwrap().get(&endpoint.name).cloned();
        match script {
            Some(Script::Respond(body)) => Ok(body),
            Some(Script::Fail(message)) => Err(Error::endpoint(&endpoint.name, message)),
            Some(Script::Delay(delay, body)) => {
                tokio::time::sleep(delay).await;
                Ok(body)
            }
            None => Err(Error::endpoint(&endpoint.name, "no script for endpoint")),
        }
    }

    fn caller_name(&self) -> &'static str {
        "scripted"
    }
}

/// A memory store whose VM commits can be made to fail
///
/// Once armed with `fail_commit_on(n)`, the n-th following `commit_vm`
/// returns a store error; every other call is delegated untouched.
pub struct FailingEntityStore {
    inner: MemoryEntityStore,
    fail_on: AtomicUsize,
    commits: AtomicUsize,
}

impl FailingEntityStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryEntityStore::new(),
            fail_on: AtomicUsize::new(0),
            commits: AtomicUsize::new(0),
        }
    }

    /// Fail the n-th commit from now on (1-based)
    pub fn fail_commit_on(&self, n: usize) {
        self.commits.store(0, Ordering::SeqCst);
        self.fail_on.store(n, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl EntityStore for FailingEntityStore {
    async fn create_run(&self, resource: ResourceTag, started_at: DateTime<Utc>) -> Result<SyncRun> {
        self.inner.create_run(resource, started_at).await
    }

    async fn update_run(&self, run: &SyncRun) -> Result<()> {
        self.inner.update_run(run).await
    }

    async fn get_run(&self, id: RunId) -> Result<Option<SyncRun>> {
        self.inner.get_run(id).await
    }

    async fn list_runs(&self) -> Result<Vec<SyncRun>> {
        self.inner.list_runs().await
    }

    async fn upsert_endpoint(&self, endpoint: &EndpointConfig) -> Result<()> {
        self.inner.upsert_endpoint(endpoint).await
    }

    async fn replace_endpoints(&self, endpoints: &[EndpointConfig]) -> Result<()> {
        self.inner.replace_endpoints(endpoints).await
    }

    async fn list_endpoints(&self) -> Result<Vec<EndpointConfig>> {
        self.inner.list_endpoints().await
    }

    async fn load_vm(&self, platform: Platform, vm_uuid: &str) -> Result<Option<VmSnapshot>> {
        self.inner.load_vm(platform, vm_uuid).await
    }

    async fn commit_vm(&self, write: VmWrite) -> Result<Vm> {
        let n = self.commits.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.fail_on.load(Ordering::SeqCst) {
            return Err(Error::store("disk full"));
        }
        self.inner.commit_vm(write).await
    }

    async fn retire_missing(
        &self,
        platform: Platform,
        run_id: RunId,
        seen: &HashSet<String>,
        at: DateTime<Utc>,
    ) -> Result<Vec<Vm>> {
        self.inner.retire_missing(platform, run_id, seen, at).await
    }

    async fn list_vms(&self, platform: Platform) -> Result<Vec<Vm>> {
        self.inner.list_vms(platform).await
    }

    async fn append_changes(&self, run_id: RunId, changes: Vec<DetectedChange>) -> Result<Vec<ChangeEvent>> {
        self.inner.append_changes(run_id, changes).await
    }

    async fn changes_for_run(&self, run_id: RunId) -> Result<Vec<ChangeEvent>> {
        self.inner.changes_for_run(run_id).await
    }

    async fn changes_for_vm(&self, vm_id: VmId) -> Result<Vec<ChangeEvent>> {
        self.inner.changes_for_vm(vm_id).await
    }

    async fn find_host(&self, platform: Platform, host_id: &str) -> Result<Option<Host>> {
        self.inner.find_host(platform, host_id).await
    }

    async fn save_host(&self, write: HostWrite) -> Result<Host> {
        self.inner.save_host(write).await
    }

    async fn list_hosts(&self, platform: Platform) -> Result<Vec<Host>> {
        self.inner.list_hosts(platform).await
    }

    async fn find_network(&self, platform: Platform, network_id: &str) -> Result<Option<Network>> {
        self.inner.find_network(platform, network_id).await
    }

    async fn save_network(&self, write: NetworkWrite) -> Result<Network> {
        self.inner.save_network(write).await
    }

    async fn list_networks(&self, platform: Platform) -> Result<Vec<Network>> {
        self.inner.list_networks(platform).await
    }

    async fn flush(&self) -> Result<()> {
        self.inner.flush().await
    }
}

/// Engine wired to a memory store and a scripted caller
pub struct Harness {
    pub engine: SyncEngine,
    pub store: Arc<dyn EntityStore>,
    pub caller: Arc<ScriptedEndpointCaller>,
    pub events: mpsc::Receiver<EngineEvent>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self::with_store(Arc::new(MemoryEntityStore::new()), config)
    }

    pub fn with_store(store: Arc<dyn EntityStore>, config: EngineConfig) -> Self {
        let caller = Arc::new(ScriptedEndpointCaller::new());
        let (engine, events) = SyncEngine::new(
            Arc::clone(&store),
            Arc::clone(&caller) as Arc<dyn EndpointCaller>,
            config,
        )
        .expect("engine construction succeeds");

        Self {
            engine,
            store,
            caller,
            events,
        }
    }

    /// Register an active endpoint
    pub async fn endpoint(&self, name: &str, platform: Platform, kind: ResourceKind) {
        let endpoint = EndpointConfig::new(
            name,
            ResourceTag::new(platform, kind),
            format!("https://{}.example.com/api", name),
        );
        self.store
            .upsert_endpoint(&endpoint)
            .await
            .expect("endpoint stored");
    }

    /// Drain the events emitted so far
    pub fn drain_events(&mut self) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

/// A VMware VM with one NIC and one disk
pub fn vmware_vm(uuid: &str, name: &str) -> Value {
    json!({
        "uuid": uuid,
        "name": name,
        "bios_uuid": format!("bios-{}", uuid),
        "status": "on",
        "cluster": "prod-cluster",
        "host": "esx-01.lab",
        "os_type": "Ubuntu Linux (64-bit)",
        "cpu": {"total_vcpus": 2, "num_sockets": 1, "cores_per_socket": 2},
        "ram": {"size_mib": 4096},
        "summary": {"total_disks": 1, "total_disk_size_gib": 10.0, "total_nics": 1},
        "creation_date": "2024-01-10T09:00:00Z",
        "nics": [{
            "label": "Network adapter 1",
            "mac_address": mac_for(uuid),
            "network": "VM Network",
            "is_connected": true,
            "ip_addresses": [{"ip": "10.0.0.5", "type": "IPv4"}]
        }],
        "disks": [{
            "key": "2000",
            "label": "Hard disk 1",
            "size_gib": 10.0,
            "vmdk_file": format!("[ds1] {}/{}.vmdk", name, name)
        }]
    })
}

/// A Nutanix VM with no NIC and no disk
pub fn nutanix_vm(uuid: &str, name: &str) -> Value {
    json!({
        "uuid": uuid,
        "name": name,
        "status": "ON",
        "cluster": "ntnx-cluster",
        "cpu": {"total_vcpus": 4, "num_sockets": 2, "threads_per_core": 1},
        "ram": {"size_mib": 8192}
    })
}

/// Deterministic MAC per VM uuid
pub fn mac_for(uuid: &str) -> String {
    let n = uuid.bytes().fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
    format!(
        "00:50:56:{:02X}:{:02X}:{:02X}",
        (n >> 16) & 0xFF,
        (n >> 8) & 0xFF,
        n & 0xFF
    )
}

/// `{"vms": [...]}` body
pub fn vms(records: Vec<Value>) -> Value {
    json!({ "vms": records })
}
