//! Inventory data model
//!
//! Entities persisted by the [`EntityStore`](crate::traits::EntityStore) and
//! the normalized records produced by the source adapters. NIC, IP and disk
//! rows use the same types on both sides: a VM's child collections are
//! rewritten wholesale on every pass, so stored rows carry no identity of
//! their own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Store-assigned VM identity
pub type VmId = u64;
/// Store-assigned run identity
pub type RunId = u64;
/// Store-assigned host identity
pub type HostId = u64;
/// Store-assigned network identity
pub type NetworkId = u64;

/// Prefix of IPv4 auto-configuration (APIPA) addresses
pub const LINK_LOCAL_PREFIX: &str = "169.254";

/// Actor stamped on VMs retired by a reconciliation pass
pub const RETIRE_ACTOR: &str = "sync-job";

/// Reason stamped on VMs retired by a reconciliation pass
pub const RETIRE_REASON: &str = "not present in latest sync";

/// Supported hypervisor platforms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// VMware vSphere / ESXi (platform A)
    Vmware,
    /// Nutanix AHV (platform B)
    Nutanix,
}

impl Platform {
    /// All supported platforms
    pub const ALL: [Platform; 2] = [Platform::Vmware, Platform::Nutanix];

    /// Lowercase platform name used in tags and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Vmware => "vmware",
            Platform::Nutanix => "nutanix",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "vmware" => Ok(Platform::Vmware),
            "nutanix" => Ok(Platform::Nutanix),
            other => Err(Error::config(format!("Unknown platform: {}", other))),
        }
    }
}

/// Kind of resource a reconciliation pass covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// Virtual machines (with facts, NICs, disks)
    Vm,
    /// Hypervisor hosts
    Host,
    /// Networks / subnets
    Network,
}

impl ResourceKind {
    /// All resource kinds, in the order a full round runs them
    pub const ALL: [ResourceKind; 3] = [ResourceKind::Vm, ResourceKind::Host, ResourceKind::Network];

    /// Lowercase kind name used in tags and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Vm => "vm",
            ResourceKind::Host => "host",
            ResourceKind::Network => "network",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A (platform, resource kind) pair, written as `vmware_vm`, `nutanix_host`, ...
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceTag {
    /// Source platform
    pub platform: Platform,
    /// Resource kind
    pub kind: ResourceKind,
}

impl ResourceTag {
    /// Create a tag
    pub fn new(platform: Platform, kind: ResourceKind) -> Self {
        Self { platform, kind }
    }
}

impl fmt::Display for ResourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.platform, self.kind)
    }
}

impl FromStr for ResourceTag {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (platform, kind) = s
            .trim()
            .split_once('_')
            .ok_or_else(|| Error::config(format!("Invalid resource tag: {}", s)))?;

        let kind = match kind.to_lowercase().as_str() {
            "vm" => ResourceKind::Vm,
            "host" => ResourceKind::Host,
            "network" => ResourceKind::Network,
            other => return Err(Error::config(format!("Unknown resource kind: {}", other))),
        };

        Ok(Self::new(platform.parse()?, kind))
    }
}

impl TryFrom<String> for ResourceTag {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ResourceTag> for String {
    fn from(tag: ResourceTag) -> Self {
        tag.to_string()
    }
}

/// Lifecycle state of a VM row
///
/// Transitions:
/// - `Deleted` → `Active` when the VM is observed again (resurrection)
/// - `Active` → `Deleted` only at the end of a pass, for VMs of the pass's
///   platform that were not observed
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RecordState {
    /// Present in the latest observation
    #[default]
    Active,
    /// Soft-deleted
    Deleted {
        /// When the VM was retired
        at: DateTime<Utc>,
        /// Why it was retired
        reason: String,
        /// Who retired it
        actor: String,
    },
}

impl RecordState {
    /// Whether this state is a soft delete
    pub fn is_deleted(&self) -> bool {
        matches!(self, RecordState::Deleted { .. })
    }
}

/// Master VM row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vm {
    /// Store-assigned id
    pub id: VmId,
    /// Source platform
    pub platform: Platform,
    /// Platform VM UUID (identity together with `platform`)
    pub vm_uuid: String,
    /// Display name
    pub name: String,
    /// Firmware (BIOS) UUID
    pub bios_uuid: Option<String>,
    /// Active or soft-deleted
    #[serde(default)]
    pub state: RecordState,
    /// First observation
    pub first_seen_at: DateTime<Utc>,
    /// Latest observation
    pub last_seen_at: DateTime<Utc>,
    /// Run that last observed (or retired) this VM
    pub last_sync_run_id: Option<RunId>,
}

impl Vm {
    /// Whether the VM is soft-deleted
    pub fn is_deleted(&self) -> bool {
        self.state.is_deleted()
    }

    /// Inventory key in the form `platform:uuid`
    pub fn inventory_key(&self) -> String {
        format!("{}:{}", self.platform, self.vm_uuid)
    }
}

/// Scalar VM facts produced by an adapter
///
/// Every field is set by the adapter on every pass; fields a platform does
/// not report are `None`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VmFactValues {
    pub power_state: Option<String>,
    pub hypervisor_type: Option<String>,
    pub cluster_name: Option<String>,
    pub host_identifier: Option<String>,
    pub os_type: Option<String>,
    pub os_family: Option<String>,
    pub hostname: Option<String>,
    pub total_vcpus: Option<i64>,
    pub num_sockets: Option<i64>,
    pub cores_per_socket: Option<i64>,
    pub vcpus_per_socket: Option<i64>,
    pub threads_per_core: Option<i64>,
    pub cpu_hot_add: Option<bool>,
    pub cpu_hot_remove: Option<bool>,
    pub memory_mb: Option<i64>,
    pub mem_hot_add: Option<bool>,
    pub mem_hot_add_limit_mb: Option<i64>,
    pub total_disks: Option<i64>,
    pub total_disk_gb: Option<f64>,
    pub total_nics: Option<i64>,
    pub creation_date: Option<DateTime<Utc>>,
    pub last_update_date: Option<DateTime<Utc>>,
}

/// Stored VM fact (1:1 with a VM)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmFact {
    /// Scalar values, replaced wholesale each pass
    #[serde(flatten)]
    pub values: VmFactValues,
    /// Raw source payload the values were extracted from
    pub raw: serde_json::Value,
    /// When the fact was last written
    pub fact_updated_at: DateTime<Utc>,
}

/// One IP address on a NIC
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpRecord {
    /// Address as reported by the source
    pub address: String,
    /// Source-specific address type (e.g. "ipv4", "ASSIGNED")
    pub ip_type: Option<String>,
}

impl IpRecord {
    /// Create an IP record
    pub fn new(address: impl Into<String>, ip_type: Option<String>) -> Self {
        Self {
            address: address.into(),
            ip_type,
        }
    }

    /// Whether this is an IPv4 auto-configuration address
    pub fn is_link_local(&self) -> bool {
        self.address.starts_with(LINK_LOCAL_PREFIX)
    }
}

/// A VM network interface
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NicRecord {
    pub nic_uuid: Option<String>,
    pub label: Option<String>,
    /// Correlation key across passes; MAC-less NICs cannot be correlated
    pub mac_address: Option<String>,
    pub nic_type: Option<String>,
    pub network_name: Option<String>,
    pub vlan_mode: Option<String>,
    pub is_connected: Option<bool>,
    pub state: Option<String>,
    pub ip_addresses: Vec<IpRecord>,
}

/// A VM virtual disk
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DiskRecord {
    pub disk_uuid: Option<String>,
    pub disk_key: Option<String>,
    pub disk_label: Option<String>,
    pub device_type: Option<String>,
    pub adapter_type: Option<String>,
    pub size_gb: f64,
    pub backing_type: Option<String>,
    pub backing_path: Option<String>,
    pub storage_name: Option<String>,
    pub is_image: Option<bool>,
    pub scsi_bus: Option<i64>,
    pub scsi_unit: Option<i64>,
}

/// Everything stored for one VM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmSnapshot {
    pub vm: Vm,
    pub fact: Option<VmFact>,
    pub nics: Vec<NicRecord>,
    pub disks: Vec<DiskRecord>,
}

/// Normalized host attributes
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HostRecord {
    /// Platform host id (identity together with the platform)
    pub host_id: String,
    pub hostname: String,
    /// Management IP
    pub hypervisor_ip: Option<String>,
    /// Hypervisor version string
    pub hypervisor_name: Option<String>,
    pub cpu_model: Option<String>,
    pub cpu_cores_physical: Option<i64>,
    pub ram_gb: Option<i64>,
}

/// Hypervisor host row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Host {
    pub id: HostId,
    pub platform: Platform,
    #[serde(flatten)]
    pub record: HostRecord,
    pub last_sync_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Normalized network attributes
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NetworkRecord {
    /// Platform network id (identity together with the platform)
    pub network_id: String,
    pub name: String,
    /// User-assigned unless the source supplies one
    pub vlan_id: Option<i64>,
    pub description: Option<String>,
}

/// Network row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Network {
    pub id: NetworkId,
    pub platform: Platform,
    #[serde(flatten)]
    pub record: NetworkRecord,
    pub last_sync_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Coarse change categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeCategory {
    PowerState,
    Cpu,
    Memory,
    Host,
    Cluster,
    Disk,
    Nic,
    Ip,
}

impl ChangeCategory {
    /// Uppercase category name as stored
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeCategory::PowerState => "POWER_STATE",
            ChangeCategory::Cpu => "CPU",
            ChangeCategory::Memory => "MEMORY",
            ChangeCategory::Host => "HOST",
            ChangeCategory::Cluster => "CLUSTER",
            ChangeCategory::Disk => "DISK",
            ChangeCategory::Nic => "NIC",
            ChangeCategory::Ip => "IP",
        }
    }
}

impl fmt::Display for ChangeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A change detected during a pass, before it is persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedChange {
    pub vm_id: VmId,
    pub category: ChangeCategory,
    pub field_name: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub changed_at: DateTime<Utc>,
}

/// A persisted change event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub id: u64,
    pub sync_run_id: RunId,
    #[serde(flatten)]
    pub change: DetectedChange,
}

/// Status of a reconciliation run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Running,
    Success,
    Warning,
    Failed,
}

impl RunStatus {
    /// Uppercase status name as stored
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "RUNNING",
            RunStatus::Success => "SUCCESS",
            RunStatus::Warning => "WARNING",
            RunStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one endpoint within a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointOutcome {
    pub endpoint: String,
    /// Records applied from this endpoint
    pub records: usize,
    pub error: Option<String>,
}

/// Detail payload of a run
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunDetails {
    #[serde(default)]
    pub endpoints: Vec<EndpointOutcome>,
    /// Records skipped because they could not be normalized
    #[serde(default)]
    pub skipped_records: Vec<String>,
    /// Records dropped because an earlier endpoint already supplied them
    #[serde(default)]
    pub duplicate_records: usize,
    /// Informational note (e.g. no endpoint configured)
    pub note: Option<String>,
    /// Fatal error text
    pub error: Option<String>,
}

/// Reconciliation run row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRun {
    pub id: RunId,
    pub resource: ResourceTag,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub records_seen: usize,
    pub records_retired: usize,
    pub changes_detected: usize,
    pub details: RunDetails,
}

/// Outcome of a run as reported to whoever triggered it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    /// `None` when not even the run row could be created
    pub run_id: Option<RunId>,
    pub resource: ResourceTag,
    pub status: RunStatus,
    pub records_seen: usize,
    pub records_retired: usize,
    pub changes_detected: usize,
    pub error: Option<String>,
}

impl From<&SyncRun> for RunResult {
    fn from(run: &SyncRun) -> Self {
        let error = run.details.error.clone().or_else(|| {
            let failures: Vec<String> = run
                .details
                .endpoints
                .iter()
                .filter_map(|e| e.error.as_ref().map(|err| format!("{}: {}", e.endpoint, err)))
                .collect();
            (!failures.is_empty()).then(|| failures.join("; "))
        });

        Self {
            run_id: Some(run.id),
            resource: run.resource,
            status: run.status,
            records_seen: run.records_seen,
            records_retired: run.records_retired,
            changes_detected: run.changes_detected,
            error,
        }
    }
}
