//! Change tracker
//!
//! Compares the stored state of a VM with its newly normalized state and
//! produces field-level [`DetectedChange`]s in coarse categories:
//!
//! | Category      | Fields                                                           |
//! |---------------|------------------------------------------------------------------|
//! | `POWER_STATE` | `power_state`                                                    |
//! | `CPU`         | `total_vcpus`, `num_sockets`, `cores_per_socket`, `vcpus_per_socket` |
//! | `MEMORY`      | `memory_mb`                                                      |
//! | `HOST`        | `host_identifier`                                                |
//! | `CLUSTER`     | `cluster_name`                                                   |
//! | `DISK`        | `disk_added`, `disk_removed`, `disk_size_changed`                |
//! | `NIC`         | `nic_added`, `nic_removed`                                       |
//! | `IP`          | `ip_added`, `ip_removed`                                         |
//!
//! The [`ChangeTracker`] buffers the changes of a whole pass so they can be
//! written in one batch when the pass ends.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};

use crate::model::{ChangeCategory, DetectedChange, DiskRecord, NicRecord, VmFactValues, VmId};
use crate::reconcile::disk_identity;

/// Disk size differences at or below this many GiB are noise
pub const DISK_SIZE_TOLERANCE_GB: f64 = 0.01;

type FieldText = fn(&VmFactValues) -> Option<String>;

const TRACKED_FACTS: &[(ChangeCategory, &str, FieldText)] = &[
    (ChangeCategory::PowerState, "power_state", |f| f.power_state.clone()),
    (ChangeCategory::Cpu, "total_vcpus", |f| f.total_vcpus.map(|v| v.to_string())),
    (ChangeCategory::Cpu, "num_sockets", |f| f.num_sockets.map(|v| v.to_string())),
    (ChangeCategory::Cpu, "cores_per_socket", |f| f.cores_per_socket.map(|v| v.to_string())),
    (ChangeCategory::Cpu, "vcpus_per_socket", |f| f.vcpus_per_socket.map(|v| v.to_string())),
    (ChangeCategory::Memory, "memory_mb", |f| f.memory_mb.map(|v| v.to_string())),
    (ChangeCategory::Host, "host_identifier", |f| f.host_identifier.clone()),
    (ChangeCategory::Cluster, "cluster_name", |f| f.cluster_name.clone()),
];

/// Buffer of the changes detected during one pass
#[derive(Debug, Default)]
pub struct ChangeTracker {
    changes: Vec<DetectedChange>,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer changes computed elsewhere
    pub fn record(&mut self, changes: Vec<DetectedChange>) {
        if let Some(first) = changes.first() {
            tracing::debug!("VM {}: {} change(s) detected", first.vm_id, changes.len());
        }
        self.changes.extend(changes);
    }

    /// Number of buffered changes
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Buffered changes, in detection order
    pub fn changes(&self) -> &[DetectedChange] {
        &self.changes
    }

    /// Drain the buffer for a batch write
    pub fn take(&mut self) -> Vec<DetectedChange> {
        std::mem::take(&mut self.changes)
    }
}

/// Borrowed view of the comparable state of a VM
#[derive(Debug, Clone, Copy)]
pub struct VmState<'a> {
    pub facts: &'a VmFactValues,
    pub nics: &'a [NicRecord],
    pub disks: &'a [DiskRecord],
}

/// Every change between two states of the same VM
///
/// `new.nics` must be the NICs actually written, after IP stabilization,
/// so restored addresses do not show up as churn.
pub fn vm_changes(vm_id: VmId, old: &VmState<'_>, new: &VmState<'_>, at: DateTime<Utc>) -> Vec<DetectedChange> {
    let mut changes = fact_changes(vm_id, old.facts, new.facts, at);
    changes.extend(disk_changes(vm_id, old.disks, new.disks, at));
    changes.extend(nic_changes(vm_id, old.nics, new.nics, at));
    changes.extend(ip_changes(vm_id, old.nics, new.nics, at));
    changes
}

fn change(
    vm_id: VmId,
    category: ChangeCategory,
    field_name: &str,
    old_value: Option<String>,
    new_value: Option<String>,
    at: DateTime<Utc>,
) -> DetectedChange {
    DetectedChange {
        vm_id,
        category,
        field_name: field_name.to_string(),
        old_value,
        new_value,
        changed_at: at,
    }
}

/// Scalar fact changes
///
/// A field changes when its text differs and at least one side is non-empty.
pub fn fact_changes(
    vm_id: VmId,
    old: &VmFactValues,
    new: &VmFactValues,
    at: DateTime<Utc>,
) -> Vec<DetectedChange> {
    TRACKED_FACTS
        .iter()
        .filter_map(|(category, field, text)| {
            let old_value = text(old);
            let new_value = text(new);
            let non_empty = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.is_empty());

            (old_value != new_value && (non_empty(&old_value) || non_empty(&new_value)))
                .then(|| change(vm_id, *category, field, old_value, new_value, at))
        })
        .collect()
}

/// Render a size the way the change log always has: `40.0`, `12.5`
fn gb(size: f64) -> String {
    format!("{:?}", size)
}

fn disk_label(disk: &DiskRecord) -> &str {
    disk.disk_label.as_deref().unwrap_or("Unknown")
}

fn keyed_disks(disks: &[DiskRecord]) -> BTreeMap<String, &DiskRecord> {
    disks.iter().map(|d| (disk_identity(d), d)).collect()
}

/// Disk additions, removals and resizes, keyed by [`disk_identity`]
pub fn disk_changes(
    vm_id: VmId,
    old: &[DiskRecord],
    new: &[DiskRecord],
    at: DateTime<Utc>,
) -> Vec<DetectedChange> {
    let old_map = keyed_disks(old);
    let new_map = keyed_disks(new);
    let mut changes = Vec::new();

    for (key, disk) in &new_map {
        if !old_map.contains_key(key) {
            changes.push(change(
                vm_id,
                ChangeCategory::Disk,
                "disk_added",
                None,
                Some(format!("{} ({} GB)", disk_label(disk), gb(disk.size_gb))),
                at,
            ));
        }
    }

    for (key, disk) in &old_map {
        if !new_map.contains_key(key) {
            changes.push(change(
                vm_id,
                ChangeCategory::Disk,
                "disk_removed",
                Some(format!("{} ({} GB)", disk_label(disk), gb(disk.size_gb))),
                None,
                at,
            ));
        }
    }

    for (key, old_disk) in &old_map {
        if let Some(new_disk) = new_map.get(key) {
            if (old_disk.size_gb - new_disk.size_gb).abs() > DISK_SIZE_TOLERANCE_GB {
                changes.push(change(
                    vm_id,
                    ChangeCategory::Disk,
                    "disk_size_changed",
                    Some(format!("{}: {} GB", disk_label(old_disk), gb(old_disk.size_gb))),
                    Some(format!("{}: {} GB", disk_label(new_disk), gb(new_disk.size_gb))),
                    at,
                ));
            }
        }
    }

    changes
}

fn keyed_nics(nics: &[NicRecord]) -> BTreeMap<&str, &NicRecord> {
    nics.iter()
        .filter_map(|n| n.mac_address.as_deref().filter(|m| !m.is_empty()).map(|m| (m, n)))
        .collect()
}

fn nic_label(nic: &NicRecord, mac: &str) -> String {
    format!("{} ({})", nic.network_name.as_deref().unwrap_or("Unknown"), mac)
}

/// NIC additions and removals, keyed by MAC; MAC-less NICs are ignored
pub fn nic_changes(
    vm_id: VmId,
    old: &[NicRecord],
    new: &[NicRecord],
    at: DateTime<Utc>,
) -> Vec<DetectedChange> {
    let old_map = keyed_nics(old);
    let new_map = keyed_nics(new);
    let mut changes = Vec::new();

    for (mac, nic) in &new_map {
        if !old_map.contains_key(mac) {
            changes.push(change(vm_id, ChangeCategory::Nic, "nic_added", None, Some(nic_label(nic, mac)), at));
        }
    }

    for (mac, nic) in &old_map {
        if !new_map.contains_key(mac) {
            changes.push(change(vm_id, ChangeCategory::Nic, "nic_removed", Some(nic_label(nic, mac)), None, at));
        }
    }

    changes
}

fn all_addresses(nics: &[NicRecord]) -> BTreeSet<&str> {
    nics.iter()
        .flat_map(|n| n.ip_addresses.iter())
        .map(|ip| ip.address.as_str())
        .filter(|a| !a.is_empty())
        .collect()
}

/// IP additions and removals over the union of all NICs of the VM
pub fn ip_changes(
    vm_id: VmId,
    old: &[NicRecord],
    new: &[NicRecord],
    at: DateTime<Utc>,
) -> Vec<DetectedChange> {
    let old_ips = all_addresses(old);
    let new_ips = all_addresses(new);

    let added = new_ips
        .difference(&old_ips)
        .map(|ip| change(vm_id, ChangeCategory::Ip, "ip_added", None, Some(ip.to_string()), at));
    let removed = old_ips
        .difference(&new_ips)
        .map(|ip| change(vm_id, ChangeCategory::Ip, "ip_removed", Some(ip.to_string()), None, at));

    added.chain(removed).collect()
}
