//! Identity resolution
//!
//! Canonical identities are (platform, vm_uuid) for VMs, (platform, host_id)
//! for hosts and (platform, network_id) for networks. A VM is never matched
//! across platforms.
//!
//! These functions decide how an observed record lands on its stored row;
//! the engine looks the row up and the store commits the result.

use chrono::{DateTime, Utc};

use crate::adapter::NormalizedVm;
use crate::model::{Host, HostRecord, Network, NetworkRecord, Platform, RecordState, Vm, VmId};
use crate::traits::{HostWrite, NetworkWrite};

/// Name given to a new VM whose payload carries none
pub const UNKNOWN_VM_NAME: &str = "Unknown";

/// How an observed VM maps onto its stored row
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedVm {
    /// Stored id; `None` for a VM seen for the first time
    pub id: Option<VmId>,
    pub name: String,
    pub bios_uuid: Option<String>,
    pub first_seen_at: DateTime<Utc>,
    /// The stored row was soft-deleted and is being brought back
    pub resurrected: bool,
}

impl ResolvedVm {
    pub fn is_new(&self) -> bool {
        self.id.is_none()
    }

    /// Observed VMs are always active
    pub fn state(&self) -> RecordState {
        RecordState::Active
    }
}

/// Resolve an observed VM against its stored row
///
/// A new VM takes the observed name (or [`UNKNOWN_VM_NAME`]). An existing
/// VM takes the observed name and firmware UUID when they are reported and
/// keeps its stored values otherwise; a soft-deleted one is resurrected.
pub fn resolve_vm(existing: Option<&Vm>, incoming: &NormalizedVm, now: DateTime<Utc>) -> ResolvedVm {
    match existing {
        None => ResolvedVm {
            id: None,
            name: incoming
                .name
                .clone()
                .unwrap_or_else(|| UNKNOWN_VM_NAME.to_string()),
            bios_uuid: incoming.bios_uuid.clone(),
            first_seen_at: now,
            resurrected: false,
        },
        Some(vm) => ResolvedVm {
            id: Some(vm.id),
            name: incoming.name.clone().unwrap_or_else(|| vm.name.clone()),
            bios_uuid: incoming.bios_uuid.clone().or_else(|| vm.bios_uuid.clone()),
            first_seen_at: vm.first_seen_at,
            resurrected: vm.is_deleted(),
        },
    }
}

/// Find-or-create a host; hosts are never soft-deleted
pub fn resolve_host(
    platform: Platform,
    existing: Option<&Host>,
    record: HostRecord,
    now: DateTime<Utc>,
) -> HostWrite {
    HostWrite {
        id: existing.map(|h| h.id),
        platform,
        record,
        created_at: existing.map(|h| h.created_at).unwrap_or(now),
        last_sync_at: now,
    }
}

/// Find-or-create a network
///
/// The VLAN id is user-assigned: a stored value survives unless the source
/// supplies one explicitly.
pub fn resolve_network(
    platform: Platform,
    existing: Option<&Network>,
    mut record: NetworkRecord,
    now: DateTime<Utc>,
) -> NetworkWrite {
    if record.vlan_id.is_none() {
        record.vlan_id = existing.and_then(|n| n.record.vlan_id);
    }

    NetworkWrite {
        id: existing.map(|n| n.id),
        platform,
        record,
        created_at: existing.map(|n| n.created_at).unwrap_or(now),
        last_sync_at: now,
    }
}
