//! NIC/IP reconciliation with link-local stabilization
//!
//! Guests that lose their DHCP lease, or whose tools report before the lease
//! is renewed, show up with only an APIPA (`169.254.x.x`) address. When that
//! happens to a NIC we already know by MAC, its previously stored routable
//! addresses are kept instead.

use std::collections::{HashMap, HashSet};

use crate::model::{IpRecord, NicRecord};

/// Outcome of reconciling a VM's NICs
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NicReconciliation {
    /// NICs to store, in incoming order
    pub nics: Vec<NicRecord>,
    /// MACs whose stored addresses were restored
    pub restored_macs: Vec<String>,
}

/// Stored routable addresses per MAC
///
/// MAC-less NICs and NICs without a routable address are not captured.
fn capture_routable(stored: &[NicRecord]) -> HashMap<&str, Vec<IpRecord>> {
    stored
        .iter()
        .filter_map(|nic| {
            let mac = nic.mac_address.as_deref().filter(|m| !m.is_empty())?;
            let routable: Vec<IpRecord> = dedup_by_address(
                nic.ip_addresses.iter().filter(|ip| !ip.is_link_local()).cloned(),
            );
            (!routable.is_empty()).then_some((mac, routable))
        })
        .collect()
}

/// Keep the first record of every address
fn dedup_by_address(ips: impl IntoIterator<Item = IpRecord>) -> Vec<IpRecord> {
    let mut seen = HashSet::new();
    ips.into_iter()
        .filter(|ip| !ip.address.is_empty() && seen.insert(ip.address.clone()))
        .collect()
}

/// Compute the NIC set to store for a VM
///
/// Every incoming NIC is kept. Its addresses are deduplicated; if none of
/// them is routable and the stored NIC with the same MAC had routable
/// addresses, those are stored instead. A MAC with nothing captured stores
/// the incoming data as-is.
pub fn reconcile_nics(stored: &[NicRecord], incoming: Vec<NicRecord>) -> NicReconciliation {
    let captured = capture_routable(stored);
    let mut result = NicReconciliation::default();

    for mut nic in incoming {
        nic.ip_addresses = dedup_by_address(std::mem::take(&mut nic.ip_addresses));

        let has_routable = nic.ip_addresses.iter().any(|ip| !ip.is_link_local());
        if !has_routable {
            let restored = nic
                .mac_address
                .as_deref()
                .and_then(|mac| captured.get(mac).map(|ips| (mac, ips)));

            if let Some((mac, ips)) = restored {
                tracing::debug!(
                    "NIC {}: no routable address reported, keeping {} stored address(es)",
                    mac,
                    ips.len()
                );
                result.restored_macs.push(mac.to_string());
                nic.ip_addresses = ips.clone();
            }
        }

        result.nics.push(nic);
    }

    result
}
