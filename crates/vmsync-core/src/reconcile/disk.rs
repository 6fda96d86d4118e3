//! Disk reconciliation
//!
//! Disks are replaced wholesale; there is no stabilization. The identity
//! used to diff disks between passes lives here so the tracker and the
//! stores agree on it.

use std::collections::HashSet;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::model::DiskRecord;

/// Identity of a disk within its VM
///
/// The platform UUID when present, otherwise the platform key, otherwise a
/// hash of the disk's content. The content hash is best-effort: it changes
/// whenever any attribute changes (so a resized keyless disk reads as one
/// removal plus one addition) and identical keyless disks share it.
pub fn disk_identity(disk: &DiskRecord) -> String {
    if let Some(id) = platform_identity(disk) {
        return id.to_string();
    }

    let mut hasher = DefaultHasher::new();
    // struct field order is fixed, so the serialized form is canonical
    serde_json::to_string(disk)
        .unwrap_or_default()
        .hash(&mut hasher);
    format!("content:{:016x}", hasher.finish())
}

/// The platform-assigned part of a disk's identity, if any
fn platform_identity(disk: &DiskRecord) -> Option<&str> {
    disk.disk_uuid
        .as_deref()
        .filter(|u| !u.is_empty())
        .or_else(|| disk.disk_key.as_deref().filter(|k| !k.is_empty()))
}

/// Compute the disk set to store for a VM
///
/// The store replaces every disk row of the VM with this set on commit.
/// A disk listed twice under the same UUID or key is kept once, first
/// occurrence first; keyless disks are all kept.
pub fn reconcile_disks(incoming: Vec<DiskRecord>) -> Vec<DiskRecord> {
    let mut seen = HashSet::new();
    incoming
        .into_iter()
        .filter(|disk| match platform_identity(disk) {
            Some(id) => seen.insert(id.to_string()),
            None => true,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_prefers_uuid_then_key() {
        let both = DiskRecord {
            disk_uuid: Some("uuid-1".into()),
            disk_key: Some("2000".into()),
            ..DiskRecord::default()
        };
        let key_only = DiskRecord {
            disk_key: Some("2001".into()),
            ..DiskRecord::default()
        };

        assert_eq!(disk_identity(&both), "uuid-1");
        assert_eq!(disk_identity(&key_only), "2001");
    }

    #[test]
    fn keyless_identity_is_stable_for_equal_content() {
        let disk = DiskRecord {
            disk_label: Some("cdrom".into()),
            size_gb: 0.5,
            ..DiskRecord::default()
        };

        assert_eq!(disk_identity(&disk), disk_identity(&disk.clone()));
        assert!(disk_identity(&disk).starts_with("content:"));

        let resized = DiskRecord {
            size_gb: 1.0,
            ..disk.clone()
        };
        assert_ne!(disk_identity(&disk), disk_identity(&resized));
    }

    #[test]
    fn replace_all_keeps_incoming_order() {
        let incoming = vec![
            DiskRecord { disk_key: Some("b".into()), ..DiskRecord::default() },
            DiskRecord { disk_key: Some("a".into()), ..DiskRecord::default() },
        ];

        assert_eq!(reconcile_disks(incoming.clone()), incoming);
    }

    #[test]
    fn repeated_platform_identity_keeps_first() {
        let first = DiskRecord {
            disk_key: Some("2000".into()),
            size_gb: 10.0,
            ..DiskRecord::default()
        };
        let repeat = DiskRecord {
            disk_key: Some("2000".into()),
            size_gb: 20.0,
            ..DiskRecord::default()
        };
        let cdrom = DiskRecord {
            disk_label: Some("cdrom".into()),
            ..DiskRecord::default()
        };

        let stored = reconcile_disks(vec![first.clone(), repeat, cdrom.clone(), cdrom.clone()]);
        assert_eq!(stored, vec![first, cdrom.clone(), cdrom]);
    }
}
