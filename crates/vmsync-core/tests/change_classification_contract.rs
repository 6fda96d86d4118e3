//! Contract Test: Change Classification
//!
//! Constraints verified:
//! - Scalar fact changes land in their category with old and new text
//! - Disk diffing reports additions and resizes per disk identity
//! - NIC additions and removals are keyed by MAC
//! - Change events are written once per pass, linked to run and VM
//!
//! If this test fails, the change log misreports what happened to a VM.

mod common;

use common::*;
use serde_json::{Value, json};
use vmsync_core::model::{ChangeCategory, ChangeEvent, Platform, ResourceKind};
use vmsync_core::traits::EntityStore;

fn summarize(changes: &[ChangeEvent]) -> Vec<(ChangeCategory, String, Option<String>, Option<String>)> {
    changes
        .iter()
        .map(|c| {
            (
                c.change.category,
                c.change.field_name.clone(),
                c.change.old_value.clone(),
                c.change.new_value.clone(),
            )
        })
        .collect()
}

async fn pass(harness: &Harness, vm: Value) -> Vec<ChangeEvent> {
    harness.caller.respond("vc-east", vms(vec![vm]));
    let result = harness.engine.run(Platform::Vmware, ResourceKind::Vm).await;
    let changes = harness
        .store
        .changes_for_run(result.run_id.unwrap())
        .await
        .unwrap();
    assert_eq!(result.changes_detected, changes.len());
    changes
}

async fn harness() -> Harness {
    let harness = Harness::new();
    harness.endpoint("vc-east", Platform::Vmware, ResourceKind::Vm).await;
    harness
}

#[tokio::test]
async fn power_and_cpu_changes_are_classified() {
    let harness = harness().await;
    let before = vmware_vm("vm-1", "web-01");
    assert!(pass(&harness, before.clone()).await.is_empty());

    let mut after = before;
    after["status"] = json!("off");
    after["cpu"]["total_vcpus"] = json!(4);
    let changes = pass(&harness, after).await;

    assert_eq!(
        summarize(&changes),
        vec![
            (
                ChangeCategory::PowerState,
                "power_state".to_string(),
                Some("on".to_string()),
                Some("off".to_string())
            ),
            (
                ChangeCategory::Cpu,
                "total_vcpus".to_string(),
                Some("2".to_string()),
                Some("4".to_string())
            ),
        ]
    );

    let vm = harness.store.load_vm(Platform::Vmware, "vm-1").await.unwrap().unwrap();
    let history = harness.store.changes_for_vm(vm.vm.id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|c| c.change.vm_id == vm.vm.id));
}

#[tokio::test]
async fn disk_resize_and_addition_are_reported() {
    let harness = harness().await;
    let mut vm = vmware_vm("vm-1", "web-01");
    vm["disks"] = json!([{"key": "d1", "label": "Hard disk 1", "size_gib": 10.0}]);
    pass(&harness, vm.clone()).await;

    vm["disks"] = json!([
        {"key": "d1", "label": "Hard disk 1", "size_gib": 20.0},
        {"key": "d2", "label": "Hard disk 2", "size_gib": 5.0}
    ]);
    let changes = pass(&harness, vm).await;

    let fields: Vec<&str> = changes.iter().map(|c| c.change.field_name.as_str()).collect();
    assert_eq!(fields.len(), 2);
    assert!(fields.contains(&"disk_size_changed"));
    assert!(fields.contains(&"disk_added"));
    assert!(changes.iter().all(|c| c.change.category == ChangeCategory::Disk));

    let resized = changes
        .iter()
        .find(|c| c.change.field_name == "disk_size_changed")
        .unwrap();
    assert_eq!(resized.change.old_value.as_deref(), Some("Hard disk 1: 10.0 GB"));
    assert_eq!(resized.change.new_value.as_deref(), Some("Hard disk 1: 20.0 GB"));

    // Disks are replaced wholesale
    let stored = harness.store.load_vm(Platform::Vmware, "vm-1").await.unwrap().unwrap();
    assert_eq!(stored.disks.len(), 2);
}

#[tokio::test]
async fn nic_swap_is_tracked_by_mac() {
    let harness = harness().await;
    let mut vm = vmware_vm("vm-1", "web-01");
    pass(&harness, vm.clone()).await;

    vm["nics"] = json!([{
        "label": "Network adapter 2",
        "mac_address": "00:50:56:AA:BB:CC",
        "network": "Backup Network",
        "ip_addresses": [{"ip": "10.0.0.5", "type": "IPv4"}]
    }]);
    let changes = pass(&harness, vm).await;

    let nic_changes: Vec<_> = changes
        .iter()
        .filter(|c| c.change.category == ChangeCategory::Nic)
        .collect();
    assert_eq!(nic_changes.len(), 2);
    assert!(nic_changes.iter().any(|c| c.change.field_name == "nic_added"
        && c.change.new_value.as_deref() == Some("Backup Network (00:50:56:AA:BB:CC)")));
    assert!(nic_changes.iter().any(|c| c.change.field_name == "nic_removed"));

    // Same address on the new NIC: no IP churn
    assert!(changes.iter().all(|c| c.change.category != ChangeCategory::Ip));
}

#[tokio::test]
async fn failed_endpoint_pass_keeps_committed_changes() {
    let harness = harness().await;
    harness.endpoint("vc-west", Platform::Vmware, ResourceKind::Vm).await;
    harness.caller.fail("vc-west", "connection reset");

    let vm = vmware_vm("vm-1", "web-01");
    pass(&harness, vm.clone()).await;

    let mut moved = vm;
    moved["host"] = json!("esx-02.lab");
    let changes = pass(&harness, moved).await;

    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].change.category, ChangeCategory::Host);
    assert_eq!(changes[0].change.new_value.as_deref(), Some("esx-02.lab"));
}
