//! Contract Test: Store Failure During a Pass
//!
//! Constraints verified:
//! - A failed VM commit aborts the pass as FAILED with the store error
//! - VMs committed before the failure stay written
//! - Their change events are still recorded against the run
//! - An aborted pass retires nothing and counts only committed records
//!
//! If this test fails, a storage hiccup can soft-delete live VMs or lose
//! the history of the ones already written.

mod common;

use common::*;
use serde_json::json;
use std::sync::Arc;
use vmsync_core::model::{ChangeCategory, Platform, ResourceKind, RunStatus};
use vmsync_core::traits::EntityStore;
use vmsync_core::{EngineConfig, EngineEvent};

fn harness() -> (Harness, Arc<FailingEntityStore>) {
    let store = Arc::new(FailingEntityStore::new());
    let harness = Harness::with_store(
        Arc::clone(&store) as Arc<dyn EntityStore>,
        EngineConfig::default(),
    );
    (harness, store)
}

fn three_vms() -> Vec<serde_json::Value> {
    (1..=3)
        .map(|i| vmware_vm(&format!("vm-{}", i), &format!("web-{:02}", i)))
        .collect()
}

#[tokio::test]
async fn failed_commit_keeps_earlier_vms() {
    let (harness, store) = harness();
    harness.endpoint("vc-east", Platform::Vmware, ResourceKind::Vm).await;
    harness.caller.respond("vc-east", vms(three_vms()));
    store.fail_commit_on(3);

    let result = harness.engine.run(Platform::Vmware, ResourceKind::Vm).await;

    assert_eq!(result.status, RunStatus::Failed);
    assert!(result.error.as_deref().unwrap_or_default().contains("disk full"));
    assert_eq!(result.records_seen, 2);

    let stored = harness.store.list_vms(Platform::Vmware).await.unwrap();
    let mut uuids: Vec<&str> = stored.iter().map(|vm| vm.vm_uuid.as_str()).collect();
    uuids.sort();
    assert_eq!(uuids, vec!["vm-1", "vm-2"]);

    let run = harness
        .store
        .get_run(result.run_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.finished_at.is_some());
}

#[tokio::test]
async fn aborted_pass_retires_nothing_and_keeps_changes() {
    let (mut harness, store) = harness();
    harness.endpoint("vc-east", Platform::Vmware, ResourceKind::Vm).await;

    harness.caller.respond("vc-east", vms(three_vms()));
    let first = harness.engine.run(Platform::Vmware, ResourceKind::Vm).await;
    assert_eq!(first.status, RunStatus::Success);
    harness.drain_events();

    // vm-3 disappears and vm-1 powers off; the commit of vm-2 fails
    let mut powered_off = vmware_vm("vm-1", "web-01");
    powered_off["status"] = json!("off");
    harness
        .caller
        .respond("vc-east", vms(vec![powered_off, vmware_vm("vm-2", "web-02")]));
    store.fail_commit_on(2);

    let second = harness.engine.run(Platform::Vmware, ResourceKind::Vm).await;

    assert_eq!(second.status, RunStatus::Failed);
    assert_eq!(second.records_retired, 0);
    assert_eq!(second.records_seen, 1);
    assert_eq!(second.changes_detected, 1);

    let vms = harness.store.list_vms(Platform::Vmware).await.unwrap();
    assert_eq!(vms.len(), 3);
    assert!(vms.iter().all(|vm| !vm.is_deleted()));

    let vm1 = harness.store.load_vm(Platform::Vmware, "vm-1").await.unwrap().unwrap();
    assert_eq!(
        vm1.fact.unwrap().values.power_state.as_deref(),
        Some("off")
    );

    let changes = harness
        .store
        .changes_for_run(second.run_id.unwrap())
        .await
        .unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].change.vm_id, vm1.vm.id);
    assert_eq!(changes[0].change.category, ChangeCategory::PowerState);

    let events = harness.drain_events();
    assert!(!events.iter().any(|e| matches!(e, EngineEvent::VmsRetired { .. })));
}
