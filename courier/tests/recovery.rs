//! Reachability recovery: failed items get a fresh start when the network
//! comes back.

use std::sync::Arc;
use std::time::Duration;

use courier::*;
use courier_testkit::{
    seed_photos, EventRecorder, InMemoryRecordStore, ScriptedTransport,
    StoreOp, ToggleProbe,
};

const WAIT: Duration = Duration::from_secs(600);

fn manager_with(
    store: &Arc<InMemoryRecordStore>,
    transport: &Arc<ScriptedTransport>,
    probe: &Arc<ToggleProbe>,
) -> QueueManager {
    QueueManagerBuilder::new(SyncConfig::default())
        .with_store(Arc::clone(store))
        .with_transport(Arc::clone(transport))
        .with_probe(Arc::clone(probe))
        .build()
        .expect("manager builds")
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_resets_failed_items_and_reprocesses() {
    let store = Arc::new(InMemoryRecordStore::new(ItemKind::Asset));
    let transport = Arc::new(ScriptedTransport::always_ok());
    let probe = Arc::new(ToggleProbe::offline());
    let manager = manager_with(&store, &transport, &probe);

    let ids = seed_photos(&*store, 2).await.unwrap();
    for id in &ids {
        store.force_state(*id, ItemStatus::Failed, 5);
    }

    let mut monitor = RecoveryMonitor::new(manager.clone());
    assert_eq!(monitor.check_once().await.unwrap(), ProbeOutcome::Offline);
    assert!(monitor.was_offline());

    probe.set_online(true);
    assert_eq!(
        monitor.check_once().await.unwrap(),
        ProbeOutcome::Recovered { reset: 2 }
    );
    assert!(!monitor.was_offline());
    for id in &ids {
        let item = store.item(*id);
        assert_eq!(item.status, ItemStatus::Pending);
        assert_eq!(item.retries, 0);
    }

    let outcome = manager.process_queue().await.unwrap();
    assert_eq!(outcome, PassOutcome::Drained { dispatched: 2 });
    manager.wait_for_idle().await;

    for id in ids {
        assert_eq!(transport.attempts_for(id), 1);
        assert_eq!(store.item(id).status, ItemStatus::Uploaded);
    }
}

#[tokio::test(start_paused = true)]
async fn test_steady_online_does_not_reset() {
    let store = Arc::new(InMemoryRecordStore::new(ItemKind::File));
    let transport = Arc::new(ScriptedTransport::always_ok());
    let probe = Arc::new(ToggleProbe::online());
    let manager = manager_with(&store, &transport, &probe);

    let ids = seed_photos(&*store, 1).await.unwrap();
    store.force_state(ids[0], ItemStatus::Failed, 5);

    let mut monitor = RecoveryMonitor::new(manager);
    assert_eq!(monitor.check_once().await.unwrap(), ProbeOutcome::Online);
    assert_eq!(monitor.check_once().await.unwrap(), ProbeOutcome::Online);

    assert_eq!(store.item(ids[0]).status, ItemStatus::Failed);
    assert_eq!(store.item(ids[0]).retries, 5);
}

#[tokio::test(start_paused = true)]
async fn test_probe_error_marks_offline_then_recovers() {
    let store = Arc::new(InMemoryRecordStore::new(ItemKind::Asset));
    let transport = Arc::new(ScriptedTransport::always_ok());
    let probe = Arc::new(ToggleProbe::online());
    let manager = manager_with(&store, &transport, &probe);

    let mut monitor = RecoveryMonitor::new(manager);
    probe.set_erroring(true);
    assert_eq!(monitor.check_once().await.unwrap(), ProbeOutcome::Offline);

    probe.set_erroring(false);
    assert_eq!(
        monitor.check_once().await.unwrap(),
        ProbeOutcome::Recovered { reset: 0 }
    );
}

#[tokio::test(start_paused = true)]
async fn test_failed_reset_is_retried_on_next_poll() {
    let store = Arc::new(InMemoryRecordStore::new(ItemKind::Asset));
    let transport = Arc::new(ScriptedTransport::always_ok());
    let probe = Arc::new(ToggleProbe::offline());
    let manager = manager_with(&store, &transport, &probe);

    let ids = seed_photos(&*store, 1).await.unwrap();
    store.force_state(ids[0], ItemStatus::Failed, 5);

    let mut monitor = RecoveryMonitor::new(manager);
    monitor.check_once().await.unwrap();
    probe.set_online(true);

    store.fail_on(StoreOp::ResetFailed);
    assert!(monitor.check_once().await.is_err());
    assert!(monitor.was_offline());

    store.clear_failures();
    assert_eq!(
        monitor.check_once().await.unwrap(),
        ProbeOutcome::Recovered { reset: 1 }
    );
}

#[tokio::test(start_paused = true)]
async fn test_background_monitor_uploads_after_reconnect() {
    let store = Arc::new(InMemoryRecordStore::new(ItemKind::Asset));
    let transport = Arc::new(ScriptedTransport::always_ok());
    let probe = Arc::new(ToggleProbe::offline());
    let manager = manager_with(&store, &transport, &probe);
    let recorder = EventRecorder::attach(&manager.events());

    let ids = seed_photos(&*store, 2).await.unwrap();
    store.force_state(ids[1], ItemStatus::Failed, 5);
    for id in &ids {
        manager.enqueue(*id).await.unwrap();
    }

    manager.spawn_recovery_monitor();
    tokio::time::sleep(Duration::from_secs(11)).await;
    assert!(probe.polls() >= 2);
    transport.assert_call_count_eq(0);

    probe.set_online(true);
    assert!(
        recorder
            .wait_for_count(EventKind::ItemUploaded, 2, WAIT)
            .await
    );

    manager.shutdown().await.unwrap();
    for id in ids {
        assert_eq!(store.item(id).status, ItemStatus::Uploaded);
    }
}
