#![allow(clippy::unwrap_used)]

mod common;

use std::sync::Arc;

use common::{FakeAddonManager, Log};
use meshlink_api::{AddonError, AddonInfo, AddonManager};
use meshlink_core::{AddonLifecycleGuard, AddonOperation, CoreError};
use pretty_assertions::assert_eq;
use tokio::sync::Notify;

fn info(installed: bool, running: bool) -> AddonInfo {
    AddonInfo {
        installed,
        running,
        version: Some("0.1.0".into()),
        update_available: false,
    }
}

fn guard_for(manager: &Arc<FakeAddonManager>) -> AddonLifecycleGuard {
    let manager: Arc<dyn AddonManager> = manager.clone();
    AddonLifecycleGuard::new(manager)
}

async fn idle(guard: &AddonLifecycleGuard) {
    common::eventually(|| guard.task_in_progress().is_none()).await;
}

#[tokio::test]
async fn running_addon_is_ready() {
    let log = Log::default();
    let manager = FakeAddonManager::new(log.clone(), info(true, true));
    let guard = guard_for(&manager);

    guard.ensure_running(&common::addon_config()).await.unwrap();

    assert!(log.lines().is_empty());
}

#[tokio::test]
async fn missing_addon_is_installed_in_the_background() {
    let log = Log::default();
    let manager = FakeAddonManager::new(log.clone(), info(false, false));
    let guard = guard_for(&manager);

    let err = guard.ensure_running(&common::addon_config()).await.unwrap_err();
    assert!(matches!(err, CoreError::NotReady { .. }));
    idle(&guard).await;

    assert_eq!(
        log.lines(),
        vec!["addon install", "addon set_options", "addon start"]
    );
    guard.ensure_running(&common::addon_config()).await.unwrap();
}

#[tokio::test]
async fn stopped_addon_is_started_in_the_background() {
    let log = Log::default();
    let manager = FakeAddonManager::new(log.clone(), info(true, false));
    let guard = guard_for(&manager);

    let err = guard.ensure_running(&common::addon_config()).await.unwrap_err();
    assert!(matches!(err, CoreError::NotReady { .. }));
    idle(&guard).await;

    assert_eq!(log.lines(), vec!["addon set_options", "addon start"]);
}

#[tokio::test]
async fn second_operation_fails_fast_while_one_is_in_flight() {
    let log = Log::default();
    let manager = FakeAddonManager::new(log.clone(), info(false, false));
    let gate = Arc::new(Notify::new());
    *manager.gate.lock().unwrap() = Some(Arc::clone(&gate));
    let guard = guard_for(&manager);

    let _ = guard.ensure_running(&common::addon_config()).await;
    assert_eq!(guard.task_in_progress(), Some(AddonOperation::Install));

    let again = guard.ensure_running(&common::addon_config()).await.unwrap_err();
    assert!(matches!(
        again,
        CoreError::OperationInProgress { ref running, .. } if running == "install"
    ));
    assert!(again.is_retryable());
    assert!(matches!(
        guard.stop().await.unwrap_err(),
        CoreError::OperationInProgress { .. }
    ));

    // Release install, then start.
    gate.notify_one();
    gate.notify_one();
    idle(&guard).await;
    assert_eq!(log.count("addon start"), 1);
    assert_eq!(log.count("addon stop"), 0);
}

#[tokio::test]
async fn info_failure_means_not_ready() {
    let manager = FakeAddonManager::new(Log::default(), info(true, true));
    *manager.info.lock().unwrap() = Err(AddonError::Info("supervisor unreachable".into()));
    let guard = guard_for(&manager);

    let err = guard.ensure_running(&common::addon_config()).await.unwrap_err();

    assert!(matches!(err, CoreError::NotReady { ref reason } if reason.contains("unreachable")));
}

#[tokio::test]
async fn background_failure_is_reported_once() {
    let log = Log::default();
    let manager = FakeAddonManager::new(log.clone(), info(true, false));
    manager.fail("start");
    let guard = guard_for(&manager);

    let _ = guard.ensure_running(&common::addon_config()).await;
    idle(&guard).await;

    let err = guard.ensure_running(&common::addon_config()).await.unwrap_err();
    assert!(matches!(err, CoreError::Addon(AddonError::Start(_))));
    assert!(!err.is_retryable());

    // The failure was consumed; the next call schedules a fresh start.
    let err = guard.ensure_running(&common::addon_config()).await.unwrap_err();
    assert!(matches!(err, CoreError::NotReady { .. }));
    idle(&guard).await;
    assert_eq!(log.count("addon start"), 2);
}

#[tokio::test]
async fn update_snapshots_before_updating() {
    let log = Log::default();
    let manager = FakeAddonManager::new(
        log.clone(),
        AddonInfo {
            update_available: true,
            ..info(true, true)
        },
    );
    let guard = guard_for(&manager);

    guard.ensure_updated().unwrap();
    idle(&guard).await;

    assert_eq!(
        log.lines(),
        vec!["addon snapshot", "addon update", "addon start"]
    );
}

#[tokio::test]
async fn update_without_new_version_only_restarts() {
    let log = Log::default();
    let manager = FakeAddonManager::new(log.clone(), info(true, true));
    let guard = guard_for(&manager);

    guard.schedule_update().unwrap();
    idle(&guard).await;

    assert_eq!(log.lines(), vec!["addon start"]);
}

#[tokio::test]
async fn failed_snapshot_skips_the_update() {
    let log = Log::default();
    let manager = FakeAddonManager::new(
        log.clone(),
        AddonInfo {
            update_available: true,
            ..info(true, true)
        },
    );
    manager.fail("snapshot");
    let guard = guard_for(&manager);

    guard.schedule_update().unwrap();
    idle(&guard).await;

    assert_eq!(log.count("addon update"), 0);
    let err = guard.ensure_running(&common::addon_config()).await.unwrap_err();
    assert!(matches!(err, CoreError::Addon(AddonError::Snapshot(_))));
}

#[tokio::test]
async fn foreground_operations_release_the_slot() {
    let log = Log::default();
    let manager = FakeAddonManager::new(log.clone(), info(true, true));
    manager.fail("stop");
    let guard = guard_for(&manager);

    assert!(guard.stop().await.is_err());
    assert_eq!(guard.task_in_progress(), None);
    guard.create_snapshot().await.unwrap();
    guard.uninstall().await.unwrap();

    assert_eq!(
        log.lines(),
        vec!["addon stop", "addon snapshot", "addon uninstall"]
    );
}

#[tokio::test]
async fn shutdown_aborts_background_work() {
    let log = Log::default();
    let manager = FakeAddonManager::new(log.clone(), info(false, false));
    *manager.gate.lock().unwrap() = Some(Arc::new(Notify::new()));
    let guard = guard_for(&manager);

    guard.schedule_install(common::addon_config()).unwrap();
    assert_eq!(guard.task_in_progress(), Some(AddonOperation::Install));

    guard.shutdown().await;

    assert_eq!(guard.task_in_progress(), None);
    assert_eq!(log.count("addon install"), 0);
}
