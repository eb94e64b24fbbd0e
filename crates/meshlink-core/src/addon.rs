// ── Add-on lifecycle guard ──
//
// Serializes supervisor operations on the server add-on. One operation may
// be in flight at a time, foreground or background; a second request fails
// fast instead of queueing behind it.

use std::sync::{Arc, Mutex, PoisonError};

use meshlink_api::{AddonConfig, AddonError, AddonManager};
use strum::Display;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::error::CoreError;

/// A supervisor operation holding the in-flight slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum AddonOperation {
    Install,
    Start,
    Update,
    Stop,
    Snapshot,
    Uninstall,
}

type Slot = Arc<Mutex<Option<AddonOperation>>>;

/// Releases the in-flight slot when dropped, whatever the outcome.
struct SlotGuard {
    slot: Slot,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// Owner of every add-on lifecycle operation.
pub struct AddonLifecycleGuard {
    manager: Arc<dyn AddonManager>,
    slot: Slot,
    /// Failure of the last background operation, consumed by the next
    /// `ensure_running`.
    last_failure: Arc<Mutex<Option<AddonError>>>,
    tasks: TaskTracker,
    cancel: CancellationToken,
}

impl AddonLifecycleGuard {
    pub fn new(manager: Arc<dyn AddonManager>) -> Self {
        Self {
            manager,
            slot: Arc::new(Mutex::new(None)),
            last_failure: Arc::new(Mutex::new(None)),
            tasks: TaskTracker::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Operation currently holding the slot, if any.
    pub fn task_in_progress(&self) -> Option<AddonOperation> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn acquire(&self, requested: AddonOperation) -> Result<SlotGuard, CoreError> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(running) = *slot {
            return Err(CoreError::OperationInProgress {
                requested: requested.to_string(),
                running: running.to_string(),
            });
        }
        *slot = Some(requested);
        Ok(SlotGuard {
            slot: Arc::clone(&self.slot),
        })
    }

    // ── Setup path ───────────────────────────────────────────────────

    /// Make sure the add-on is installed and running.
    ///
    /// Returns `Ok` only if it already runs. Otherwise the missing steps are
    /// scheduled in the background and the caller gets
    /// [`CoreError::NotReady`] and must retry later.
    pub async fn ensure_running(&self, config: &AddonConfig) -> Result<(), CoreError> {
        if let Some(running) = self.task_in_progress() {
            return Err(CoreError::OperationInProgress {
                requested: "ensure_running".into(),
                running: running.to_string(),
            });
        }

        if let Some(err) = self.take_last_failure() {
            return Err(CoreError::Addon(err));
        }

        let info = match self.manager.addon_info().await {
            Ok(info) => info,
            Err(e) => {
                error!(error = %e, "failed to get the add-on info");
                return Err(CoreError::NotReady {
                    reason: e.to_string(),
                });
            }
        };

        if !info.installed {
            self.schedule_install(config.clone())?;
            return Err(CoreError::NotReady {
                reason: "add-on is being installed".into(),
            });
        }

        if !info.running {
            self.schedule_start(config.clone())?;
            return Err(CoreError::NotReady {
                reason: "add-on is being started".into(),
            });
        }

        Ok(())
    }

    /// Install, configure and start the add-on in the background.
    pub fn schedule_install(&self, config: AddonConfig) -> Result<(), CoreError> {
        let guard = self.acquire(AddonOperation::Install)?;
        let manager = Arc::clone(&self.manager);
        self.spawn_background(AddonOperation::Install, guard, async move {
            info!("installing the add-on");
            manager.install().await?;
            manager.set_options(&config).await?;
            manager.start().await
        });
        Ok(())
    }

    /// Configure and start an installed add-on in the background.
    pub fn schedule_start(&self, config: AddonConfig) -> Result<(), CoreError> {
        let guard = self.acquire(AddonOperation::Start)?;
        let manager = Arc::clone(&self.manager);
        self.spawn_background(AddonOperation::Start, guard, async move {
            info!("starting the add-on");
            manager.set_options(&config).await?;
            manager.start().await
        });
        Ok(())
    }

    /// Schedule an update after the server reported an incompatible schema.
    pub fn ensure_updated(&self) -> Result<(), CoreError> {
        self.schedule_update()
    }

    /// Update the add-on in the background when an update is available,
    /// snapshotting it first, then start it again.
    pub fn schedule_update(&self) -> Result<(), CoreError> {
        let guard = self.acquire(AddonOperation::Update)?;
        let manager = Arc::clone(&self.manager);
        self.spawn_background(AddonOperation::Update, guard, async move {
            let info = manager.addon_info().await?;
            if !info.installed {
                return Err(AddonError::Update("add-on is not installed".into()));
            }
            if info.update_available {
                info!(version = ?info.version, "updating the add-on");
                manager.create_snapshot().await?;
                manager.update().await?;
            } else {
                debug!("add-on already up to date");
            }
            manager.start().await
        });
        Ok(())
    }

    // ── Foreground operations ────────────────────────────────────────

    pub async fn stop(&self) -> Result<(), CoreError> {
        let _guard = self.acquire(AddonOperation::Stop)?;
        self.manager.stop().await.map_err(|e| {
            error!(error = %e, "failed to stop the add-on");
            CoreError::from(e)
        })
    }

    pub async fn create_snapshot(&self) -> Result<(), CoreError> {
        let _guard = self.acquire(AddonOperation::Snapshot)?;
        self.manager.create_snapshot().await.map_err(|e| {
            error!(error = %e, "failed to snapshot the add-on");
            CoreError::from(e)
        })
    }

    pub async fn uninstall(&self) -> Result<(), CoreError> {
        let _guard = self.acquire(AddonOperation::Uninstall)?;
        self.manager.uninstall().await.map_err(|e| {
            error!(error = %e, "failed to uninstall the add-on");
            CoreError::from(e)
        })
    }

    /// Abort background operations and wait for them to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        debug!("add-on guard shut down");
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn take_last_failure(&self) -> Option<AddonError> {
        self.last_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn spawn_background<F>(&self, op: AddonOperation, guard: SlotGuard, work: F)
    where
        F: Future<Output = Result<(), AddonError>> + Send + 'static,
    {
        let cancel = self.cancel.clone();
        let last_failure = Arc::clone(&self.last_failure);
        self.tasks.spawn(async move {
            let _guard = guard;
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    warn!(operation = %op, "add-on operation aborted");
                }
                result = work => match result {
                    Ok(()) => info!(operation = %op, "add-on operation finished"),
                    Err(e) => {
                        error!(operation = %op, error = %e, "add-on operation failed");
                        *last_failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(e);
                    }
                },
            }
        });
    }
}
