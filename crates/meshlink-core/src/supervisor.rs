// ── Entry supervisor ──
//
// Registry of configured entries and owner of everything that outlives a
// single session: setup retries, reloads after a listen failure, unload,
// disable and removal.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex as StdMutex, PoisonError};

use arc_swap::{ArcSwap, ArcSwapOption};
use dashmap::DashMap;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::{EntryConfig, SupervisorConfig, calculate_backoff};
use crate::entry::EntryRuntime;
use crate::error::CoreError;
use crate::host::HostServices;
use crate::model::EntryId;
use crate::session::SessionNotice;

// ── EntryState ───────────────────────────────────────────────────

/// Load state of an entry, observable through [`EntrySupervisor::subscribe_state`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryState {
    NotLoaded,
    SetupInProgress,
    /// Setup failed for a transient reason; another attempt is scheduled.
    SetupRetry { attempt: u32, reason: String },
    Loaded,
    /// Setup failed for a reason retrying will not fix.
    SetupError { reason: String },
    Unloading,
    FailedUnload { reason: String },
}

// ── EntrySlot ────────────────────────────────────────────────────

struct EntrySlot {
    config: ArcSwap<EntryConfig>,
    state: watch::Sender<EntryState>,
    runtime: ArcSwapOption<EntryRuntime>,
    /// Serializes setup, unload and reload of this entry.
    op: Mutex<()>,
    retry: StdMutex<Option<JoinHandle<()>>>,
    /// Session whose listen-ended notice triggers a reload.
    session_id: AtomicU64,
    connect_failure_logged: AtomicBool,
    version_mismatch_logged: AtomicBool,
}

impl EntrySlot {
    fn new(config: EntryConfig) -> Self {
        let (state, _) = watch::channel(EntryState::NotLoaded);
        Self {
            config: ArcSwap::from_pointee(config),
            state,
            runtime: ArcSwapOption::empty(),
            op: Mutex::new(()),
            retry: StdMutex::new(None),
            session_id: AtomicU64::new(0),
            connect_failure_logged: AtomicBool::new(false),
            version_mismatch_logged: AtomicBool::new(false),
        }
    }

    fn entry_id(&self) -> EntryId {
        self.config.load().entry_id.clone()
    }

    fn set_state(&self, state: EntryState) {
        self.state.send_replace(state);
    }

    fn cancel_retry(&self) {
        let handle = self
            .retry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

// ── EntrySupervisor ──────────────────────────────────────────────

/// Owner of every configured entry.
///
/// Cheaply cloneable via `Arc<SupervisorInner>`. Call
/// [`start()`](Self::start) once to begin handling session notices.
#[derive(Clone)]
pub struct EntrySupervisor {
    inner: Arc<SupervisorInner>,
}

struct SupervisorInner {
    host: HostServices,
    config: SupervisorConfig,
    entries: DashMap<EntryId, Arc<EntrySlot>>,
    notice_tx: mpsc::UnboundedSender<SessionNotice>,
    notice_rx: StdMutex<Option<mpsc::UnboundedReceiver<SessionNotice>>>,
    cancel: CancellationToken,
    tasks: TaskTracker,
    next_session_id: AtomicU64,
}

impl EntrySupervisor {
    pub fn new(host: HostServices, config: SupervisorConfig) -> Self {
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(SupervisorInner {
                host,
                config,
                entries: DashMap::new(),
                notice_tx,
                notice_rx: StdMutex::new(Some(notice_rx)),
                cancel: CancellationToken::new(),
                tasks: TaskTracker::new(),
                next_session_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn host(&self) -> &HostServices {
        &self.inner.host
    }

    /// Spawn the notice loop. Later calls are no-ops.
    pub fn start(&self) {
        let rx = self
            .inner
            .notice_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(rx) = rx else {
            return;
        };
        let inner = Arc::clone(&self.inner);
        self.inner.tasks.spawn(notice_loop(inner, rx));
        debug!("entry supervisor started");
    }

    // ── Entry operations ─────────────────────────────────────────────

    /// Register (or re-configure) an entry and set it up.
    ///
    /// A transient failure leaves the entry in `SetupRetry` with a retry
    /// scheduled, and is still returned to the caller.
    pub async fn setup_entry(&self, config: EntryConfig) -> Result<(), CoreError> {
        let slot = {
            let entry = self
                .inner
                .entries
                .entry(config.entry_id.clone())
                .or_insert_with(|| Arc::new(EntrySlot::new(config.clone())));
            Arc::clone(entry.value())
        };
        slot.config.store(Arc::new(config));

        let _op = slot.op.lock().await;
        slot.cancel_retry();
        if slot.runtime.load().is_some() {
            if *slot.state.borrow() == EntryState::Loaded {
                debug!(entry_id = %slot.entry_id(), "entry already loaded");
                return Ok(());
            }
            // Left over from a failed unload.
            unload_runtime(&slot, false).await?;
        }
        setup_or_schedule(&self.inner, &slot).await
    }

    /// Unload an entry, keeping it registered.
    pub async fn unload_entry(&self, entry_id: &EntryId) -> Result<(), CoreError> {
        let slot = self.slot(entry_id)?;
        let _op = slot.op.lock().await;
        slot.cancel_retry();
        unload_runtime(&slot, false).await
    }

    /// Unload then set up again with a fresh session.
    pub async fn reload_entry(&self, entry_id: &EntryId) -> Result<(), CoreError> {
        let slot = self.slot(entry_id)?;
        reload_slot(&self.inner, &slot, None).await
    }

    /// Unload an entry the user disabled, stopping its add-on.
    pub async fn disable_entry(&self, entry_id: &EntryId) -> Result<(), CoreError> {
        let slot = self.slot(entry_id)?;
        let _op = slot.op.lock().await;
        slot.cancel_retry();
        unload_runtime(&slot, true).await
    }

    /// Unload and forget an entry, removing an add-on it installed.
    pub async fn remove_entry(&self, entry_id: &EntryId) -> Result<(), CoreError> {
        let slot = self.slot(entry_id)?;
        {
            let _op = slot.op.lock().await;
            slot.cancel_retry();
            if let Err(e) = unload_runtime(&slot, false).await {
                warn!(%entry_id, error = %e, "unload before removal failed");
            }
        }
        self.inner.entries.remove(entry_id);

        let config = slot.config.load_full();
        EntryRuntime::remove(&self.inner.host, &config).await
    }

    pub fn entry_state(&self, entry_id: &EntryId) -> Option<EntryState> {
        self.inner
            .entries
            .get(entry_id)
            .map(|slot| slot.state.borrow().clone())
    }

    pub fn subscribe_state(&self, entry_id: &EntryId) -> Option<watch::Receiver<EntryState>> {
        self.inner
            .entries
            .get(entry_id)
            .map(|slot| slot.state.subscribe())
    }

    /// Runtime of a loaded entry.
    pub fn runtime(&self, entry_id: &EntryId) -> Option<Arc<EntryRuntime>> {
        self.inner
            .entries
            .get(entry_id)
            .and_then(|slot| slot.runtime.load_full())
    }

    pub fn entry_ids(&self) -> Vec<EntryId> {
        self.inner.entries.iter().map(|e| e.key().clone()).collect()
    }

    /// Unload every entry and stop all background work.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();

        let slots: Vec<Arc<EntrySlot>> = self
            .inner
            .entries
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect();
        for slot in slots {
            // An attempt already running finishes under `op`; the loop
            // then sees the cancellation and exits.
            let _op = slot.op.lock().await;
            slot.cancel_retry();
            if let Err(e) = unload_runtime(&slot, false).await {
                warn!(entry_id = %slot.entry_id(), error = %e, "unload during shutdown failed");
            }
        }

        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        if let Some(addon) = &self.inner.host.addon {
            addon.shutdown().await;
        }
        info!("entry supervisor shut down");
    }

    fn slot(&self, entry_id: &EntryId) -> Result<Arc<EntrySlot>, CoreError> {
        self.inner
            .entries
            .get(entry_id)
            .map(|slot| Arc::clone(slot.value()))
            .ok_or_else(|| CoreError::EntryNotLoaded {
                entry_id: entry_id.to_string(),
            })
    }
}

// ── Setup / unload primitives ────────────────────────────────────
//
// Callers hold the slot's `op` lock.

/// One setup attempt. Never schedules a retry.
async fn try_setup(inner: &SupervisorInner, slot: &EntrySlot) -> Result<(), CoreError> {
    let config = slot.config.load_full();
    let entry_id = config.entry_id.clone();
    let session_id = inner.next_session_id.fetch_add(1, Ordering::Relaxed);

    slot.set_state(EntryState::SetupInProgress);
    slot.session_id.store(session_id, Ordering::SeqCst);

    match EntryRuntime::setup(
        inner.host.clone(),
        (*config).clone(),
        session_id,
        &inner.cancel,
        inner.notice_tx.clone(),
    )
    .await
    {
        Ok(runtime) => {
            slot.runtime.store(Some(Arc::new(runtime)));
            slot.connect_failure_logged.store(false, Ordering::Relaxed);
            slot.version_mismatch_logged.store(false, Ordering::Relaxed);
            slot.set_state(EntryState::Loaded);
            Ok(())
        }
        Err(e) => {
            log_setup_failure(slot, &entry_id, &e);
            if !e.is_retryable() {
                slot.set_state(EntryState::SetupError {
                    reason: e.to_string(),
                });
            }
            Err(e)
        }
    }
}

/// Set up, scheduling retries on a transient failure.
async fn setup_or_schedule(
    inner: &Arc<SupervisorInner>,
    slot: &Arc<EntrySlot>,
) -> Result<(), CoreError> {
    match try_setup(inner, slot).await {
        Ok(()) => Ok(()),
        Err(e) if e.is_retryable() => {
            schedule_retry(inner, slot, e.to_string());
            Err(e)
        }
        Err(e) => Err(e),
    }
}

/// Unload and set up again. With `failed_session`, only while that session
/// is still the loaded one: an unload, disable or removal that got `op`
/// first wins.
async fn reload_slot(
    inner: &Arc<SupervisorInner>,
    slot: &Arc<EntrySlot>,
    failed_session: Option<u64>,
) -> Result<(), CoreError> {
    let _op = slot.op.lock().await;
    if let Some(session_id) = failed_session {
        let current = slot.session_id.load(Ordering::SeqCst) == session_id
            && slot.runtime.load().is_some()
            && *slot.state.borrow() == EntryState::Loaded;
        if !current || inner.cancel.is_cancelled() {
            debug!(entry_id = %slot.entry_id(), session_id, "session no longer loaded, skipping reload");
            return Ok(());
        }
    }
    slot.cancel_retry();
    info!(entry_id = %slot.entry_id(), "reloading entry");
    unload_runtime(slot, false).await?;
    setup_or_schedule(inner, slot).await
}

/// Tear down the loaded runtime. It stays in the slot until the unload
/// fully succeeds, so a failed unload can be retried.
async fn unload_runtime(slot: &EntrySlot, stop_addon: bool) -> Result<(), CoreError> {
    let Some(runtime) = slot.runtime.load_full() else {
        slot.set_state(EntryState::NotLoaded);
        return Ok(());
    };

    slot.set_state(EntryState::Unloading);
    match runtime.unload(stop_addon).await {
        Ok(()) => {
            slot.runtime.store(None);
            slot.set_state(EntryState::NotLoaded);
            Ok(())
        }
        Err(e) => {
            warn!(entry_id = %slot.entry_id(), error = %e, "entry unload failed");
            slot.set_state(EntryState::FailedUnload {
                reason: e.to_string(),
            });
            Err(e)
        }
    }
}

fn log_setup_failure(slot: &EntrySlot, entry_id: &EntryId, err: &CoreError) {
    match err {
        CoreError::ProtocolVersionMismatch { .. } => {
            if slot.version_mismatch_logged.swap(true, Ordering::Relaxed) {
                debug!(%entry_id, error = %err, "server version still incompatible");
            } else {
                error!(%entry_id, error = %err, "invalid server version");
            }
        }
        e if e.is_connect_failure() => {
            if slot.connect_failure_logged.swap(true, Ordering::Relaxed) {
                debug!(%entry_id, error = %err, "server still unreachable");
            } else {
                error!(%entry_id, error = %err, "failed to connect");
            }
        }
        CoreError::NotReady { .. } | CoreError::OperationInProgress { .. } => {
            info!(%entry_id, reason = %err, "entry not ready yet");
        }
        _ => error!(%entry_id, error = %err, "entry setup failed"),
    }
}

// ── Background tasks ─────────────────────────────────────────────

fn schedule_retry(inner: &Arc<SupervisorInner>, slot: &Arc<EntrySlot>, reason: String) {
    slot.set_state(EntryState::SetupRetry {
        attempt: 1,
        reason: reason.clone(),
    });
    let handle = inner
        .tasks
        .spawn(retry_loop(Arc::clone(inner), Arc::clone(slot), reason));
    *slot.retry.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
}

/// Retry setup with exponential backoff until it succeeds, fails for good,
/// or the retry budget runs out.
async fn retry_loop(inner: Arc<SupervisorInner>, slot: Arc<EntrySlot>, mut reason: String) {
    let entry_id = slot.entry_id();
    let retry = &inner.config.retry;
    let mut attempt: u32 = 0;

    loop {
        if let Some(max) = retry.max_retries {
            if attempt >= max {
                error!(%entry_id, max_retries = max, "giving up on entry setup");
                slot.set_state(EntryState::SetupError {
                    reason: format!("gave up after {max} retries: {reason}"),
                });
                return;
            }
        }

        let delay = calculate_backoff(attempt, retry);
        attempt += 1;
        slot.set_state(EntryState::SetupRetry {
            attempt,
            reason: reason.clone(),
        });
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        debug!(%entry_id, attempt, delay_ms, "retrying entry setup");

        tokio::select! {
            biased;
            () = inner.cancel.cancelled() => return,
            () = tokio::time::sleep(delay) => {}
        }

        let _op = slot.op.lock().await;
        if inner.cancel.is_cancelled() {
            return;
        }
        match try_setup(&inner, &slot).await {
            Ok(()) => {
                info!(%entry_id, attempt, "entry set up after retry");
                return;
            }
            Err(e) if e.is_retryable() => reason = e.to_string(),
            Err(_) => return,
        }
    }
}

/// Turn every listen-ended notice of a current session into one reload.
async fn notice_loop(inner: Arc<SupervisorInner>, mut rx: mpsc::UnboundedReceiver<SessionNotice>) {
    loop {
        let notice = tokio::select! {
            biased;
            () = inner.cancel.cancelled() => break,
            notice = rx.recv() => notice,
        };
        let Some(SessionNotice::ListenEnded {
            entry_id,
            session_id,
            reason,
        }) = notice
        else {
            break;
        };

        let Some(slot) = inner.entries.get(&entry_id).map(|s| Arc::clone(s.value())) else {
            debug!(%entry_id, "notice for unknown entry");
            continue;
        };
        if slot.session_id.load(Ordering::SeqCst) != session_id {
            debug!(%entry_id, session_id, "notice from a stale session");
            continue;
        }

        warn!(%entry_id, %reason, "connection lost, reloading entry");
        let task_inner = Arc::clone(&inner);
        inner.tasks.spawn(async move {
            if let Err(e) = reload_slot(&task_inner, &slot, Some(session_id)).await {
                debug!(entry_id = %slot.entry_id(), error = %e, "reload did not complete");
            }
        });
    }
    debug!("notice loop exiting");
}
