// ── Connection session ──
//
// One connect → listen cycle against a transport. A session never
// reconnects in place: when the listen loop ends on its own, the owner is
// notified and rebuilds the whole entry with a fresh session.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use meshlink_api::Transport;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use crate::error::CoreError;
use crate::model::EntryId;

// ── SessionState ─────────────────────────────────────────────────

/// Connection state observable by every component of the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Listening,
    Failed,
    ShuttingDown,
}

/// Out-of-band report from a session to whoever supervises its entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotice {
    /// The listen loop ended without a stop request. The session is
    /// invalid and the entry must be reloaded.
    ListenEnded {
        entry_id: EntryId,
        session_id: u64,
        reason: String,
    },
}

// ── ConnectionSession ────────────────────────────────────────────

/// Owner of the transport handle and of every task bound to it.
pub struct ConnectionSession {
    entry_id: EntryId,
    session_id: u64,
    url: String,
    transport: Arc<dyn Transport>,
    state: Arc<watch::Sender<SessionState>>,
    cancel: CancellationToken,
    tasks: TaskTracker,
    notices: mpsc::UnboundedSender<SessionNotice>,
    listen_started: AtomicBool,
}

impl ConnectionSession {
    /// Create a session. Cancelling `parent` stops it without a notice.
    pub fn new(
        entry_id: EntryId,
        session_id: u64,
        url: impl Into<String>,
        transport: Arc<dyn Transport>,
        parent: &CancellationToken,
        notices: mpsc::UnboundedSender<SessionNotice>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Disconnected);
        Self {
            entry_id,
            session_id,
            url: url.into(),
            transport,
            state: Arc::new(state),
            cancel: parent.child_token(),
            tasks: TaskTracker::new(),
            notices,
            listen_started: AtomicBool::new(false),
        }
    }

    pub fn entry_id(&self) -> &EntryId {
        &self.entry_id
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Token cancelled when the session stops.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    // ── Handshake ────────────────────────────────────────────────────

    /// Bounded-time handshake with the server.
    pub async fn connect(&self, timeout: Duration) -> Result<(), CoreError> {
        self.state.send_replace(SessionState::Connecting);
        debug!(entry_id = %self.entry_id, url = %self.url, "connecting");

        let result = match tokio::time::timeout(timeout, self.transport.connect()).await {
            Err(_) => Err(CoreError::ConnectTimeout {
                timeout_secs: timeout.as_secs(),
            }),
            Ok(Err(e)) if e.is_version_mismatch() => Err(CoreError::from(e)),
            Ok(Err(e)) => Err(CoreError::ConnectionFailed {
                url: self.url.clone(),
                reason: e.to_string(),
            }),
            Ok(Ok(())) => Ok(()),
        };

        if result.is_err() {
            self.state.send_replace(SessionState::Failed);
        } else {
            info!(entry_id = %self.entry_id, url = %self.url, "connected to server");
        }
        result
    }

    // ── Listen loop ──────────────────────────────────────────────────

    /// Spawn the listen loop. The returned receiver fires once the
    /// driver's initial state is loaded; it errors if the loop ends first.
    pub fn start_listen(&self) -> Result<oneshot::Receiver<()>, CoreError> {
        if self.listen_started.swap(true, Ordering::SeqCst) {
            return Err(CoreError::Internal("listen loop already started".into()));
        }

        let (ready_tx, ready_rx) = oneshot::channel();
        let transport = Arc::clone(&self.transport);
        let cancel = self.cancel.clone();
        let state = Arc::clone(&self.state);
        let notices = self.notices.clone();
        let entry_id = self.entry_id.clone();
        let session_id = self.session_id;

        self.state.send_replace(SessionState::Listening);
        self.tasks.spawn(async move {
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                result = transport.listen(ready_tx) => Some(result),
            };

            // A stop request racing the end of the loop wins.
            let Some(result) = result.filter(|_| !cancel.is_cancelled()) else {
                debug!(%entry_id, "listen loop stopped");
                return;
            };

            let reason = match result {
                Ok(()) => "connection closed by server".to_owned(),
                Err(e) => e.to_string(),
            };
            error!(%entry_id, %reason, "listen loop ended unexpectedly");
            state.send_replace(SessionState::Failed);
            let _ = notices.send(SessionNotice::ListenEnded {
                entry_id,
                session_id,
                reason,
            });
        });

        Ok(ready_rx)
    }

    // ── Task ownership ───────────────────────────────────────────────

    /// Run a task for the life of the session. It is dropped at its next
    /// await point once the session stops.
    pub fn spawn<F>(&self, fut: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let cancel = self.cancel.clone();
        self.tasks.spawn(async move {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {}
                () = fut => {}
            }
        })
    }

    /// Cancel every session task and wait until all of them are gone.
    pub async fn stop_tasks(&self) {
        self.state.send_replace(SessionState::ShuttingDown);
        self.cancel.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        debug!(entry_id = %self.entry_id, session_id = self.session_id, "session tasks stopped");
    }

    /// Release the transport. Must follow [`stop_tasks`](Self::stop_tasks).
    pub async fn close(&self) {
        if self.transport.connected() {
            self.transport.disconnect().await;
            info!(entry_id = %self.entry_id, "disconnected from server");
        }
        self.state.send_replace(SessionState::Disconnected);
    }

    /// Stop every task, then release the transport.
    pub async fn shutdown(&self) {
        self.stop_tasks().await;
        self.close().await;
    }
}
