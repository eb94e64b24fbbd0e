// ── Node readiness coordinator ──
//
// Per-node state machine: pending (added, interview running) → ready →
// removed. Discovery runs exactly once, on the pending → ready edge. Ready
// signals may arrive any number of times and from any task.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use meshlink_api::{Node, NodeId};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::discovery::DiscoveryReconciler;
use crate::entry::EntryContext;
use crate::error::CoreError;
use crate::registry_sync::DeviceRegistrySync;

/// Lifecycle position of one node within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeReadiness {
    Pending,
    Ready,
    Removed,
}

enum AddedAction {
    Ignore,
    Process,
    SignalReady,
    Wait,
}

pub struct NodeReadinessCoordinator {
    ctx: Arc<EntryContext>,
    registry: Arc<DeviceRegistrySync>,
    reconciler: Arc<DiscoveryReconciler>,
    nodes: Mutex<HashMap<NodeId, NodeReadiness>>,
    /// One-shot ready waiters of pending nodes.
    waiters: Mutex<HashMap<NodeId, oneshot::Sender<Arc<Node>>>>,
    /// Cancelled when the node is removed; stops its discovery pass.
    passes: Mutex<HashMap<NodeId, CancellationToken>>,
}

impl NodeReadinessCoordinator {
    pub fn new(
        ctx: Arc<EntryContext>,
        registry: Arc<DeviceRegistrySync>,
        reconciler: Arc<DiscoveryReconciler>,
    ) -> Self {
        Self {
            ctx,
            registry,
            reconciler,
            nodes: Mutex::new(HashMap::new()),
            waiters: Mutex::new(HashMap::new()),
            passes: Mutex::new(HashMap::new()),
        }
    }

    pub fn readiness(&self, node_id: NodeId) -> Option<NodeReadiness> {
        self.lock_nodes().get(&node_id).copied()
    }

    pub fn is_ready(&self, node_id: NodeId) -> bool {
        self.readiness(node_id) == Some(NodeReadiness::Ready)
    }

    /// Number of pending nodes still waiting for their interview.
    pub fn pending_waiters(&self) -> usize {
        self.lock_waiters().len()
    }

    // ── Topology events ──────────────────────────────────────────────

    /// A node was reported, either from the initial state or live.
    pub fn node_added(self: &Arc<Self>, node: Arc<Node>) {
        let node_id = node.node_id;
        let action = {
            let mut nodes = self.lock_nodes();
            match nodes.get(&node_id).copied() {
                Some(NodeReadiness::Ready) => AddedAction::Ignore,
                Some(NodeReadiness::Pending) if node.ready => AddedAction::SignalReady,
                Some(NodeReadiness::Pending) => AddedAction::Ignore,
                None | Some(NodeReadiness::Removed) => {
                    nodes.insert(node_id, NodeReadiness::Pending);
                    if node.ready {
                        AddedAction::Process
                    } else {
                        AddedAction::Wait
                    }
                }
            }
        };

        match action {
            AddedAction::Ignore => debug!(node_id, "node already tracked"),
            AddedAction::Process => self.spawn_ready(node),
            AddedAction::SignalReady => self.node_ready_event(node),
            AddedAction::Wait => {
                debug!(node_id, "node not ready, waiting for interview");
                self.spawn_waiter(node_id);
                if let Err(e) = self.registry.register_node(&node) {
                    warn!(node_id, error = %e, "failed to register pending node");
                }
            }
        }
    }

    /// The controller reported a node as ready.
    pub fn node_ready_event(self: &Arc<Self>, node: Arc<Node>) {
        let waiter = self.lock_waiters().remove(&node.node_id);
        match waiter {
            Some(tx) => {
                if let Err(node) = tx.send(node) {
                    self.spawn_ready(node);
                }
            }
            None => self.spawn_ready(node),
        }
    }

    /// Handle the pending → ready edge.
    ///
    /// Registers the device, then runs discovery. Returns `Ok(false)` when
    /// the node was already processed or has been removed.
    pub async fn node_ready(&self, node: Arc<Node>) -> Result<bool, CoreError> {
        let node_id = node.node_id;
        let Some(node_gone) = self.mark_ready(node_id) else {
            debug!(node_id, "ready signal ignored");
            return Ok(false);
        };

        info!(entry_id = %self.ctx.config.entry_id, node_id, "node ready");

        self.registry.register_node(&node)?;
        self.reconciler.discover_node(&node, &node_gone).await?;
        Ok(true)
    }

    /// A node left the network.
    pub fn node_removed(&self, node: &Node) {
        let node_id = node.node_id;
        self.lock_nodes().insert(node_id, NodeReadiness::Removed);
        // Dropping the sender ends the waiter task.
        self.lock_waiters().remove(&node_id);
        if let Some(pass) = self.lock_passes().remove(&node_id) {
            pass.cancel();
        }

        match self.registry.remove_node(node_id) {
            Ok(true) => debug!(node_id, "node removed"),
            Ok(false) => debug!(node_id, "removed node had no device"),
            Err(e) => warn!(node_id, error = %e, "failed to remove node device"),
        }
    }

    /// Re-offer every live node after missed events, and drop nodes that
    /// vanished meanwhile.
    pub fn resync(self: &Arc<Self>) {
        let live = self.ctx.session.transport().nodes();
        let tracked: Vec<NodeId> = self
            .lock_nodes()
            .iter()
            .filter(|(_, r)| **r != NodeReadiness::Removed)
            .map(|(id, _)| *id)
            .collect();

        for node_id in tracked {
            if !live.iter().any(|n| n.node_id == node_id) {
                self.node_removed(&Node {
                    node_id,
                    ..Node::default()
                });
            }
        }
        for node in live {
            self.node_added(node);
        }
    }

    // ── Private helpers ──────────────────────────────────────────────

    /// Move a node to `Ready` and open its discovery pass. `None` if it
    /// already was ready, or is gone.
    fn mark_ready(&self, node_id: NodeId) -> Option<CancellationToken> {
        let mut nodes = self.lock_nodes();
        match nodes.get(&node_id).copied() {
            Some(NodeReadiness::Ready | NodeReadiness::Removed) => None,
            Some(NodeReadiness::Pending) | None => {
                nodes.insert(node_id, NodeReadiness::Ready);
                let node_gone = self.ctx.session.cancel_token().child_token();
                self.lock_passes().insert(node_id, node_gone.clone());
                Some(node_gone)
            }
        }
    }

    fn spawn_ready(self: &Arc<Self>, node: Arc<Node>) {
        let this = Arc::clone(self);
        self.ctx.session.spawn(async move {
            let node_id = node.node_id;
            if let Err(e) = this.node_ready(node).await {
                warn!(node_id, error = %e, "node setup failed");
            }
        });
    }

    fn spawn_waiter(self: &Arc<Self>, node_id: NodeId) {
        let (tx, rx) = oneshot::channel();
        self.lock_waiters().insert(node_id, tx);

        let this = Arc::clone(self);
        self.ctx.session.spawn(async move {
            match rx.await {
                Ok(node) => {
                    if let Err(e) = this.node_ready(node).await {
                        warn!(node_id, error = %e, "node setup failed");
                    }
                }
                Err(_) => debug!(node_id, "ready waiter dropped"),
            }
        });
    }

    fn lock_nodes(&self) -> std::sync::MutexGuard<'_, HashMap<NodeId, NodeReadiness>> {
        self.nodes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_passes(&self) -> std::sync::MutexGuard<'_, HashMap<NodeId, CancellationToken>> {
        self.passes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_waiters(&self) -> std::sync::MutexGuard<'_, HashMap<NodeId, oneshot::Sender<Arc<Node>>>> {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
