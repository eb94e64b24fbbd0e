//! Opaque client contract for a Z-Wave JS server connection.
//!
//! A transport owns the socket and the driver model rebuilt from the
//! server's state dump. Each `connect` → `listen` cycle produces a fresh
//! model: node snapshots from an earlier cycle must not be reused.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tokio::sync::oneshot;
//!
//! transport.connect().await?;
//! let mut events = transport.subscribe();
//! let (ready_tx, ready_rx) = oneshot::channel();
//! let t = Arc::clone(&transport);
//! tokio::spawn(async move { t.listen(ready_tx).await });
//!
//! ready_rx.await?;
//! for node in transport.nodes() {
//!     println!("{} ready={}", node.node_id, node.ready);
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, oneshot};

use crate::error::Error;
use crate::event::ControllerEvent;
use crate::model::{HomeId, Node, NodeId};

/// Client side of a controller server connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform the handshake. The caller bounds this with a timeout.
    ///
    /// Fails with [`Error::InvalidServerVersion`] when the server schema is
    /// incompatible, [`Error::Connect`] for any other failure.
    async fn connect(&self) -> Result<(), Error>;

    /// Run the receive loop until the connection closes.
    ///
    /// `driver_ready` is fired once the driver's initial state is fully
    /// loaded. Returns `Ok(())` on a clean close; cancellation happens by
    /// dropping the future.
    async fn listen(&self, driver_ready: oneshot::Sender<()>) -> Result<(), Error>;

    /// Close the connection. Idempotent.
    async fn disconnect(&self);

    /// Whether the socket is currently open.
    fn connected(&self) -> bool;

    /// Subscribe to controller events pushed during `listen`.
    ///
    /// A receiver that falls behind gets
    /// [`broadcast::error::RecvError::Lagged`] and should resynchronise
    /// from [`nodes`](Self::nodes).
    fn subscribe(&self) -> broadcast::Receiver<ControllerEvent>;

    /// Home id of the controller, once the driver state is loaded.
    fn home_id(&self) -> Option<HomeId>;

    /// Current node snapshots, once the driver state is loaded.
    fn nodes(&self) -> Vec<Arc<Node>>;

    /// Current snapshot of a single node.
    fn node(&self, node_id: NodeId) -> Option<Arc<Node>> {
        self.nodes().into_iter().find(|n| n.node_id == node_id)
    }
}
