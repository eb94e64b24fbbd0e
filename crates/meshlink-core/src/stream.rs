// ── Registry change streams ──
//
// Hosts that mirror the device registry (a UI, an exporter) follow it
// through these instead of polling.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::model::{Device, EntryId};

/// Immutable registry contents at one point in time.
pub type Snapshot<T> = Arc<Vec<Arc<T>>>;

/// Subscription to a registry's record set.
pub struct RegistryStream<T: Send + Sync + 'static> {
    seen: Snapshot<T>,
    receiver: watch::Receiver<Snapshot<T>>,
}

impl<T: Send + Sync + 'static> RegistryStream<T> {
    pub(crate) fn new(receiver: watch::Receiver<Snapshot<T>>) -> Self {
        let seen = receiver.borrow().clone();
        Self { seen, receiver }
    }

    /// Snapshot as of the last [`next_change`](Self::next_change), or of
    /// subscription.
    pub fn seen(&self) -> &Snapshot<T> {
        &self.seen
    }

    /// Current registry contents, without marking them seen.
    pub fn peek(&self) -> Snapshot<T> {
        self.receiver.borrow().clone()
    }

    /// Wait for the registry to change. `None` once the registry is gone.
    pub async fn next_change(&mut self) -> Option<Snapshot<T>> {
        self.receiver.changed().await.ok()?;
        self.seen = self.receiver.borrow_and_update().clone();
        Some(Arc::clone(&self.seen))
    }

    /// Every snapshot as a `Stream`, starting with the current one.
    pub fn into_stream(self) -> SnapshotStream<T> {
        SnapshotStream {
            inner: WatchStream::new(self.receiver),
        }
    }
}

impl RegistryStream<Device> {
    /// Devices of one entry in the last seen snapshot.
    pub fn devices_of(&self, entry_id: &EntryId) -> Vec<Arc<Device>> {
        self.seen
            .iter()
            .filter(|d| &d.config_entry_id == entry_id)
            .cloned()
            .collect()
    }
}

/// `Stream` of registry snapshots.
pub struct SnapshotStream<T: Send + Sync + 'static> {
    inner: WatchStream<Snapshot<T>>,
}

impl<T: Send + Sync + 'static> Stream for SnapshotStream<T> {
    type Item = Snapshot<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
