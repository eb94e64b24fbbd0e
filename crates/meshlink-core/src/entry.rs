// ── Entry runtime ──
//
// Setup, unload and removal of one controller entry. A runtime wraps a
// single session; reconnecting means building a new runtime.

use std::sync::Arc;

use meshlink_api::{ControllerEvent, HomeId};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EntryConfig;
use crate::coordinator::NodeReadinessCoordinator;
use crate::discovery::DiscoveryReconciler;
use crate::error::CoreError;
use crate::host::HostServices;
use crate::registry_sync::DeviceRegistrySync;
use crate::relay::NotificationRelay;
use crate::session::{ConnectionSession, SessionNotice};

// ── EntryContext ─────────────────────────────────────────────────

/// State shared by every component of one entry session.
pub struct EntryContext {
    pub config: EntryConfig,
    pub host: HostServices,
    pub session: Arc<ConnectionSession>,
}

impl EntryContext {
    /// Home id of the controller, once the driver state is loaded.
    pub fn home_id(&self) -> Result<HomeId, CoreError> {
        self.session
            .transport()
            .home_id()
            .ok_or(CoreError::DriverNotReady)
    }
}

// ── EntryRuntime ─────────────────────────────────────────────────

/// A loaded entry: one live session and the components bound to it.
pub struct EntryRuntime {
    ctx: Arc<EntryContext>,
    coordinator: Arc<NodeReadinessCoordinator>,
    reconciler: Arc<DiscoveryReconciler>,
    registry: Arc<DeviceRegistrySync>,
}

impl EntryRuntime {
    /// Bring an entry up: add-on, handshake, listen loop, platform start.
    ///
    /// Returns once the handshake succeeded. Waiting for the driver and
    /// processing nodes continue in session-owned tasks.
    pub async fn setup(
        host: HostServices,
        config: EntryConfig,
        session_id: u64,
        parent: &CancellationToken,
        notices: mpsc::UnboundedSender<SessionNotice>,
    ) -> Result<Self, CoreError> {
        let entry_id = config.entry_id.clone();

        if let (Some(guard), Some(addon)) = (host.addon_for(&config), config.addon.as_ref()) {
            guard.ensure_running(addon).await?;
        }

        let transport = host.transports.create(&config);
        let session = Arc::new(ConnectionSession::new(
            entry_id.clone(),
            session_id,
            config.url.as_str(),
            transport,
            parent,
            notices,
        ));

        if let Err(e) = session.connect(config.connect_timeout).await {
            if matches!(e, CoreError::ProtocolVersionMismatch { .. }) {
                if let Some(guard) = host.addon_for(&config) {
                    if let Err(update) = guard.ensure_updated() {
                        debug!(%entry_id, error = %update, "add-on update not scheduled");
                    }
                }
            }
            session.close().await;
            return Err(e);
        }

        let ctx = Arc::new(EntryContext {
            config,
            host,
            session: Arc::clone(&session),
        });
        let registry = Arc::new(DeviceRegistrySync::new(Arc::clone(&ctx)));
        let reconciler = Arc::new(DiscoveryReconciler::new(Arc::clone(&ctx)));
        let coordinator = Arc::new(NodeReadinessCoordinator::new(
            Arc::clone(&ctx),
            Arc::clone(&registry),
            Arc::clone(&reconciler),
        ));
        let relay = NotificationRelay::new(Arc::clone(&ctx));

        // Subscribe before listening so nothing pushed during the initial
        // state dump is missed.
        let events = session.transport().subscribe();
        let driver_ready = match session.start_listen() {
            Ok(rx) => rx,
            Err(e) => {
                session.shutdown().await;
                return Err(e);
            }
        };

        session.spawn(start_platforms(
            Arc::clone(&ctx),
            Arc::clone(&registry),
            Arc::clone(&coordinator),
            relay,
            driver_ready,
            events,
        ));

        info!(%entry_id, session_id, "entry set up");
        Ok(Self {
            ctx,
            coordinator,
            reconciler,
            registry,
        })
    }

    pub fn context(&self) -> &Arc<EntryContext> {
        &self.ctx
    }

    pub fn session(&self) -> &Arc<ConnectionSession> {
        &self.ctx.session
    }

    pub fn coordinator(&self) -> &Arc<NodeReadinessCoordinator> {
        &self.coordinator
    }

    pub fn reconciler(&self) -> &Arc<DiscoveryReconciler> {
        &self.reconciler
    }

    pub fn registry(&self) -> &Arc<DeviceRegistrySync> {
        &self.registry
    }

    /// Tear the entry down: cancel and join every session task, unload the
    /// platforms that were set up, release the transport, then stop the
    /// add-on when asked to.
    ///
    /// Safe to call again after a failure: only what is still up is torn
    /// down.
    pub async fn unload(&self, stop_addon: bool) -> Result<(), CoreError> {
        let entry_id = &self.ctx.config.entry_id;

        self.ctx.session.stop_tasks().await;
        let failed = self.reconciler.unload_platforms().await;
        self.ctx.session.close().await;

        if !failed.is_empty() {
            let platforms = failed
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            return Err(CoreError::PlatformUnload { platforms });
        }

        if stop_addon {
            Self::stop_addon(&self.ctx.host, &self.ctx.config).await?;
        }

        info!(%entry_id, "entry unloaded");
        Ok(())
    }

    /// Stop the managed add-on of an entry, if it has one.
    pub async fn stop_addon(host: &HostServices, config: &EntryConfig) -> Result<(), CoreError> {
        match host.addon_for(config) {
            Some(guard) => guard.stop().await,
            None => Ok(()),
        }
    }

    /// Clean up after an entry is deleted: an add-on the integration
    /// installed is stopped, snapshotted and uninstalled. The first failing
    /// step aborts the rest.
    pub async fn remove(host: &HostServices, config: &EntryConfig) -> Result<(), CoreError> {
        if !config.integration_created_addon {
            return Ok(());
        }
        let Some(guard) = host.addon_for(config) else {
            return Ok(());
        };

        guard.stop().await?;
        guard.create_snapshot().await?;
        guard.uninstall().await?;
        info!(entry_id = %config.entry_id, "add-on removed with its entry");
        Ok(())
    }
}

// ── Session tasks ────────────────────────────────────────────────

/// Wait for the driver, reconcile the device registry, then feed every
/// node and every controller event to the coordinator.
async fn start_platforms(
    ctx: Arc<EntryContext>,
    registry: Arc<DeviceRegistrySync>,
    coordinator: Arc<NodeReadinessCoordinator>,
    relay: NotificationRelay,
    driver_ready: oneshot::Receiver<()>,
    events: broadcast::Receiver<ControllerEvent>,
) {
    let entry_id = &ctx.config.entry_id;
    if driver_ready.await.is_err() {
        debug!(%entry_id, "listen loop ended before the driver was ready");
        return;
    }
    info!(%entry_id, "driver ready");

    let nodes = ctx.session.transport().nodes();
    match registry.remove_stale_devices(&nodes) {
        Ok(removed) if !removed.is_empty() => {
            info!(%entry_id, count = removed.len(), "removed stale devices");
        }
        Ok(_) => {}
        Err(e) => warn!(%entry_id, error = %e, "stale device cleanup failed"),
    }

    for node in nodes {
        coordinator.node_added(node);
    }

    pump_events(&ctx, &coordinator, &relay, events).await;
}

async fn pump_events(
    ctx: &EntryContext,
    coordinator: &Arc<NodeReadinessCoordinator>,
    relay: &NotificationRelay,
    mut events: broadcast::Receiver<ControllerEvent>,
) {
    let entry_id = &ctx.config.entry_id;
    loop {
        match events.recv().await {
            Ok(ControllerEvent::NodeAdded(node)) => coordinator.node_added(node),
            Ok(ControllerEvent::NodeReady(node)) => coordinator.node_ready_event(node),
            Ok(ControllerEvent::NodeRemoved(node)) => coordinator.node_removed(&node),
            Ok(ControllerEvent::ValueNotification(n)) => {
                if coordinator.is_ready(n.node_id) {
                    relay.relay_value_notification(&n);
                } else {
                    debug!(%entry_id, node_id = n.node_id, "value notification for node not ready");
                }
            }
            Ok(ControllerEvent::Notification(n)) => {
                if coordinator.is_ready(n.node_id()) {
                    relay.relay_notification(&n);
                } else {
                    debug!(%entry_id, node_id = n.node_id(), "notification for node not ready");
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(%entry_id, skipped, "controller events lagged, resyncing nodes");
                coordinator.resync();
            }
            Err(RecvError::Closed) => {
                debug!(%entry_id, "controller event stream closed");
                break;
            }
        }
    }
}
