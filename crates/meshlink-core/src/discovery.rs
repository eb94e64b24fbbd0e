// ── Discovery reconciler ──
//
// Turns a ready node into entity-discovered records. Platform setup runs
// once per session: the first descriptor of a platform starts it, every
// later one waits on the same setup instead of starting another.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use meshlink_api::Node;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::entry::EntryContext;
use crate::error::CoreError;
use crate::migrate::migrate_unique_id;
use crate::model::{DiscoveryDescriptor, EntityDiscovered, Platform};

/// The discovery rules rejected one of a node's values.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("Invalid value {value_id}: {reason}")]
    InvalidValue { value_id: String, reason: String },

    #[error("{0}")]
    Other(String),
}

/// Lazy mapping of a node's values to entity descriptors.
pub trait ValueDiscovery: Send + Sync {
    fn discover<'a>(
        &'a self,
        node: &'a Node,
    ) -> Box<dyn Iterator<Item = Result<DiscoveryDescriptor, DiscoveryError>> + Send + 'a>;
}

/// Progress of one platform's setup within a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupStatus {
    Pending,
    Done,
    Failed(String),
}

/// Per-session discovery driver.
pub struct DiscoveryReconciler {
    ctx: Arc<EntryContext>,
    platforms: Mutex<HashMap<Platform, watch::Receiver<SetupStatus>>>,
}

impl DiscoveryReconciler {
    pub fn new(ctx: Arc<EntryContext>) -> Self {
        Self {
            ctx,
            platforms: Mutex::new(HashMap::new()),
        }
    }

    /// Run one discovery pass over a ready node.
    ///
    /// Descriptors are handled in the order the rules produce them. A rule
    /// error aborts this node's pass only. Once `node_gone` is cancelled
    /// nothing more is announced. Returns the number of entities announced.
    pub async fn discover_node(
        &self,
        node: &Node,
        node_gone: &CancellationToken,
    ) -> Result<usize, CoreError> {
        let home_id = self.ctx.home_id()?;
        let entry_id = &self.ctx.config.entry_id;
        let mut announced = 0;

        for item in self.ctx.host.discovery.discover(node) {
            let descriptor = item.map_err(|e| CoreError::Discovery {
                node_id: node.node_id,
                message: e.to_string(),
            })?;

            if let Err(e) = migrate_unique_id(self.ctx.host.entities.as_ref(), home_id, &descriptor)
            {
                warn!(
                    %entry_id,
                    node_id = node.node_id,
                    error = %e,
                    "unique id migration failed"
                );
            }

            let platform = descriptor.platform;
            self.ensure_platform(platform).await?;
            if node_gone.is_cancelled() {
                debug!(%entry_id, node_id = node.node_id, announced, "node removed during discovery");
                return Ok(announced);
            }

            debug!(%entry_id, node_id = node.node_id, %platform, key = descriptor.key(), "entity discovered");
            self.ctx.host.bus.publish_discovered(EntityDiscovered {
                entry_id: entry_id.clone(),
                platform,
                descriptor: Arc::new(descriptor),
            });
            announced += 1;
        }

        debug!(%entry_id, node_id = node.node_id, announced, "discovery pass finished");
        Ok(announced)
    }

    /// Wait until `platform` is set up for this session, starting the setup
    /// if nobody has yet.
    pub async fn ensure_platform(&self, platform: Platform) -> Result<(), CoreError> {
        let mut status = {
            let mut platforms = self
                .platforms
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match platforms.get(&platform) {
                Some(rx) => rx.clone(),
                None => {
                    let (tx, rx) = watch::channel(SetupStatus::Pending);
                    platforms.insert(platform, rx.clone());
                    self.spawn_setup(platform, tx);
                    rx
                }
            }
        };

        let outcome = status
            .wait_for(|s| *s != SetupStatus::Pending)
            .await
            .map_err(|_| CoreError::Cancelled)?
            .clone();

        match outcome {
            SetupStatus::Done => Ok(()),
            SetupStatus::Failed(reason) => Err(CoreError::PlatformSetup { platform, reason }),
            SetupStatus::Pending => Err(CoreError::Internal(format!(
                "platform {platform} setup still pending"
            ))),
        }
    }

    /// Current setup status of a platform, if referenced this session.
    pub fn platform_status(&self, platform: Platform) -> Option<SetupStatus> {
        self.platforms
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&platform)
            .map(|rx| rx.borrow().clone())
    }

    /// Unload every platform whose setup completed. Pending setups are
    /// cancelled with the session, not here. Unloaded platforms are
    /// forgotten so a later call only retries the ones that failed, which
    /// are returned.
    pub async fn unload_platforms(&self) -> Vec<Platform> {
        let done: Vec<Platform> = {
            let platforms = self
                .platforms
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            platforms
                .iter()
                .filter(|(_, rx)| *rx.borrow() == SetupStatus::Done)
                .map(|(platform, _)| *platform)
                .collect()
        };

        let entry_id = &self.ctx.config.entry_id;
        let mut failed = Vec::new();
        for platform in done {
            match self.ctx.host.platforms.unload_platform(entry_id, platform).await {
                Ok(true) => {
                    debug!(%entry_id, %platform, "platform unloaded");
                    self.platforms
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .remove(&platform);
                }
                Ok(false) => {
                    warn!(%entry_id, %platform, "platform refused to unload");
                    failed.push(platform);
                }
                Err(e) => {
                    warn!(%entry_id, %platform, error = %e, "platform unload failed");
                    failed.push(platform);
                }
            }
        }
        failed
    }

    fn spawn_setup(&self, platform: Platform, tx: watch::Sender<SetupStatus>) {
        let platforms = Arc::clone(&self.ctx.host.platforms);
        let entry_id = self.ctx.config.entry_id.clone();
        self.ctx.session.spawn(async move {
            let status = match platforms.setup_platform(&entry_id, platform).await {
                Ok(()) => {
                    info!(%entry_id, %platform, "platform set up");
                    SetupStatus::Done
                }
                Err(e) => {
                    warn!(%entry_id, %platform, error = %e, "platform setup failed");
                    SetupStatus::Failed(e.to_string())
                }
            };
            tx.send_replace(status);
        });
    }
}
