// ── Runtime entry configuration ──
//
// These types describe *how* to run one controller entry. They carry
// connection tuning and add-on options, but never touch disk. The
// `meshlink-config` crate builds them from TOML and the environment.

use std::time::Duration;

use meshlink_api::AddonConfig;
use url::Url;

use crate::model::EntryId;

/// Default bound on the server handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration of a single controller entry.
#[derive(Debug, Clone)]
pub struct EntryConfig {
    pub entry_id: EntryId,
    /// Server websocket URL (e.g., `ws://localhost:3000`).
    pub url: Url,
    /// Bound on the initial handshake. Nothing else is timed out.
    pub connect_timeout: Duration,
    /// Options of the managed server add-on. `None` for an externally
    /// run server.
    pub addon: Option<AddonConfig>,
    /// The add-on was installed by this integration, so removing the entry
    /// also stops, snapshots and uninstalls it.
    pub integration_created_addon: bool,
}

impl EntryConfig {
    pub fn new(entry_id: impl Into<EntryId>, url: Url) -> Self {
        Self {
            entry_id: entry_id.into(),
            url,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            addon: None,
            integration_created_addon: false,
        }
    }

    pub fn uses_addon(&self) -> bool {
        self.addon.is_some()
    }
}

/// Exponential backoff for setup retries of entries that are not ready.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay before the first retry. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 80s.
    pub max_delay: Duration,

    /// Maximum retries before the entry is parked in an error state.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(80),
            max_retries: None,
        }
    }
}

/// Supervisor-wide tuning.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub retry: RetryConfig,
    /// Capacity of each event-bus broadcast channel.
    pub event_channel_capacity: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            event_channel_capacity: 256,
        }
    }
}

/// Delay before retry number `attempt` (0-based).
///
/// Doubles from `initial_delay` up to `max_delay`, spread by a
/// deterministic ±25% jitter seeded from the attempt number.
pub fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let exp = i32::try_from(attempt.min(30)).unwrap_or(30);
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(exp);
    let capped = base.min(config.max_delay.as_secs_f64());

    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
    let with_jitter = (capped * jitter_factor).max(0.0);

    Duration::from_secs_f64(with_jitter)
}
