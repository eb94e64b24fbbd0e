//! Configuration for meshlink hosts.
//!
//! TOML entries plus `MESHLINK_` environment overrides, translated into
//! `meshlink_core::EntryConfig` and `SupervisorConfig`. The core never reads
//! files itself; hosts load a [`Config`] here and hand the result over.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use meshlink_api::AddonConfig;
use meshlink_core::{EntryConfig, RetryConfig, SupervisorConfig};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no entry named '{entry}' in the configuration")]
    UnknownEntry { entry: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level configuration file.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub defaults: Defaults,

    /// Controller entries by id.
    #[serde(default)]
    pub entries: HashMap<String, EntryProfile>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    /// Handshake timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,

    #[serde(default = "default_retry_initial")]
    pub retry_initial_delay_secs: u64,

    #[serde(default = "default_retry_max")]
    pub retry_max_delay_secs: u64,

    /// Give up after this many setup retries. Unset retries forever.
    #[serde(default)]
    pub max_retries: Option<u32>,

    #[serde(default = "default_event_capacity")]
    pub event_channel_capacity: usize,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
            retry_initial_delay_secs: default_retry_initial(),
            retry_max_delay_secs: default_retry_max(),
            max_retries: None,
            event_channel_capacity: default_event_capacity(),
        }
    }
}

fn default_connect_timeout() -> u64 {
    10
}
fn default_retry_initial() -> u64 {
    1
}
fn default_retry_max() -> u64 {
    80
}
fn default_event_capacity() -> usize {
    256
}

/// One controller entry.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct EntryProfile {
    /// Server websocket URL (e.g., "ws://localhost:3000").
    pub url: String,

    /// Manage the server through the add-on supervisor.
    #[serde(default)]
    pub use_addon: bool,

    /// Controller stick device path, required with `use_addon`.
    pub usb_path: Option<String>,

    /// Network key (plaintext; prefer `network_key_env`).
    pub network_key: Option<String>,

    /// Environment variable holding the network key.
    pub network_key_env: Option<String>,

    /// The add-on was installed for this entry and goes away with it.
    #[serde(default)]
    pub integration_created_addon: bool,

    /// Override `defaults.connect_timeout`.
    pub connect_timeout: Option<u64>,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("rs", "meshlink", "meshlink").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("meshlink");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the config from the canonical path plus environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load the config from `path` plus environment.
///
/// A missing file is not an error. Environment keys nest with `__`:
/// `MESHLINK_ENTRIES__MAIN__URL` overrides `entries.main.url`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("MESHLINK_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path`.
pub fn save_config(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Translation ─────────────────────────────────────────────────────

/// Resolve the network key: named env var first, then plaintext.
pub fn resolve_network_key(profile: &EntryProfile) -> Option<SecretString> {
    if let Some(ref env_name) = profile.network_key_env {
        if let Ok(val) = std::env::var(env_name) {
            return Some(SecretString::from(val));
        }
    }
    profile
        .network_key
        .as_ref()
        .filter(|k| !k.is_empty())
        .map(|k| SecretString::from(k.clone()))
}

/// Build the `EntryConfig` of the entry named `entry_id`.
pub fn resolve_entry(config: &Config, entry_id: &str) -> Result<EntryConfig, ConfigError> {
    let profile = config
        .entries
        .get(entry_id)
        .ok_or_else(|| ConfigError::UnknownEntry {
            entry: entry_id.into(),
        })?;

    let url: url::Url = profile.url.parse().map_err(|_| ConfigError::Validation {
        field: "url".into(),
        reason: format!("invalid URL: {}", profile.url),
    })?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(ConfigError::Validation {
            field: "url".into(),
            reason: format!("expected a ws:// or wss:// URL, got '{}'", profile.url),
        });
    }

    let mut entry = EntryConfig::new(entry_id, url);
    entry.connect_timeout = Duration::from_secs(
        profile
            .connect_timeout
            .unwrap_or(config.defaults.connect_timeout),
    );
    entry.integration_created_addon = profile.integration_created_addon;

    if profile.use_addon {
        let usb_path = profile
            .usb_path
            .clone()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ConfigError::Validation {
                field: "usb_path".into(),
                reason: "required when use_addon is set".into(),
            })?;
        let network_key = resolve_network_key(profile).ok_or_else(|| ConfigError::Validation {
            field: "network_key".into(),
            reason: "required when use_addon is set".into(),
        })?;
        entry.addon = Some(AddonConfig {
            usb_path,
            network_key,
        });
    } else if profile.integration_created_addon {
        return Err(ConfigError::Validation {
            field: "integration_created_addon".into(),
            reason: "only meaningful with use_addon".into(),
        });
    }

    Ok(entry)
}

/// Build the `EntryConfig` of every configured entry.
pub fn resolve_entries(config: &Config) -> Result<Vec<EntryConfig>, ConfigError> {
    let mut ids: Vec<&String> = config.entries.keys().collect();
    ids.sort();
    ids.into_iter().map(|id| resolve_entry(config, id)).collect()
}

/// Supervisor tuning from `defaults`.
pub fn supervisor_config(config: &Config) -> Result<SupervisorConfig, ConfigError> {
    let d = &config.defaults;
    if d.retry_initial_delay_secs == 0 || d.retry_initial_delay_secs > d.retry_max_delay_secs {
        return Err(ConfigError::Validation {
            field: "retry_initial_delay_secs".into(),
            reason: format!(
                "must be between 1 and retry_max_delay_secs ({})",
                d.retry_max_delay_secs
            ),
        });
    }
    if d.event_channel_capacity == 0 {
        return Err(ConfigError::Validation {
            field: "event_channel_capacity".into(),
            reason: "must be positive".into(),
        });
    }

    Ok(SupervisorConfig {
        retry: RetryConfig {
            initial_delay: Duration::from_secs(d.retry_initial_delay_secs),
            max_delay: Duration::from_secs(d.retry_max_delay_secs),
            max_retries: d.max_retries,
        },
        event_channel_capacity: d.event_channel_capacity,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use figment::Jail;
    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;

    const SAMPLE: &str = r#"
[defaults]
connect_timeout = 15

[entries.main]
url = "ws://localhost:3000"
use_addon = true
usb_path = "/dev/ttyACM0"
network_key = "0123456789abcdef0123456789abcdef"
integration_created_addon = true

[entries.remote]
url = "wss://zwave.example.net"
connect_timeout = 30
"#;

    fn parse(toml_str: &str) -> Config {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::string(toml_str))
            .extract()
            .unwrap()
    }

    #[test]
    fn missing_file_yields_defaults() {
        Jail::expect_with(|_jail| {
            let config = load_config_from(Path::new("absent.toml")).unwrap();
            assert!(config.entries.is_empty());
            assert_eq!(config.defaults.connect_timeout, 10);
            assert_eq!(config.defaults.retry_max_delay_secs, 80);
            Ok(())
        });
    }

    #[test]
    fn environment_overrides_the_file() {
        Jail::expect_with(|jail| {
            jail.create_file("meshlink.toml", SAMPLE)?;
            jail.set_env("MESHLINK_DEFAULTS__CONNECT_TIMEOUT", "5");
            jail.set_env("MESHLINK_ENTRIES__REMOTE__URL", "ws://10.0.0.2:3000");

            let config = load_config_from(Path::new("meshlink.toml")).unwrap();
            assert_eq!(config.defaults.connect_timeout, 5);
            assert_eq!(config.entries["remote"].url, "ws://10.0.0.2:3000");
            assert_eq!(config.entries["main"].usb_path.as_deref(), Some("/dev/ttyACM0"));
            Ok(())
        });
    }

    #[test]
    fn addon_entry_resolves() {
        let config = parse(SAMPLE);

        let entry = resolve_entry(&config, "main").unwrap();

        assert_eq!(entry.entry_id.as_str(), "main");
        assert_eq!(entry.connect_timeout, Duration::from_secs(15));
        assert!(entry.integration_created_addon);
        let addon = entry.addon.unwrap();
        assert_eq!(addon.usb_path, "/dev/ttyACM0");
        assert_eq!(
            addon.network_key.expose_secret(),
            "0123456789abcdef0123456789abcdef"
        );
    }

    #[test]
    fn plain_entry_uses_its_own_timeout() {
        let config = parse(SAMPLE);

        let entry = resolve_entry(&config, "remote").unwrap();

        assert_eq!(entry.url.as_str(), "wss://zwave.example.net/");
        assert_eq!(entry.connect_timeout, Duration::from_secs(30));
        assert!(entry.addon.is_none());
    }

    #[test]
    fn network_key_env_wins_over_plaintext() {
        Jail::expect_with(|jail| {
            jail.set_env("ZWAVE_KEY", "from-env");
            let profile = EntryProfile {
                network_key: Some("from-file".into()),
                network_key_env: Some("ZWAVE_KEY".into()),
                ..EntryProfile::default()
            };
            let key = resolve_network_key(&profile).unwrap();
            assert_eq!(key.expose_secret(), "from-env");
            Ok(())
        });
    }

    #[test]
    fn addon_entry_requires_usb_path_and_key() {
        let mut config = parse(SAMPLE);
        config.entries.get_mut("main").unwrap().usb_path = None;
        let err = resolve_entry(&config, "main").unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "usb_path"));

        let mut config = parse(SAMPLE);
        config.entries.get_mut("main").unwrap().network_key = None;
        let err = resolve_entry(&config, "main").unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "network_key"));
    }

    #[test]
    fn non_websocket_url_is_rejected() {
        let mut config = parse(SAMPLE);
        config.entries.get_mut("remote").unwrap().url = "http://zwave.example.net".into();

        let err = resolve_entry(&config, "remote").unwrap_err();

        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "url"));
    }

    #[test]
    fn created_addon_flag_needs_an_addon() {
        let mut config = parse(SAMPLE);
        config
            .entries
            .get_mut("remote")
            .unwrap()
            .integration_created_addon = true;

        assert!(resolve_entry(&config, "remote").is_err());
    }

    #[test]
    fn unknown_entry() {
        let err = resolve_entry(&Config::default(), "nope").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownEntry { ref entry } if entry == "nope"));
    }

    #[test]
    fn entries_resolve_in_id_order() {
        let entries = resolve_entries(&parse(SAMPLE)).unwrap();
        let ids: Vec<&str> = entries.iter().map(|e| e.entry_id.as_str()).collect();
        assert_eq!(ids, vec!["main", "remote"]);
    }

    #[test]
    fn supervisor_tuning_from_defaults() {
        let mut config = Config::default();
        config.defaults.max_retries = Some(5);

        let sup = supervisor_config(&config).unwrap();

        assert_eq!(sup.retry.initial_delay, Duration::from_secs(1));
        assert_eq!(sup.retry.max_delay, Duration::from_secs(80));
        assert_eq!(sup.retry.max_retries, Some(5));
        assert_eq!(sup.event_channel_capacity, 256);

        config.defaults.retry_initial_delay_secs = 100;
        assert!(supervisor_config(&config).is_err());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = parse(SAMPLE);
        config.defaults.max_retries = Some(3);

        save_config(&config, &path).unwrap();
        let loaded = load_config_from(&path).unwrap();

        assert_eq!(loaded.defaults.max_retries, Some(3));
        assert_eq!(loaded.entries.len(), 2);
        assert!(loaded.entries["main"].use_addon);
    }
}
