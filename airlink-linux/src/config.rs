//! Load config from file and environment.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use airlink_core::settings::DEFAULT_HOSTNAME;
use airlink_core::{
    AccessPointSettings, FeedConfig, FeedTable, Settings, SettingsError, StationSettings,
    MAX_FEEDS,
};
use serde::Deserialize;

use crate::broadcaster::BroadcastPolicy;
use crate::forwarder::ForwarderTuning;
use crate::radio::StaticClient;
use crate::wifi::ManagerOptions;

/// Daemon configuration. File: `--config <path>`, else ~/.config/airlink/config.toml or
/// /etc/airlink/config.toml.
/// Env overrides: AIRLINK_HOSTNAME, AIRLINK_STA_SSID, AIRLINK_STA_PASSWORD,
/// AIRLINK_AP_SSID, AIRLINK_AP_PASSWORD.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_hostname")]
    pub hostname: String,
    #[serde(default)]
    pub access_point: AccessPointSettings,
    #[serde(default)]
    pub station: StationSettings,
    /// Feed slots in index order; at most `MAX_FEEDS`.
    #[serde(default)]
    pub feeds: Vec<FeedConfig>,
    /// Access point clients the host radio reports as associated.
    #[serde(default)]
    pub clients: Vec<StaticClient>,
    #[serde(default)]
    pub forwarder: ForwarderSection,
    #[serde(default)]
    pub broadcast: BroadcastSection,
    #[serde(default)]
    pub ingest: IngestSection,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ForwarderSection {
    /// Decoded packet queue depth (default 100).
    #[serde(default = "default_packet_queue_depth")]
    pub packet_queue_depth: usize,
    /// Minimum spacing of connection attempts per feed (default 5000).
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
    #[serde(default = "default_stats_interval_ms")]
    pub stats_interval_ms: u64,
    #[serde(default = "default_receive_timeout_ms")]
    pub receive_timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BroadcastSection {
    /// Access point message queue depth (default 20).
    #[serde(default = "default_message_queue_depth")]
    pub message_queue_depth: usize,
    /// Send attempts per client and message (default 3).
    #[serde(default = "default_attempts")]
    pub attempts: u8,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Retry sends that fail with ENOMEM (default true).
    #[serde(default = "default_true")]
    pub retry_on_out_of_memory: bool,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IngestSection {
    /// Read AVR lines from stdin (default true).
    #[serde(default = "default_true")]
    pub stdin: bool,
    /// UDP port AVR lines are relayed to on access point clients; 0 disables.
    #[serde(default = "default_broadcast_port")]
    pub broadcast_port: u16,
}

fn default_hostname() -> String {
    DEFAULT_HOSTNAME.to_string()
}
fn default_packet_queue_depth() -> usize {
    100
}
fn default_reconnect_interval_ms() -> u64 {
    5000
}
fn default_stats_interval_ms() -> u64 {
    1000
}
fn default_receive_timeout_ms() -> u64 {
    100
}
fn default_message_queue_depth() -> usize {
    20
}
fn default_attempts() -> u8 {
    3
}
fn default_retry_delay_ms() -> u64 {
    100
}
fn default_true() -> bool {
    true
}
fn default_broadcast_port() -> u16 {
    30002
}

impl Default for ForwarderSection {
    fn default() -> Self {
        Self {
            packet_queue_depth: default_packet_queue_depth(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            stats_interval_ms: default_stats_interval_ms(),
            receive_timeout_ms: default_receive_timeout_ms(),
        }
    }
}

impl Default for BroadcastSection {
    fn default() -> Self {
        Self {
            message_queue_depth: default_message_queue_depth(),
            attempts: default_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            retry_on_out_of_memory: true,
        }
    }
}

impl Default for IngestSection {
    fn default() -> Self {
        Self {
            stdin: true,
            broadcast_port: default_broadcast_port(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
            access_point: AccessPointSettings::default(),
            station: StationSettings::default(),
            feeds: Vec::new(),
            clients: Vec::new(),
            forwarder: ForwarderSection::default(),
            broadcast: BroadcastSection::default(),
            ingest: IngestSection::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Read { path: String, source: io::Error },
    #[error("parsing {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("{0} feeds configured, at most 10 supported")]
    TooManyFeeds(usize),
    #[error(transparent)]
    Settings(#[from] SettingsError),
}

impl Config {
    /// Apply environment-style overrides from `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("AIRLINK_HOSTNAME") {
            self.hostname = v;
        }
        if let Some(v) = lookup("AIRLINK_STA_SSID") {
            self.station.ssid = v;
        }
        if let Some(v) = lookup("AIRLINK_STA_PASSWORD") {
            self.station.password = v;
        }
        if let Some(v) = lookup("AIRLINK_AP_SSID") {
            self.access_point.ssid = v;
        }
        if let Some(v) = lookup("AIRLINK_AP_PASSWORD") {
            self.access_point.password = v;
        }
    }

    pub fn feed_table(&self) -> Result<FeedTable, ConfigError> {
        if self.feeds.len() > MAX_FEEDS {
            return Err(ConfigError::TooManyFeeds(self.feeds.len()));
        }
        let mut table = FeedTable::default();
        for (slot, feed) in table.iter_mut().zip(&self.feeds) {
            *slot = feed.clone();
        }
        Ok(table)
    }

    /// Validated device settings.
    pub fn settings(&self) -> Result<Settings, ConfigError> {
        let settings = Settings {
            hostname: self.hostname.clone(),
            access_point: self.access_point.clone(),
            station: self.station.clone(),
            feeds: self.feed_table()?,
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn manager_options(&self) -> ManagerOptions {
        let f = &self.forwarder;
        let b = &self.broadcast;
        ManagerOptions {
            packet_queue_depth: f.packet_queue_depth,
            message_queue_depth: b.message_queue_depth,
            forwarder: ForwarderTuning {
                reconnect_interval: Duration::from_millis(f.reconnect_interval_ms),
                stats_interval: Duration::from_millis(f.stats_interval_ms),
                receive_timeout: Duration::from_millis(f.receive_timeout_ms.max(1)),
            },
            broadcast: BroadcastPolicy {
                attempts: b.attempts.max(1),
                retry_delay: Duration::from_millis(b.retry_delay_ms),
                retry_on: b
                    .retry_on_out_of_memory
                    .then_some(io::ErrorKind::OutOfMemory),
            },
            ..ManagerOptions::default()
        }
    }
}

/// The explicit path if given, else the first default location that exists.
pub fn locate(explicit: Option<PathBuf>) -> Option<PathBuf> {
    explicit.or_else(|| config_paths().into_iter().find(|p| p.exists()))
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/airlink/config.toml"));
    }
    out.push(PathBuf::from("/etc/airlink/config.toml"));
    out
}

/// Load config: defaults, then the file at `path` (if any), then env vars.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let mut c = match path {
        Some(p) => parse_file(p)?,
        None => Config::default(),
    };
    c.apply_overrides(|name| std::env::var(name).ok());
    Ok(c)
}

fn parse_file(path: &Path) -> Result<Config, ConfigError> {
    let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    toml::from_str(&s).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use airlink_core::{Protocol, ReceiverId};
    use std::collections::HashMap;

    #[test]
    fn empty_file_gives_defaults() {
        let c: Config = toml::from_str("").unwrap();
        assert_eq!(c.hostname, "airlink");
        assert_eq!(c.forwarder.packet_queue_depth, 100);
        assert_eq!(c.forwarder.reconnect_interval_ms, 5000);
        assert_eq!(c.broadcast.message_queue_depth, 20);
        assert_eq!(c.broadcast.attempts, 3);
        assert!(c.ingest.stdin);
        assert!(c.settings().is_ok());
    }

    #[test]
    fn parses_feeds_and_clients() {
        let c: Config = toml::from_str(
            r#"
            hostname = "rx-1"

            [station]
            enabled = true
            ssid = "hangar"
            password = "secret"

            [[feeds]]
            uri = "feed.example.net"
            port = 30004
            protocol = "beast"
            receiver_id = "0011223344556677"
            active = true

            [[feeds]]
            uri = "192.168.1.20"
            port = 30005
            protocol = "beast_raw"

            [[clients]]
            mac = "02:00:00:00:00:01"
            ip = "192.168.4.2"
            "#,
        )
        .unwrap();
        let settings = c.settings().unwrap();
        assert!(settings.station.enabled);
        assert_eq!(settings.feeds[0].protocol, Protocol::Beast);
        assert_eq!(
            settings.feeds[0].receiver_id,
            "0011223344556677".parse::<ReceiverId>().unwrap()
        );
        assert!(settings.feeds[0].active);
        assert_eq!(settings.feeds[1].protocol, Protocol::BeastRaw);
        assert!(!settings.feeds[1].active);
        assert!(!settings.feeds[2].active);
        assert_eq!(c.clients.len(), 1);
    }

    #[test]
    fn rejects_unknown_fields() {
        assert!(toml::from_str::<Config>("proxy_port = 3128").is_err());
        assert!(toml::from_str::<Config>("[[feeds]]\nurl = \"x\"").is_err());
    }

    #[test]
    fn too_many_feeds() {
        let mut c = Config::default();
        c.feeds = vec![FeedConfig::default(); MAX_FEEDS + 1];
        assert!(matches!(c.settings(), Err(ConfigError::TooManyFeeds(11))));
    }

    #[test]
    fn invalid_settings_rejected() {
        let c: Config = toml::from_str("[access_point]\nchannel = 14").unwrap();
        assert!(matches!(
            c.settings(),
            Err(ConfigError::Settings(SettingsError::Channel(14)))
        ));
    }

    #[test]
    fn overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("AIRLINK_HOSTNAME", "rx-9"),
            ("AIRLINK_STA_SSID", "field"),
            ("AIRLINK_AP_PASSWORD", "letmein1"),
        ]
        .into_iter()
        .collect();
        let mut c = Config::default();
        c.apply_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(c.hostname, "rx-9");
        assert_eq!(c.station.ssid, "field");
        assert_eq!(c.access_point.password, "letmein1");
        assert_eq!(c.access_point.ssid, "airlink");
    }

    #[test]
    fn runtime_options_follow_config() {
        let c: Config = toml::from_str(
            "[forwarder]\nreconnect_interval_ms = 2000\n[broadcast]\nattempts = 0\nretry_on_out_of_memory = false",
        )
        .unwrap();
        let o = c.manager_options();
        assert_eq!(o.forwarder.reconnect_interval, Duration::from_secs(2));
        assert_eq!(o.broadcast.attempts, 1);
        assert_eq!(o.broadcast.retry_on, None);
        assert_eq!(o.packet_queue_depth, 100);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let err = load(Some(Path::new("/nonexistent/airlink.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn shipped_sample_is_valid() {
        let c: Config = toml::from_str(include_str!("../misc/config.toml")).unwrap();
        c.settings().unwrap();
    }
}
