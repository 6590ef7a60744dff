//! Persisted device settings: radio credentials and the feed table.

use serde::{Deserialize, Serialize};

use crate::feed::FeedTable;

pub const SSID_MAX_LEN: usize = 32;
pub const PASSWORD_MAX_LEN: usize = 64;
pub const DEFAULT_HOSTNAME: &str = "airlink";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AccessPointSettings {
    pub enabled: bool,
    pub ssid: String,
    /// Empty means an open network.
    pub password: String,
    pub channel: u8,
}

impl Default for AccessPointSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            ssid: DEFAULT_HOSTNAME.to_string(),
            password: String::new(),
            channel: 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StationSettings {
    pub enabled: bool,
    pub ssid: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub hostname: String,
    pub access_point: AccessPointSettings,
    pub station: StationSettings,
    pub feeds: FeedTable,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            hostname: DEFAULT_HOSTNAME.to_string(),
            access_point: AccessPointSettings::default(),
            station: StationSettings::default(),
            feeds: Default::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    #[error("{0} SSID longer than 32 bytes")]
    SsidTooLong(&'static str),
    #[error("{0} password longer than 64 bytes")]
    PasswordTooLong(&'static str),
    #[error("access point channel {0} out of range 1-13")]
    Channel(u8),
    #[error("feed {0} is active but has no uri or port")]
    IncompleteFeed(usize),
}

impl Settings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        let ap = &self.access_point;
        if ap.ssid.len() > SSID_MAX_LEN {
            return Err(SettingsError::SsidTooLong("access point"));
        }
        if ap.password.len() > PASSWORD_MAX_LEN {
            return Err(SettingsError::PasswordTooLong("access point"));
        }
        if !(1..=13).contains(&ap.channel) {
            return Err(SettingsError::Channel(ap.channel));
        }
        if self.station.ssid.len() > SSID_MAX_LEN {
            return Err(SettingsError::SsidTooLong("station"));
        }
        if self.station.password.len() > PASSWORD_MAX_LEN {
            return Err(SettingsError::PasswordTooLong("station"));
        }
        for (i, feed) in self.feeds.iter().enumerate() {
            if feed.active && (feed.uri.is_empty() || feed.port == 0) {
                return Err(SettingsError::IncompleteFeed(i));
            }
        }
        Ok(())
    }
}

/// Mask a password for logging, keeping only the first and last character.
pub fn redact_password(password: &str) -> String {
    let n = password.chars().count();
    if n <= 2 {
        return "*".repeat(n);
    }
    let mut chars = password.chars();
    let first = chars.next().unwrap_or('*');
    let last = chars.next_back().unwrap_or('*');
    format!("{first}{}{last}", "*".repeat(n - 2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{FeedConfig, Protocol, ReceiverId};

    #[test]
    fn redacts_middle() {
        assert_eq!(redact_password("hunter22"), "h******2");
        assert_eq!(redact_password("ab"), "**");
        assert_eq!(redact_password(""), "");
    }

    #[test]
    fn default_settings_are_valid() {
        assert_eq!(Settings::default().validate(), Ok(()));
    }

    #[test]
    fn rejects_active_feed_without_endpoint() {
        let mut s = Settings::default();
        s.feeds[2] = FeedConfig {
            uri: String::new(),
            port: 30004,
            protocol: Protocol::Beast,
            receiver_id: ReceiverId::default(),
            active: true,
        };
        assert_eq!(s.validate(), Err(SettingsError::IncompleteFeed(2)));
    }

    #[test]
    fn rejects_bad_channel_and_long_ssid() {
        let mut s = Settings::default();
        s.access_point.channel = 14;
        assert_eq!(s.validate(), Err(SettingsError::Channel(14)));
        s.access_point.channel = 6;
        s.station.ssid = "x".repeat(SSID_MAX_LEN + 1);
        assert_eq!(s.validate(), Err(SettingsError::SsidTooLong("station")));
    }

    #[test]
    fn bincode_roundtrip_preserves_feeds() {
        let mut s = Settings::default();
        s.feeds[0].uri = "feed.example.net".into();
        s.feeds[0].port = 30004;
        s.feeds[0].active = true;
        let bytes = bincode::serialize(&s).unwrap();
        let back: Settings = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, s);
    }
}
