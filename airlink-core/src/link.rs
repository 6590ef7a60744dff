//! Radio link model: connection state, mode selection, driver events and the station retry policy.

use std::fmt;
use std::net::Ipv4Addr;

use crate::client::MacAddr;

/// Station reconnect attempts allowed before the link is declared failed.
pub const STATION_MAX_RECONNECT_ATTEMPTS: u8 = 5;

/// Radio-level connection state. Exactly one value holds at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Uninitialized,
    Starting,
    Connecting,
    Connected,
    /// Reconnect attempt `n` of the current episode is in flight.
    Retrying(u8),
    Failed,
    AccessPointRunning,
}

impl ConnectionState {
    /// True for the two states the station initialisation waits for.
    pub fn is_station_terminal(&self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Failed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Uninitialized => f.write_str("uninitialized"),
            ConnectionState::Starting => f.write_str("starting"),
            ConnectionState::Connecting => f.write_str("connecting"),
            ConnectionState::Connected => f.write_str("connected"),
            ConnectionState::Retrying(n) => write!(f, "retrying ({n})"),
            ConnectionState::Failed => f.write_str("failed"),
            ConnectionState::AccessPointRunning => f.write_str("access point running"),
        }
    }
}

/// Radio operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioMode {
    Station,
    AccessPoint,
    Both,
}

impl RadioMode {
    /// Mode to program into the driver. With neither interface enabled the driver is
    /// still put in station mode before being stopped.
    pub fn select(access_point: bool, station: bool) -> RadioMode {
        match (access_point, station) {
            (true, true) => RadioMode::Both,
            (true, false) => RadioMode::AccessPoint,
            _ => RadioMode::Station,
        }
    }
}

/// Connectivity events raised by the radio driver / network stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioEvent {
    /// A station associated with our access point.
    ApClientConnected { mac: MacAddr, aid: u16 },
    /// Our access point's DHCP server leased an address to a station.
    ApClientIpAssigned { mac: MacAddr, ip: Ipv4Addr },
    ApClientDisconnected { mac: MacAddr, aid: u16 },
    StationStart,
    /// Link layer association with the external network.
    StationConnected,
    StationDisconnected { reason: u8 },
    StationGotIp { ip: Ipv4Addr },
    StationLostIp,
}

/// Outcome of a station disconnect under the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Reconnect; carries the attempt number (1-based).
    Retry(u8),
    /// Attempts exhausted. Returned once per episode.
    Exhausted,
    /// Already failed this episode; do nothing.
    GaveUp,
}

/// Bounded station reconnect counter. An episode starts with the first disconnect and
/// ends on a successful connection or a reset.
#[derive(Debug, Clone)]
pub struct StationRetry {
    attempts: u8,
    max_attempts: u8,
    exhausted: bool,
}

impl StationRetry {
    pub fn new(max_attempts: u8) -> Self {
        Self {
            attempts: 0,
            max_attempts,
            exhausted: false,
        }
    }

    pub fn on_disconnected(&mut self) -> RetryDecision {
        if self.exhausted {
            return RetryDecision::GaveUp;
        }
        if self.attempts < self.max_attempts {
            self.attempts += 1;
            RetryDecision::Retry(self.attempts)
        } else {
            self.exhausted = true;
            RetryDecision::Exhausted
        }
    }

    /// Called when the link comes up.
    pub fn on_connected(&mut self) {
        self.reset();
    }

    /// Force the episode to its terminal state (e.g. the driver refused to reconnect).
    /// Returns false if it was already terminal.
    pub fn abandon(&mut self) -> bool {
        !std::mem::replace(&mut self.exhausted, true)
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
        self.exhausted = false;
    }

    pub fn attempts(&self) -> u8 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u8 {
        self.max_attempts
    }
}

impl Default for StationRetry {
    fn default() -> Self {
        Self::new(STATION_MAX_RECONNECT_ATTEMPTS)
    }
}
