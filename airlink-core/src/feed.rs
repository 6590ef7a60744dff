//! Feed configuration, protocol dispatch and per-feed throughput counters.

use std::fmt;
use std::fmt::Write as _;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::packet::DecodedPacket;

/// Number of feed slots.
pub const MAX_FEEDS: usize = 10;

/// Length of the receiver identifier prepended to outgoing frames.
pub const RECEIVER_ID_LEN: usize = 8;

/// Feed configuration for every slot, index-addressed.
pub type FeedTable = [FeedConfig; MAX_FEEDS];

/// Reporting protocol spoken on a feed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    /// No reporting; the slot is skipped even if connected.
    #[default]
    None,
    /// Beast frames, only for packets that passed validity checks.
    Beast,
    /// Beast frames for every packet.
    BeastRaw,
}

impl Protocol {
    /// Whether `packet` should be framed and sent on a feed using this protocol.
    pub fn accepts(&self, packet: &DecodedPacket) -> bool {
        match self {
            Protocol::Beast => packet.is_valid(),
            Protocol::BeastRaw => true,
            Protocol::None => false,
        }
    }
}

/// Receiver identifier. Written as 16 hex digits in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ReceiverId(pub [u8; RECEIVER_ID_LEN]);

impl ReceiverId {
    pub fn as_bytes(&self) -> &[u8; RECEIVER_ID_LEN] {
        &self.0
    }
}

impl fmt::Display for ReceiverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid receiver id {0:?}: expected 16 hex digits")]
pub struct ReceiverIdParseError(String);

impl std::str::FromStr for ReceiverId {
    type Err = ReceiverIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits: String = s.chars().filter(|c| *c != '-' && *c != ':').collect();
        if digits.len() != RECEIVER_ID_LEN * 2 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ReceiverIdParseError(s.to_string()));
        }
        let mut out = [0u8; RECEIVER_ID_LEN];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&digits[i * 2..i * 2 + 2], 16)
                .map_err(|_| ReceiverIdParseError(s.to_string()))?;
        }
        Ok(ReceiverId(out))
    }
}

impl TryFrom<String> for ReceiverId {
    type Error = ReceiverIdParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ReceiverId> for String {
    fn from(id: ReceiverId) -> Self {
        id.to_string()
    }
}

/// One feed slot's configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FeedConfig {
    /// Hostname or dotted IPv4 literal.
    pub uri: String,
    pub port: u16,
    pub protocol: Protocol,
    pub receiver_id: ReceiverId,
    pub active: bool,
}

impl FeedConfig {
    pub fn host(&self) -> FeedHost<'_> {
        FeedHost::classify(&self.uri)
    }
}

/// How a feed URI is turned into an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedHost<'a> {
    Address(Ipv4Addr),
    /// Needs a DNS lookup.
    Hostname(&'a str),
    /// No letters, but not a dotted IPv4 literal either.
    Invalid(&'a str),
}

impl<'a> FeedHost<'a> {
    /// Any alphabetic character makes the URI a hostname.
    pub fn classify(uri: &'a str) -> Self {
        if uri.chars().any(|c| c.is_ascii_alphabetic()) {
            return FeedHost::Hostname(uri);
        }
        match uri.parse::<Ipv4Addr>() {
            Ok(ip) => FeedHost::Address(ip),
            Err(_) => FeedHost::Invalid(uri),
        }
    }
}

/// Messages sent per feed, rolled over by the host once per reporting interval.
#[derive(Debug, Clone, Default)]
pub struct FeedStats {
    counters: [u32; MAX_FEEDS],
    rates: [u32; MAX_FEEDS],
}

impl FeedStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&mut self, feed: usize) {
        if let Some(c) = self.counters.get_mut(feed) {
            *c = c.saturating_add(1);
        }
    }

    pub fn pending(&self, feed: usize) -> u32 {
        self.counters.get(feed).copied().unwrap_or(0)
    }

    /// Move the running counters into the published rates and zero them.
    pub fn roll(&mut self) -> [u32; MAX_FEEDS] {
        self.rates = std::mem::take(&mut self.counters);
        self.rates
    }

    pub fn rates(&self) -> &[u32; MAX_FEEDS] {
        &self.rates
    }

    /// `0:[12] 1:[0] ...` for the published rates.
    pub fn summary(&self) -> String {
        let mut out = String::with_capacity(MAX_FEEDS * 8);
        for (i, rate) in self.rates.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            let _ = write!(out, "{i}:[{rate}]");
        }
        out
    }
}
