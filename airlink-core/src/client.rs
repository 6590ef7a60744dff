//! Access-point client table: fixed capacity, slots are deactivated and reused, never removed.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Maximum number of stations that may associate with the access point.
pub const MAX_CLIENTS: usize = 6;

/// 48-bit hardware address.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

/// Error parsing a `aa:bb:cc:dd:ee:ff` hardware address.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid hardware address: {0:?}")]
pub struct MacAddrParseError(String);

impl FromStr for MacAddr {
    type Err = MacAddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut out = [0u8; 6];
        let mut parts = s.split(|c| c == ':' || c == '-');
        for byte in out.iter_mut() {
            let part = parts
                .next()
                .filter(|p| p.len() == 2 && p.bytes().all(|b| b.is_ascii_hexdigit()))
                .ok_or_else(|| MacAddrParseError(s.to_string()))?;
            *byte = u8::from_str_radix(part, 16).map_err(|_| MacAddrParseError(s.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(MacAddrParseError(s.to_string()));
        }
        Ok(MacAddr(out))
    }
}

impl TryFrom<String> for MacAddr {
    type Error = MacAddrParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<MacAddr> for String {
    fn from(mac: MacAddr) -> Self {
        mac.to_string()
    }
}

/// One slot of the client table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientRecord {
    pub mac: MacAddr,
    /// Filled once the access point's DHCP server leases an address to the station.
    pub ip: Option<Ipv4Addr>,
    pub active: bool,
}

/// Every slot is in use by an active client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("client table full")]
pub struct RegistryFull;

/// Bounded table of associated access-point clients.
#[derive(Debug, Clone, Default)]
pub struct ClientRegistry {
    slots: [ClientRecord; MAX_CLIENTS],
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `mac` as associated. Returns the slot index.
    ///
    /// An already active record is left untouched. Otherwise the slot last used by the
    /// same address is preferred, then the first inactive slot.
    pub fn activate(&mut self, mac: MacAddr) -> Result<usize, RegistryFull> {
        if let Some(i) = self.position(|r| r.active && r.mac == mac) {
            return Ok(i);
        }
        let slot = self
            .position(|r| !r.active && r.mac == mac)
            .or_else(|| self.position(|r| !r.active))
            .ok_or(RegistryFull)?;
        self.slots[slot] = ClientRecord {
            mac,
            ip: None,
            active: true,
        };
        Ok(slot)
    }

    /// Record the address leased to `mac`, activating it first if no association was seen.
    pub fn assign_ip(&mut self, mac: MacAddr, ip: Ipv4Addr) -> Result<usize, RegistryFull> {
        let slot = self.activate(mac)?;
        self.slots[slot].ip = Some(ip);
        Ok(slot)
    }

    /// Deactivate the record matching `mac`. Returns the slot index if one was active.
    pub fn deactivate(&mut self, mac: MacAddr) -> Option<usize> {
        let slot = self.position(|r| r.active && r.mac == mac)?;
        self.slots[slot].active = false;
        Some(slot)
    }

    pub fn active(&self) -> impl Iterator<Item = &ClientRecord> {
        self.slots.iter().filter(|r| r.active)
    }

    /// Addresses of active clients that have been leased an IP.
    pub fn addressable(&self) -> impl Iterator<Item = Ipv4Addr> + '_ {
        self.active().filter_map(|r| r.ip)
    }

    pub fn active_count(&self) -> usize {
        self.active().count()
    }

    pub fn slots(&self) -> &[ClientRecord; MAX_CLIENTS] {
        &self.slots
    }

    fn position(&self, pred: impl Fn(&ClientRecord) -> bool) -> Option<usize> {
        self.slots.iter().position(pred)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac(last: u8) -> MacAddr {
        MacAddr([0x02, 0, 0, 0, 0, last])
    }

    #[test]
    fn activate_and_deactivate() {
        let mut reg = ClientRegistry::new();
        assert_eq!(reg.activate(mac(1)), Ok(0));
        assert_eq!(reg.activate(mac(2)), Ok(1));
        assert_eq!(reg.active_count(), 2);
        assert_eq!(reg.deactivate(mac(1)), Some(0));
        assert_eq!(reg.active_count(), 1);
        assert_eq!(reg.deactivate(mac(1)), None);
    }

    #[test]
    fn repeated_association_keeps_slot_and_ip() {
        let mut reg = ClientRegistry::new();
        reg.assign_ip(mac(1), Ipv4Addr::new(192, 168, 4, 2)).unwrap();
        assert_eq!(reg.activate(mac(1)), Ok(0));
        assert_eq!(reg.slots()[0].ip, Some(Ipv4Addr::new(192, 168, 4, 2)));
        assert_eq!(reg.active_count(), 1);
    }

    #[test]
    fn inactive_slot_is_reused() {
        let mut reg = ClientRegistry::new();
        for i in 0..MAX_CLIENTS as u8 {
            reg.activate(mac(i)).unwrap();
        }
        assert_eq!(reg.activate(mac(100)), Err(RegistryFull));
        reg.deactivate(mac(3)).unwrap();
        assert_eq!(reg.activate(mac(100)), Ok(3));
        assert_eq!(reg.active_count(), MAX_CLIENTS);
    }

    #[test]
    fn returning_client_prefers_previous_slot() {
        let mut reg = ClientRegistry::new();
        reg.activate(mac(1)).unwrap();
        reg.activate(mac(2)).unwrap();
        reg.deactivate(mac(1)).unwrap();
        reg.deactivate(mac(2)).unwrap();
        assert_eq!(reg.activate(mac(2)), Ok(1));
        // The lease from the previous association is not trusted.
        assert_eq!(reg.slots()[1].ip, None);
    }

    #[test]
    fn addressable_skips_clients_without_lease() {
        let mut reg = ClientRegistry::new();
        reg.activate(mac(1)).unwrap();
        reg.assign_ip(mac(2), Ipv4Addr::new(192, 168, 4, 3)).unwrap();
        let ips: Vec<_> = reg.addressable().collect();
        assert_eq!(ips, vec![Ipv4Addr::new(192, 168, 4, 3)]);
    }

    #[test]
    fn mac_parse_and_display() {
        let m: MacAddr = "de:ad:be:ef:00:01".parse().unwrap();
        assert_eq!(m, MacAddr([0xde, 0xad, 0xbe, 0xef, 0x00, 0x01]));
        assert_eq!(m.to_string(), "de:ad:be:ef:00:01");
        assert!("de:ad:be:ef:00".parse::<MacAddr>().is_err());
        assert!("de:ad:be:ef:00:01:02".parse::<MacAddr>().is_err());
        assert!("zz:ad:be:ef:00:01".parse::<MacAddr>().is_err());
        assert!("+1:+2:+3:+4:+5:+6".parse::<MacAddr>().is_err());
    }
}
