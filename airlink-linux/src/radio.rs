//! Radio driver seam and the host implementation.
//!
//! On a Linux host the interfaces are owned by the OS network manager, so `HostRadio`
//! only reports connectivity: station association is inferred from the routing table and
//! access-point clients come from configuration.

use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::Mutex;

use airlink_core::{
    redact_password, AccessPointSettings, MacAddr, RadioEvent, RadioMode, StationSettings,
    MAX_CLIENTS,
};
use serde::Deserialize;
use tracing::{debug, info, warn};

/// Callback the driver invokes for every connectivity event.
pub type EventHandler = Box<dyn Fn(RadioEvent) + Send + Sync>;

/// Exit status used when the daemon restarts itself; the service manager brings it back.
pub const RESTART_EXIT_CODE: i32 = 75;

/// Disconnect reason reported when no route to an upstream network exists.
const REASON_NO_AP_FOUND: u8 = 201;

/// Unroutable documentation address used to probe for a default route. Nothing is sent.
const ROUTE_PROBE: (Ipv4Addr, u16) = (Ipv4Addr::new(192, 0, 2, 1), 9);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{op} failed: {reason}")]
pub struct DriverError {
    pub op: &'static str,
    pub reason: String,
}

impl DriverError {
    pub fn new(op: &'static str, reason: impl Into<String>) -> Self {
        Self {
            op,
            reason: reason.into(),
        }
    }
}

/// Operations the link manager needs from the platform radio.
pub trait RadioDriver: Send + Sync + 'static {
    fn register_handler(&self, handler: EventHandler) -> Result<(), DriverError>;
    fn set_hostname(&self, hostname: &str) -> Result<(), DriverError>;
    fn set_mode(&self, mode: RadioMode) -> Result<(), DriverError>;
    fn configure_access_point(&self, settings: &AccessPointSettings) -> Result<(), DriverError>;
    fn configure_station(&self, settings: &StationSettings) -> Result<(), DriverError>;
    fn start(&self) -> Result<(), DriverError>;
    fn stop(&self) -> Result<(), DriverError>;
    /// Begin a station association. The outcome arrives as an event.
    fn connect(&self) -> Result<(), DriverError>;
    /// Restart the whole platform. Only returns if that was impossible.
    fn restart(&self);
}

/// Access-point client known to the host (e.g. a static DHCP lease).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StaticClient {
    pub mac: MacAddr,
    pub ip: Ipv4Addr,
}

#[derive(Default)]
struct HostState {
    handler: Option<EventHandler>,
    mode: Option<RadioMode>,
}

pub struct HostRadio {
    state: Mutex<HostState>,
    clients: Vec<StaticClient>,
}

impl HostRadio {
    pub fn new(clients: Vec<StaticClient>) -> Self {
        Self {
            state: Mutex::new(HostState::default()),
            clients,
        }
    }

    fn emit(&self, events: &[RadioEvent]) {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match &state.handler {
            Some(handler) => events.iter().for_each(|e| handler(*e)),
            None => warn!(count = events.len(), "radio event dropped, no handler registered"),
        }
    }

    fn mode(&self) -> Option<RadioMode> {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).mode
    }
}

fn local_route_address() -> std::io::Result<Ipv4Addr> {
    let probe = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    probe.connect(ROUTE_PROBE)?;
    match probe.local_addr()? {
        SocketAddr::V4(v4) if !v4.ip().is_unspecified() => Ok(*v4.ip()),
        other => Err(std::io::Error::new(
            std::io::ErrorKind::AddrNotAvailable,
            format!("no usable local address ({other})"),
        )),
    }
}

impl RadioDriver for HostRadio {
    fn register_handler(&self, handler: EventHandler) -> Result<(), DriverError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.handler = Some(handler);
        Ok(())
    }

    fn set_hostname(&self, hostname: &str) -> Result<(), DriverError> {
        if hostname.is_empty() {
            return Err(DriverError::new("set hostname", "empty hostname"));
        }
        debug!(hostname, "hostname recorded");
        Ok(())
    }

    fn set_mode(&self, mode: RadioMode) -> Result<(), DriverError> {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).mode = Some(mode);
        Ok(())
    }

    fn configure_access_point(&self, settings: &AccessPointSettings) -> Result<(), DriverError> {
        info!(
            ssid = %settings.ssid,
            password = %redact_password(&settings.password),
            channel = settings.channel,
            open = settings.password.is_empty(),
            max_clients = MAX_CLIENTS,
            static_clients = self.clients.len(),
            "access point configured"
        );
        Ok(())
    }

    fn configure_station(&self, settings: &StationSettings) -> Result<(), DriverError> {
        info!(
            ssid = %settings.ssid,
            password = %redact_password(&settings.password),
            "station configured"
        );
        Ok(())
    }

    fn start(&self) -> Result<(), DriverError> {
        let Some(mode) = self.mode() else {
            return Err(DriverError::new("start", "mode not set"));
        };
        if matches!(mode, RadioMode::AccessPoint | RadioMode::Both) {
            let events: Vec<RadioEvent> = self
                .clients
                .iter()
                .enumerate()
                .flat_map(|(i, c)| {
                    [
                        RadioEvent::ApClientConnected {
                            mac: c.mac,
                            aid: i as u16 + 1,
                        },
                        RadioEvent::ApClientIpAssigned {
                            mac: c.mac,
                            ip: c.ip,
                        },
                    ]
                })
                .collect();
            self.emit(&events);
        }
        if matches!(mode, RadioMode::Station | RadioMode::Both) {
            self.emit(&[RadioEvent::StationStart]);
        }
        Ok(())
    }

    fn stop(&self) -> Result<(), DriverError> {
        debug!("radio stopped");
        Ok(())
    }

    fn connect(&self) -> Result<(), DriverError> {
        if !matches!(self.mode(), Some(RadioMode::Station | RadioMode::Both)) {
            return Err(DriverError::new("connect", "station interface not enabled"));
        }
        match local_route_address() {
            Ok(ip) => self.emit(&[
                RadioEvent::StationConnected,
                RadioEvent::StationGotIp { ip },
            ]),
            Err(e) => {
                debug!(error = %e, "no upstream route");
                self.emit(&[RadioEvent::StationDisconnected {
                    reason: REASON_NO_AP_FOUND,
                }]);
            }
        }
        Ok(())
    }

    fn restart(&self) {
        warn!(code = RESTART_EXIT_CODE, "restarting");
        std::process::exit(RESTART_EXIT_CODE);
    }
}
