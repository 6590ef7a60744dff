//! In-memory radio and network used by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::{Arc, Mutex};

use airlink_core::{
    AccessPointSettings, DecodedPacket, RadioEvent, RadioMode, StationSettings,
};
use tokio::time::Instant;

use crate::net::{DatagramSocket, FeedStream, Network};
use crate::radio::{DriverError, EventHandler, RadioDriver};

/// Address handed out by `MockRadio` when a station connect succeeds.
pub const STATION_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);

pub fn packet(valid: bool) -> DecodedPacket {
    DecodedPacket::new(&[0x8d, 0x48, 0x40, 0xd6, 0x20, 0x2c, 0xc3], 4_800, 0x40, valid).unwrap()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    Succeed,
    Fail,
    Silent,
}

struct RadioState {
    handler: Option<Arc<dyn Fn(RadioEvent) + Send + Sync>>,
    calls: Vec<&'static str>,
    mode: Option<RadioMode>,
    outcome: ConnectOutcome,
    fail_op: Option<&'static str>,
    connects: usize,
    restarts: usize,
}

/// Scripted radio. Clones share state so a test can drive the copy owned by the manager.
#[derive(Clone)]
pub struct MockRadio {
    state: Arc<Mutex<RadioState>>,
}

impl MockRadio {
    pub fn new(outcome: ConnectOutcome) -> Self {
        Self {
            state: Arc::new(Mutex::new(RadioState {
                handler: None,
                calls: Vec::new(),
                mode: None,
                outcome,
                fail_op: None,
                connects: 0,
                restarts: 0,
            })),
        }
    }

    /// Make the named driver operation return an error.
    pub fn fail_on(&self, op: &'static str) {
        self.state.lock().unwrap().fail_op = Some(op);
    }

    pub fn clear_failure(&self) {
        self.state.lock().unwrap().fail_op = None;
    }

    pub fn set_outcome(&self, outcome: ConnectOutcome) {
        self.state.lock().unwrap().outcome = outcome;
    }

    pub fn emit(&self, event: RadioEvent) {
        let handler = self.state.lock().unwrap().handler.clone();
        if let Some(handler) = handler {
            handler(event);
        }
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn mode(&self) -> Option<RadioMode> {
        self.state.lock().unwrap().mode
    }

    pub fn connects(&self) -> usize {
        self.state.lock().unwrap().connects
    }

    pub fn restarts(&self) -> usize {
        self.state.lock().unwrap().restarts
    }

    fn call(&self, op: &'static str) -> Result<(), DriverError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(op);
        if state.fail_op == Some(op) {
            return Err(DriverError::new(op, "injected failure"));
        }
        Ok(())
    }
}

impl RadioDriver for MockRadio {
    fn register_handler(&self, handler: EventHandler) -> Result<(), DriverError> {
        self.call("register_handler")?;
        self.state.lock().unwrap().handler = Some(Arc::from(handler));
        Ok(())
    }

    fn set_hostname(&self, _hostname: &str) -> Result<(), DriverError> {
        self.call("set_hostname")
    }

    fn set_mode(&self, mode: RadioMode) -> Result<(), DriverError> {
        self.call("set_mode")?;
        self.state.lock().unwrap().mode = Some(mode);
        Ok(())
    }

    fn configure_access_point(&self, _settings: &AccessPointSettings) -> Result<(), DriverError> {
        self.call("configure_access_point")
    }

    fn configure_station(&self, _settings: &StationSettings) -> Result<(), DriverError> {
        self.call("configure_station")
    }

    fn start(&self) -> Result<(), DriverError> {
        self.call("start")?;
        if matches!(self.mode(), Some(RadioMode::Station | RadioMode::Both)) {
            self.emit(RadioEvent::StationStart);
        }
        Ok(())
    }

    fn stop(&self) -> Result<(), DriverError> {
        self.call("stop")
    }

    fn connect(&self) -> Result<(), DriverError> {
        self.call("connect")?;
        let outcome = {
            let mut state = self.state.lock().unwrap();
            state.connects += 1;
            state.outcome
        };
        match outcome {
            ConnectOutcome::Succeed => {
                self.emit(RadioEvent::StationConnected);
                self.emit(RadioEvent::StationGotIp { ip: STATION_IP });
            }
            ConnectOutcome::Fail => self.emit(RadioEvent::StationDisconnected { reason: 201 }),
            ConnectOutcome::Silent => {}
        }
        Ok(())
    }

    fn restart(&self) {
        let mut state = self.state.lock().unwrap();
        state.calls.push("restart");
        state.restarts += 1;
    }
}

#[derive(Default)]
struct NetState {
    hosts: HashMap<String, Ipv4Addr>,
    lookups: Vec<(String, Instant)>,
    connects: Vec<(SocketAddrV4, Instant)>,
    refuse_connect: bool,
    fail_sends: bool,
    frames: Vec<(SocketAddrV4, Vec<u8>)>,
    open_streams: usize,
    fail_bind: bool,
    udp_errors: HashMap<Ipv4Addr, VecDeque<io::ErrorKind>>,
    udp_attempts: HashMap<Ipv4Addr, usize>,
    datagrams: Vec<(SocketAddrV4, Vec<u8>)>,
}

/// Recording network stack. Clones share state.
#[derive(Clone, Default)]
pub struct MockNetwork {
    state: Arc<Mutex<NetState>>,
}

impl MockNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_host(&self, name: &str, ip: Ipv4Addr) {
        self.state.lock().unwrap().hosts.insert(name.to_string(), ip);
    }

    pub fn set_refuse_connect(&self, refuse: bool) {
        self.state.lock().unwrap().refuse_connect = refuse;
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.state.lock().unwrap().fail_sends = fail;
    }

    pub fn set_fail_bind(&self, fail: bool) {
        self.state.lock().unwrap().fail_bind = fail;
    }

    /// Queue errors returned by the next UDP sends to `ip`, one per attempt.
    pub fn script_udp_errors(&self, ip: Ipv4Addr, errors: &[io::ErrorKind]) {
        self.state
            .lock()
            .unwrap()
            .udp_errors
            .insert(ip, errors.iter().copied().collect());
    }

    pub fn lookups(&self) -> Vec<(String, Instant)> {
        self.state.lock().unwrap().lookups.clone()
    }

    pub fn connects(&self) -> Vec<(SocketAddrV4, Instant)> {
        self.state.lock().unwrap().connects.clone()
    }

    pub fn frames(&self) -> Vec<(SocketAddrV4, Vec<u8>)> {
        self.state.lock().unwrap().frames.clone()
    }

    pub fn open_streams(&self) -> usize {
        self.state.lock().unwrap().open_streams
    }

    pub fn udp_attempts(&self, ip: Ipv4Addr) -> usize {
        self.state
            .lock()
            .unwrap()
            .udp_attempts
            .get(&ip)
            .copied()
            .unwrap_or(0)
    }

    pub fn datagrams(&self) -> Vec<(SocketAddrV4, Vec<u8>)> {
        self.state.lock().unwrap().datagrams.clone()
    }
}

impl Network for MockNetwork {
    type Stream = MockStream;
    type Datagram = MockDatagram;

    async fn resolve_ipv4(&self, host: &str) -> io::Result<Ipv4Addr> {
        let mut state = self.state.lock().unwrap();
        state.lookups.push((host.to_string(), Instant::now()));
        state
            .hosts
            .get(host)
            .copied()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "unknown host"))
    }

    async fn connect(&self, addr: SocketAddrV4) -> io::Result<MockStream> {
        let mut state = self.state.lock().unwrap();
        state.connects.push((addr, Instant::now()));
        if state.refuse_connect {
            return Err(io::ErrorKind::ConnectionRefused.into());
        }
        state.open_streams += 1;
        Ok(MockStream {
            addr,
            state: self.state.clone(),
        })
    }

    async fn bind_udp(&self) -> io::Result<MockDatagram> {
        if self.state.lock().unwrap().fail_bind {
            return Err(io::ErrorKind::AddrInUse.into());
        }
        Ok(MockDatagram {
            state: self.state.clone(),
        })
    }
}

pub struct MockStream {
    addr: SocketAddrV4,
    state: Arc<Mutex<NetState>>,
}

impl FeedStream for MockStream {
    async fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_sends {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        state.frames.push((self.addr, frame.to_vec()));
        Ok(())
    }
}

impl Drop for MockStream {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.open_streams -= 1;
    }
}

pub struct MockDatagram {
    state: Arc<Mutex<NetState>>,
}

impl DatagramSocket for MockDatagram {
    async fn send_to(&self, payload: &[u8], dest: SocketAddrV4) -> io::Result<usize> {
        let mut state = self.state.lock().unwrap();
        *state.udp_attempts.entry(*dest.ip()).or_default() += 1;
        if let Some(kind) = state.udp_errors.get_mut(dest.ip()).and_then(|q| q.pop_front()) {
            return Err(kind.into());
        }
        state.datagrams.push((dest, payload.to_vec()));
        Ok(payload.len())
    }
}
