//! Radio link manager: brings up the access point and/or station, tracks link state from
//! driver events, and owns the fan-out and forwarder tasks.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};

use airlink_core::{
    redact_password, ClientRegistry, ConnectionState, DecodedPacket, FeedTable, NetworkMessage,
    RadioEvent, RadioMode, RetryDecision, Settings, StationRetry, MAX_FEEDS,
};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::broadcaster::{self, BroadcastPolicy};
use crate::forwarder::{Forwarder, ForwarderContext, ForwarderTuning};
use crate::net::Network;
use crate::queue::{DropQueue, QueueError};
use crate::radio::{DriverError, RadioDriver};

#[derive(Debug, thiserror::Error)]
pub enum WifiError {
    #[error("radio driver: {0}")]
    Driver(#[from] DriverError),
    #[error("station could not connect to {ssid:?}")]
    StationFailed { ssid: String },
    #[error("radio event channel closed")]
    EventsClosed,
    #[error("restart did not take effect")]
    RestartFailed,
}

impl WifiError {
    /// Everything except a failed station association leaves the radio unusable.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, WifiError::StationFailed { .. })
    }
}

/// Queue depths and task tuning.
#[derive(Debug, Clone, Copy)]
pub struct ManagerOptions {
    pub packet_queue_depth: usize,
    pub message_queue_depth: usize,
    pub station_max_retries: u8,
    pub forwarder: ForwarderTuning,
    pub broadcast: BroadcastPolicy,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            packet_queue_depth: 100,
            message_queue_depth: 20,
            station_max_retries: airlink_core::STATION_MAX_RECONNECT_ATTEMPTS,
            forwarder: ForwarderTuning::default(),
            broadcast: BroadcastPolicy::default(),
        }
    }
}

pub struct WifiManager<R: RadioDriver, N: Network> {
    radio: R,
    network: Arc<N>,
    settings: Settings,
    options: ManagerOptions,
    state: watch::Sender<ConnectionState>,
    has_ip: watch::Sender<bool>,
    retry: StdMutex<StationRetry>,
    station_failures: AtomicU32,
    clients: Arc<Mutex<ClientRegistry>>,
    packets: Arc<DropQueue<DecodedPacket>>,
    messages: Arc<DropQueue<NetworkMessage>>,
    feeds: watch::Sender<FeedTable>,
    rates: Arc<watch::Sender<[u32; MAX_FEEDS]>>,
    station_running: Arc<AtomicBool>,
    access_point_running: Arc<AtomicBool>,
    initialized: AtomicBool,
    events: StdMutex<Option<JoinHandle<()>>>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl<R: RadioDriver, N: Network> WifiManager<R, N> {
    pub fn new(radio: R, network: Arc<N>, settings: Settings, options: ManagerOptions) -> Self {
        let feeds = settings.feeds.clone();
        Self {
            radio,
            network,
            settings,
            options,
            state: watch::Sender::new(ConnectionState::Uninitialized),
            has_ip: watch::Sender::new(false),
            retry: StdMutex::new(StationRetry::new(options.station_max_retries)),
            station_failures: AtomicU32::new(0),
            clients: Arc::new(Mutex::new(ClientRegistry::new())),
            packets: Arc::new(DropQueue::new(options.packet_queue_depth)),
            messages: Arc::new(DropQueue::new(options.message_queue_depth)),
            feeds: watch::Sender::new(feeds),
            rates: Arc::new(watch::Sender::new([0; MAX_FEEDS])),
            station_running: Arc::new(AtomicBool::new(false)),
            access_point_running: Arc::new(AtomicBool::new(false)),
            initialized: AtomicBool::new(false),
            events: StdMutex::new(None),
            tasks: StdMutex::new(Vec::new()),
        }
    }

    /// Configure and start the radio. With the station enabled this returns only once the
    /// link is up or the reconnect budget is spent.
    ///
    /// Calling it again after the station failed starts a fresh reconnect episode. A fatal
    /// error leaves the manager uninitialized so the next call runs the full bring-up.
    pub async fn initialize(self: &Arc<Self>) -> Result<(), WifiError> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            if self.settings.station.enabled
                && self.connection_state() == ConnectionState::Failed
            {
                return self.reconnect_station().await;
            }
            warn!("radio already initialized");
            return Ok(());
        }

        let result = self.bring_up().await;
        if result.as_ref().is_err_and(WifiError::is_fatal) {
            self.roll_back();
        }
        result
    }

    async fn bring_up(self: &Arc<Self>) -> Result<(), WifiError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.radio.register_handler(Box::new(move |event| {
            let _ = tx.send(event);
        }))?;
        let events = tokio::spawn(run_events(Arc::downgrade(self), rx));
        *self.events.lock().unwrap_or_else(|e| e.into_inner()) = Some(events);

        self.radio.set_hostname(&self.settings.hostname)?;
        let ap = self.settings.access_point.enabled;
        let sta = self.settings.station.enabled;
        self.radio.set_mode(RadioMode::select(ap, sta))?;
        if ap {
            self.radio.configure_access_point(&self.settings.access_point)?;
        }
        if sta {
            self.radio.configure_station(&self.settings.station)?;
        }
        if !ap && !sta {
            info!("access point and station both disabled, stopping radio");
            self.radio.stop()?;
            return Ok(());
        }

        let state_rx = self.state.subscribe();
        self.set_state(if ap {
            ConnectionState::AccessPointRunning
        } else {
            ConnectionState::Starting
        });
        self.radio.start()?;

        if ap {
            self.access_point_running.store(true, Ordering::SeqCst);
            self.spawn(broadcaster::run_access_point_task(
                self.network.clone(),
                self.messages.clone(),
                self.clients.clone(),
                self.access_point_running.clone(),
                self.options.broadcast,
            ));
            info!(ssid = %self.settings.access_point.ssid, "access point started");
        }

        if sta {
            info!(
                ssid = %self.settings.station.ssid,
                password = %redact_password(&self.settings.station.password),
                "waiting for station network"
            );
            self.await_station(state_rx).await?;
        }
        Ok(())
    }

    /// New episode after a failed one: fresh retry budget, one connect, then the same
    /// wait as the first bring-up.
    async fn reconnect_station(&self) -> Result<(), WifiError> {
        info!(ssid = %self.settings.station.ssid, "retrying station network");
        let state_rx = self.state.subscribe();
        self.lock_retry().reset();
        self.set_state(ConnectionState::Connecting);
        self.connect_station();
        self.await_station(state_rx).await
    }

    async fn await_station(
        &self,
        mut state_rx: watch::Receiver<ConnectionState>,
    ) -> Result<(), WifiError> {
        let outcome = *state_rx
            .wait_for(ConnectionState::is_station_terminal)
            .await
            .map_err(|_| WifiError::EventsClosed)?;
        if outcome == ConnectionState::Failed {
            error!(ssid = %self.settings.station.ssid, "failed to connect to station network");
            return Err(WifiError::StationFailed {
                ssid: self.settings.station.ssid.clone(),
            });
        }
        info!(ssid = %self.settings.station.ssid, "connected to station network");
        // A forwarder from an earlier episode is still gated on the address; keep it.
        if self.station_running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.spawn(
            Forwarder::new(ForwarderContext {
                network: self.network.clone(),
                packets: self.packets.clone(),
                feeds: self.feeds.subscribe(),
                has_ip: self.has_ip.subscribe(),
                rates: self.rates.clone(),
                running: self.station_running.clone(),
                tuning: self.options.forwarder,
            })
            .run(),
        );
        Ok(())
    }

    fn roll_back(&self) {
        self.station_running.store(false, Ordering::SeqCst);
        self.access_point_running.store(false, Ordering::SeqCst);
        if let Some(events) = self.events.lock().unwrap_or_else(|e| e.into_inner()).take() {
            events.abort();
        }
        self.set_state(ConnectionState::Uninitialized);
        self.initialized.store(false, Ordering::SeqCst);
    }

    /// The radio stack cannot be torn down in place, so an initialized manager restarts
    /// the platform. Returns only if that restart did not happen.
    pub fn deinitialize(&self) -> Result<(), WifiError> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.station_running.store(false, Ordering::SeqCst);
        self.access_point_running.store(false, Ordering::SeqCst);
        info!("deinitializing radio, restarting");
        self.radio.restart();
        Err(WifiError::RestartFailed)
    }

    /// Stop the worker tasks and wait for them to close their sockets.
    pub async fn shutdown(&self) {
        self.station_running.store(false, Ordering::SeqCst);
        self.access_point_running.store(false, Ordering::SeqCst);
        if let Some(events) = self.events.lock().unwrap_or_else(|e| e.into_inner()).take() {
            events.abort();
        }
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|e| e.into_inner()));
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "task ended abnormally");
            }
        }
        if let Err(e) = self.radio.stop() {
            warn!(error = %e, "radio stop failed");
        }
    }

    /// Apply one driver event.
    pub async fn handle_event(&self, event: RadioEvent) {
        match event {
            RadioEvent::ApClientConnected { mac, aid } => {
                match self.clients.lock().await.activate(mac) {
                    Ok(slot) => info!(%mac, aid, slot, "access point client joined"),
                    Err(e) => warn!(%mac, aid, error = %e, "access point client not tracked"),
                }
            }
            RadioEvent::ApClientIpAssigned { mac, ip } => {
                match self.clients.lock().await.assign_ip(mac, ip) {
                    Ok(slot) => info!(%mac, %ip, slot, "access point client assigned address"),
                    Err(e) => warn!(%mac, %ip, error = %e, "access point client not tracked"),
                }
            }
            RadioEvent::ApClientDisconnected { mac, aid } => {
                match self.clients.lock().await.deactivate(mac) {
                    Some(slot) => info!(%mac, aid, slot, "access point client left"),
                    None => debug!(%mac, aid, "unknown access point client left"),
                }
            }
            RadioEvent::StationStart => {
                self.set_state(ConnectionState::Connecting);
                self.connect_station();
            }
            RadioEvent::StationConnected => {
                self.lock_retry().on_connected();
                self.set_state(ConnectionState::Connected);
                info!("station associated");
            }
            RadioEvent::StationDisconnected { reason } => {
                self.has_ip.send_replace(false);
                let decision = self.lock_retry().on_disconnected();
                match decision {
                    RetryDecision::Retry(attempt) => {
                        warn!(reason, attempt, max = self.options.station_max_retries, "station disconnected, retrying");
                        self.set_state(ConnectionState::Retrying(attempt));
                        self.connect_station();
                    }
                    RetryDecision::Exhausted => {
                        error!(reason, "station reconnect attempts exhausted");
                        self.fail_station();
                    }
                    RetryDecision::GaveUp => debug!(reason, "station disconnected"),
                }
            }
            RadioEvent::StationGotIp { ip } => {
                self.has_ip.send_replace(true);
                info!(%ip, "station got address");
            }
            RadioEvent::StationLostIp => {
                self.has_ip.send_replace(false);
                warn!("station lost address");
            }
        }
    }

    /// Queue a packet for the feed forwarder. False if the forwarder is not running or
    /// the queue overflowed; an overflow empties the queue.
    pub fn send_decoded_packet(&self, packet: DecodedPacket) -> bool {
        if !self.station_running.load(Ordering::Relaxed) {
            warn!("packet dropped, station task not running");
            return false;
        }
        match self.packets.try_push(packet) {
            Ok(()) => true,
            Err(QueueError::Overflow) => {
                warn!("station packet queue overflowed and was reset");
                false
            }
        }
    }

    /// Queue a message for every access point client. Same semantics as
    /// `send_decoded_packet`.
    pub fn send_to_access_point_clients(&self, message: NetworkMessage) -> bool {
        if !self.access_point_running.load(Ordering::Relaxed) {
            warn!("message dropped, access point task not running");
            return false;
        }
        match self.messages.try_push(message) {
            Ok(()) => true,
            Err(QueueError::Overflow) => {
                warn!("access point message queue overflowed and was reset");
                false
            }
        }
    }

    /// Replace the feed table; the forwarder picks it up before its next packet.
    pub fn update_feeds(&self, feeds: FeedTable) {
        self.feeds.send_replace(feeds);
    }

    /// Messages per second per feed over the last reporting interval.
    pub fn feed_rates(&self) -> [u32; MAX_FEEDS] {
        *self.rates.borrow()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn station_has_ip(&self) -> bool {
        *self.has_ip.borrow()
    }

    pub fn is_station_running(&self) -> bool {
        self.station_running.load(Ordering::Relaxed)
    }

    pub fn is_access_point_running(&self) -> bool {
        self.access_point_running.load(Ordering::Relaxed)
    }

    /// Times the station gave up on its network since start.
    pub fn station_failures(&self) -> u32 {
        self.station_failures.load(Ordering::Relaxed)
    }

    pub async fn clients(&self) -> ClientRegistry {
        self.clients.lock().await.clone()
    }

    fn connect_station(&self) {
        if let Err(e) = self.radio.connect() {
            error!(error = %e, "station connect could not be started");
            if self.lock_retry().abandon() {
                self.fail_station();
            }
        }
    }

    fn fail_station(&self) {
        self.has_ip.send_replace(false);
        self.set_state(ConnectionState::Failed);
        self.station_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "connection state");
        }
    }

    fn lock_retry(&self) -> std::sync::MutexGuard<'_, StationRetry> {
        self.retry.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn spawn(&self, task: impl Future<Output = ()> + Send + 'static) {
        let handle = tokio::spawn(task);
        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(handle);
    }
}

async fn run_events<R: RadioDriver, N: Network>(
    manager: Weak<WifiManager<R, N>>,
    mut events: mpsc::UnboundedReceiver<RadioEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(manager) = manager.upgrade() else {
            break;
        };
        manager.handle_event(event).await;
    }
}
