//! Station-side feed forwarder: drains decoded packets and writes Beast frames to every
//! active feed over TCP.

use std::net::SocketAddrV4;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use airlink_core::{
    encode_with_receiver_id, DecodedPacket, FeedConfig, FeedHost, FeedStats, FeedTable,
    BEAST_MESSAGE_BUF_LEN, MAX_FEEDS,
};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::net::{FeedStream, Network};
use crate::queue::DropQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwarderTuning {
    /// Minimum spacing between connection attempts on one feed slot.
    pub reconnect_interval: Duration,
    pub stats_interval: Duration,
    /// Queue wait per loop iteration; bounds how late the run flag is noticed.
    pub receive_timeout: Duration,
}

impl Default for ForwarderTuning {
    fn default() -> Self {
        Self {
            reconnect_interval: Duration::from_millis(5000),
            stats_interval: Duration::from_millis(1000),
            receive_timeout: Duration::from_millis(100),
        }
    }
}

/// Shared handles the forwarder task runs against.
pub struct ForwarderContext<N: Network> {
    pub network: Arc<N>,
    pub packets: Arc<DropQueue<DecodedPacket>>,
    pub feeds: watch::Receiver<FeedTable>,
    pub has_ip: watch::Receiver<bool>,
    pub rates: Arc<watch::Sender<[u32; MAX_FEEDS]>>,
    pub running: Arc<AtomicBool>,
    pub tuning: ForwarderTuning,
}

struct FeedConnection<S> {
    stream: Option<S>,
    last_attempt: Option<Instant>,
}

impl<S> Default for FeedConnection<S> {
    fn default() -> Self {
        Self {
            stream: None,
            last_attempt: None,
        }
    }
}

impl<S> FeedConnection<S> {
    /// The first attempt is immediate; later ones need strictly more than `interval`.
    fn attempt_due(&self, now: Instant, interval: Duration) -> bool {
        self.last_attempt
            .map_or(true, |t| now.duration_since(t) > interval)
    }
}

pub struct Forwarder<N: Network> {
    ctx: ForwarderContext<N>,
    feeds: FeedTable,
    slots: [FeedConnection<N::Stream>; MAX_FEEDS],
    stats: FeedStats,
    last_roll: Instant,
}

impl<N: Network> Forwarder<N> {
    pub fn new(mut ctx: ForwarderContext<N>) -> Self {
        let feeds = ctx.feeds.borrow_and_update().clone();
        Self {
            ctx,
            feeds,
            slots: std::array::from_fn(|_| FeedConnection::default()),
            stats: FeedStats::new(),
            last_roll: Instant::now(),
        }
    }

    pub async fn run(mut self) {
        if !self.wait_for_ip().await {
            return;
        }
        info!("feed forwarder started");
        self.last_roll = Instant::now();
        while self.ctx.running.load(Ordering::Relaxed) {
            self.roll_stats();
            if let Some(packet) = self
                .ctx
                .packets
                .pop_timeout(self.ctx.tuning.receive_timeout)
                .await
            {
                self.forward(&packet).await;
            }
        }
        self.close_all();
        info!("feed forwarder stopped");
    }

    /// Hold off until the station has an address. False if told to stop first.
    async fn wait_for_ip(&mut self) -> bool {
        loop {
            if !self.ctx.running.load(Ordering::Relaxed) {
                return false;
            }
            if *self.ctx.has_ip.borrow_and_update() {
                return true;
            }
            let wait = self.ctx.has_ip.changed();
            if let Ok(Err(_)) = tokio::time::timeout(self.ctx.tuning.receive_timeout, wait).await
            {
                return false;
            }
        }
    }

    /// One pass over the feed table for `packet`.
    pub async fn forward(&mut self, packet: &DecodedPacket) {
        if self.ctx.feeds.has_changed().unwrap_or(false) {
            self.feeds = self.ctx.feeds.borrow_and_update().clone();
        }
        let interval = self.ctx.tuning.reconnect_interval;
        for (i, (feed, slot)) in self.feeds.iter().zip(self.slots.iter_mut()).enumerate() {
            if !feed.active {
                if slot.stream.take().is_some() {
                    info!(feed = i, "closed connection to inactive feed");
                }
                continue;
            }
            if slot.stream.is_none() {
                let now = Instant::now();
                if !slot.attempt_due(now, interval) {
                    continue;
                }
                slot.last_attempt = Some(now);
                slot.stream = connect_feed(&*self.ctx.network, i, feed).await;
            }
            let Some(stream) = slot.stream.as_mut() else {
                continue;
            };
            if !feed.protocol.accepts(packet) {
                continue;
            }
            let mut buf = [0u8; BEAST_MESSAGE_BUF_LEN];
            let len = match encode_with_receiver_id(packet, &mut buf, &feed.receiver_id) {
                Ok(n) => n,
                Err(e) => {
                    warn!(feed = i, error = %e, "unable to encode packet");
                    continue;
                }
            };
            match stream.send(&buf[..len]).await {
                Ok(()) => self.stats.record_sent(i),
                Err(e) => {
                    warn!(feed = i, uri = %feed.uri, port = feed.port, error = %e, "feed send failed, closing connection");
                    slot.stream = None;
                }
            }
        }
    }

    fn roll_stats(&mut self) {
        let now = Instant::now();
        if now.duration_since(self.last_roll) <= self.ctx.tuning.stats_interval {
            return;
        }
        self.last_roll = now;
        let rates = self.stats.roll();
        self.ctx.rates.send_replace(rates);
        info!("Feed msgs/s: {}", self.stats.summary());
    }

    fn close_all(&mut self) {
        let closed = self
            .slots
            .iter_mut()
            .filter_map(|slot| slot.stream.take())
            .count();
        if closed > 0 {
            info!(closed, "closed feed connections");
        }
    }
}

async fn connect_feed<N: Network>(network: &N, index: usize, feed: &FeedConfig) -> Option<N::Stream> {
    let ip = match feed.host() {
        FeedHost::Address(ip) => ip,
        FeedHost::Hostname(host) => match network.resolve_ipv4(host).await {
            Ok(ip) => ip,
            Err(e) => {
                warn!(feed = index, host, error = %e, "DNS lookup failed");
                return None;
            }
        },
        FeedHost::Invalid(uri) => {
            error!(feed = index, uri, "feed uri is neither a hostname nor an IPv4 address");
            return None;
        }
    };
    let addr = SocketAddrV4::new(ip, feed.port);
    match network.connect(addr).await {
        Ok(stream) => {
            info!(feed = index, %addr, uri = %feed.uri, "connected to feed");
            Some(stream)
        }
        Err(e) => {
            warn!(feed = index, %addr, error = %e, "unable to connect to feed");
            None
        }
    }
}
