//! Access-point fan-out: every queued message goes to each active client over UDP.

use std::io;
use std::net::SocketAddrV4;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use airlink_core::{ClientRegistry, NetworkMessage};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::net::{DatagramSocket, Network};
use crate::queue::DropQueue;

/// How long the task waits on an empty queue before re-checking its run flag.
const QUEUE_POLL: Duration = Duration::from_millis(100);

/// Per-client send retry rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastPolicy {
    /// Total send attempts per client and message, at least 1.
    pub attempts: u8,
    pub retry_delay: Duration,
    /// Only this error kind is retried; `None` disables retries.
    pub retry_on: Option<io::ErrorKind>,
}

impl Default for BroadcastPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            retry_delay: Duration::from_millis(100),
            retry_on: Some(io::ErrorKind::OutOfMemory),
        }
    }
}

impl BroadcastPolicy {
    fn is_retryable(&self, err: &io::Error) -> bool {
        self.retry_on == Some(err.kind())
    }
}

pub async fn run_access_point_task<N: Network>(
    network: Arc<N>,
    messages: Arc<DropQueue<NetworkMessage>>,
    clients: Arc<Mutex<ClientRegistry>>,
    running: Arc<AtomicBool>,
    policy: BroadcastPolicy,
) {
    let socket = match network.bind_udp().await {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "unable to create access point socket");
            return;
        }
    };
    info!("access point fan-out started");
    while running.load(Ordering::Relaxed) {
        let Some(message) = messages.pop_timeout(QUEUE_POLL).await else {
            continue;
        };
        broadcast(&socket, &message, &clients, &policy).await;
    }
    info!("access point fan-out stopped");
}

/// Send `message` to every active client with a known address. The client table stays
/// locked for the whole pass. Returns the number of clients reached.
pub async fn broadcast<D: DatagramSocket>(
    socket: &D,
    message: &NetworkMessage,
    clients: &Mutex<ClientRegistry>,
    policy: &BroadcastPolicy,
) -> usize {
    let clients = clients.lock().await;
    let mut delivered = 0;
    for ip in clients.addressable() {
        let dest = SocketAddrV4::new(ip, message.port());
        match send_with_retry(socket, message.payload(), dest, policy).await {
            Ok(_) => delivered += 1,
            Err((e, attempts)) => {
                error!(client = %dest, attempts, error = %e, "error sending to access point client");
            }
        }
    }
    debug!(delivered, len = message.len(), "message fanned out");
    delivered
}

async fn send_with_retry<D: DatagramSocket>(
    socket: &D,
    payload: &[u8],
    dest: SocketAddrV4,
    policy: &BroadcastPolicy,
) -> Result<usize, (io::Error, u8)> {
    let max = policy.attempts.max(1);
    let mut attempt = 0u8;
    loop {
        attempt += 1;
        match socket.send_to(payload, dest).await {
            Ok(n) => return Ok(n),
            Err(e) if attempt < max && policy.is_retryable(&e) => {
                warn!(client = %dest, attempt, error = %e, "send to access point client failed, retrying");
                tokio::time::sleep(policy.retry_delay).await;
            }
            Err(e) => return Err((e, attempt)),
        }
    }
}
