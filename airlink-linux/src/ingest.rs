//! AVR line ingest: decoded frames from a demodulator, one per line.

use std::io;

use airlink_core::{DecodedPacket, NetworkMessage};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info};

use crate::net::Network;
use crate::radio::RadioDriver;
use crate::wifi::WifiManager;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub lines: u64,
    pub malformed: u64,
    pub forwarded: u64,
    pub relayed: u64,
}

/// Feed every parsed line to the forwarder and, when `relay_port` is set, relay the line
/// itself to access point clients. Runs until `input` ends.
pub async fn run_avr_ingest<R, N, S>(
    manager: &WifiManager<R, N>,
    input: S,
    relay_port: Option<u16>,
) -> io::Result<IngestStats>
where
    R: RadioDriver,
    N: Network,
    S: AsyncBufRead + Unpin,
{
    let mut stats = IngestStats::default();
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        stats.lines += 1;
        let packet = match DecodedPacket::from_avr(line) {
            Ok(p) => p,
            Err(e) => {
                stats.malformed += 1;
                debug!(line, error = %e, "skipping malformed AVR line");
                continue;
            }
        };
        if manager.is_station_running() && manager.send_decoded_packet(packet) {
            stats.forwarded += 1;
        }
        let Some(port) = relay_port else {
            continue;
        };
        if !manager.is_access_point_running() {
            continue;
        }
        match NetworkMessage::new(format!("{line}\n").as_bytes(), port) {
            Ok(msg) if manager.send_to_access_point_clients(msg) => stats.relayed += 1,
            Ok(_) => {}
            Err(e) => debug!(error = %e, "AVR line too long to relay"),
        }
    }
    info!(
        lines = stats.lines,
        malformed = stats.malformed,
        forwarded = stats.forwarded,
        relayed = stats.relayed,
        "AVR input closed"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ConnectOutcome, MockNetwork, MockRadio};
    use crate::wifi::ManagerOptions;
    use airlink_core::{MacAddr, RadioEvent, Settings};
    use std::net::Ipv4Addr;
    use std::sync::Arc;
    use std::time::Duration;

    const INPUT: &[u8] = b"*8D4840D6202CC371C32CE0576098;\n\
        not a frame\n\
        \n\
        @0000000012347700;\n";

    #[tokio::test(start_paused = true)]
    async fn forwards_and_relays_parsed_lines() {
        let radio = MockRadio::new(ConnectOutcome::Succeed);
        let net = MockNetwork::new();
        let mut settings = Settings::default();
        settings.access_point.enabled = true;
        settings.station.enabled = true;
        let m = Arc::new(WifiManager::new(
            radio.clone(),
            Arc::new(net.clone()),
            settings,
            ManagerOptions::default(),
        ));
        m.initialize().await.unwrap();
        let mac = MacAddr([2, 0, 0, 0, 0, 1]);
        radio.emit(RadioEvent::ApClientIpAssigned {
            mac,
            ip: Ipv4Addr::new(192, 168, 4, 2),
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let stats = run_avr_ingest(&*m, INPUT, Some(30002)).await.unwrap();
        assert_eq!(
            stats,
            IngestStats {
                lines: 3,
                malformed: 1,
                forwarded: 2,
                relayed: 2,
            }
        );

        tokio::time::sleep(Duration::from_millis(10)).await;
        let relayed = net.datagrams();
        assert_eq!(relayed.len(), 2);
        assert_eq!(relayed[0].0.port(), 30002);
        assert_eq!(relayed[0].1, b"*8D4840D6202CC371C32CE0576098;\n");
        m.shutdown().await;
    }

    #[tokio::test]
    async fn nothing_queued_when_tasks_are_down() {
        let radio = MockRadio::new(ConnectOutcome::Succeed);
        let m = WifiManager::new(
            radio,
            Arc::new(MockNetwork::new()),
            Settings::default(),
            ManagerOptions::default(),
        );
        let stats = run_avr_ingest(&m, INPUT, Some(30002)).await.unwrap();
        assert_eq!(stats.lines, 3);
        assert_eq!(stats.forwarded, 0);
        assert_eq!(stats.relayed, 0);
    }
}
