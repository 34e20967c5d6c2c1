//! The impairment relay.
//!
//! A single task owns one UDP socket and all scheduling state. Each pass of
//! the loop releases idle held packets, transmits every due send, then waits
//! for whichever comes first: the next send deadline, the next idle-release
//! deadline, a datagram, or shutdown. Nothing is shared, so nothing is locked.

mod signals;

pub use signals::{shutdown_signal, Signal};

use std::fmt;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;

use bytes::Bytes;
use serde::Serialize;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::capture::CaptureLog;
use crate::config::Config;
use crate::error::{Error, Result, TransportError};
use crate::impair::{DelayModel, PendingSend, ReorderController, ReorderStats, SendQueue};
use crate::types::Direction;

/// Why the receive loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The shutdown future completed.
    Shutdown,
    /// `max_packets` accepted packets were processed.
    PacketLimit,
}

/// Counters for a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RunReport {
    pub stop: StopReason,
    /// Packets run through the impairment pipeline.
    pub accepted: u64,
    /// Server-to-client packets dropped because no client was known yet.
    pub dropped: u64,
    /// Datagrams handed to the socket.
    pub transmitted: u64,
    /// Datagrams the socket refused.
    pub send_failures: u64,
    /// Capture log records written.
    pub captured: u64,
    pub reorder: ReorderStats,
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Reorder Statistics ===")?;
        for (direction, stats) in self.reorder.iter() {
            writeln!(
                f,
                "  {}: {}/{} ({:.4}%)",
                direction,
                stats.reordered,
                stats.total,
                stats.reorder_pct()
            )?;
        }
        write!(
            f,
            "  accepted={} transmitted={} dropped={} send_failures={}",
            self.accepted, self.transmitted, self.dropped, self.send_failures
        )
    }
}

#[derive(Debug, Default)]
struct Counters {
    accepted: u64,
    dropped: u64,
    transmitted: u64,
    send_failures: u64,
}

enum Wake {
    Shutdown,
    Deadline,
    Datagram(std::io::Result<(usize, SocketAddr)>),
}

/// UDP relay applying delay, jitter and controlled reordering.
pub struct ImpairProxy {
    socket: UdpSocket,
    local_addr: SocketAddr,
    upstream: SocketAddr,
    /// Last client seen; server-to-client traffic goes here.
    client: Option<SocketAddr>,
    max_packets: u64,
    recv_buffer: usize,
    delay: DelayModel,
    reorder: ReorderController,
    queue: SendQueue,
    capture: CaptureLog,
    counters: Counters,
}

impl ImpairProxy {
    /// Validate `config`, resolve both endpoints, bind the listen socket and
    /// open the capture log.
    pub async fn bind(config: &Config) -> Result<Self> {
        config.validate()?;

        let listen = config
            .proxy
            .listen
            .as_ref()
            .ok_or_else(|| Error::InvalidConfig("listen address is required".into()))?;
        let upstream = config
            .proxy
            .upstream
            .as_ref()
            .ok_or_else(|| Error::InvalidConfig("upstream address is required".into()))?;

        let listen_addr = listen.resolve().await?;
        let upstream = upstream.resolve().await?;

        let socket = UdpSocket::bind(listen_addr)
            .await
            .map_err(|e| TransportError::BindFailed {
                addr: listen_addr,
                reason: e.to_string(),
            })?;
        let local_addr = socket
            .local_addr()
            .map_err(|e| TransportError::SocketError(e.to_string()))?;

        let delay = DelayModel::new(&config.delay)?;
        let reorder = ReorderController::new(&config.reorder);
        let capture = CaptureLog::open(&config.capture.target)?;

        info!(
            listen = %local_addr,
            upstream = %upstream,
            interval = reorder.interval(),
            "Proxy bound"
        );

        Ok(Self {
            socket,
            local_addr,
            upstream,
            client: None,
            max_packets: config.proxy.max_packets,
            recv_buffer: config.proxy.recv_buffer.max(1),
            delay,
            reorder,
            queue: SendQueue::new(),
            capture,
            counters: Counters::default(),
        })
    }

    /// Address the relay socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Resolved upstream address.
    pub fn upstream(&self) -> SocketAddr {
        self.upstream
    }

    /// Relay until `shutdown` completes or the packet limit is reached, then
    /// drain every accepted packet before returning.
    pub async fn run<F>(mut self, shutdown: F) -> Result<RunReport>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut buf = vec![0u8; self.recv_buffer];

        let outcome = self.event_loop(&mut buf, shutdown).await;
        let drained = self.drain().await;

        let stop = outcome?;
        drained?;

        let report = self.report(stop);
        info!(
            stop = ?report.stop,
            accepted = report.accepted,
            transmitted = report.transmitted,
            "Proxy stopped"
        );
        Ok(report)
    }

    async fn event_loop<F>(
        &mut self,
        buf: &mut [u8],
        mut shutdown: Pin<&mut F>,
    ) -> Result<StopReason>
    where
        F: Future<Output = ()>,
    {
        loop {
            let now = Instant::now();
            for (direction, send) in self.reorder.release_idle(now) {
                self.schedule(direction, send)?;
            }
            while let Some(send) = self.queue.pop_due(now) {
                self.transmit(send).await?;
            }

            let deadline = earliest(
                self.queue.next_deadline(),
                self.reorder.next_idle_deadline(),
            );

            let wake = tokio::select! {
                biased;
                () = shutdown.as_mut() => Wake::Shutdown,
                () = wait_until(deadline) => Wake::Deadline,
                received = self.socket.recv_from(buf) => Wake::Datagram(received),
            };

            match wake {
                Wake::Shutdown => {
                    info!("Shutdown requested");
                    return Ok(StopReason::Shutdown);
                }
                Wake::Deadline => {}
                Wake::Datagram(received) => {
                    let (len, from) =
                        received.map_err(|e| TransportError::ReceiveFailed(e.to_string()))?;
                    let accepted =
                        self.handle_datagram(Bytes::copy_from_slice(&buf[..len]), from)?;

                    if accepted
                        && self.max_packets > 0
                        && self.counters.accepted >= self.max_packets
                    {
                        info!(max_packets = self.max_packets, "Packet limit reached");
                        return Ok(StopReason::PacketLimit);
                    }
                }
            }
        }
    }

    /// Classify and schedule one datagram. Returns whether it was accepted.
    fn handle_datagram(&mut self, payload: Bytes, from: SocketAddr) -> Result<bool> {
        let received_at = Instant::now();

        let (direction, destination) = if same_peer(from, self.upstream) {
            (Direction::ServerToClient, self.client)
        } else {
            if self.client != Some(from) {
                debug!(client = %from, "Client address updated");
            }
            self.client = Some(from);
            (Direction::ClientToServer, Some(self.upstream))
        };

        let Some(destination) = destination else {
            debug!(len = payload.len(), "No client yet, dropping upstream packet");
            self.counters.dropped += 1;
            return Ok(false);
        };

        let delay_ms = self.delay.sample(direction);
        for send in self
            .reorder
            .process(direction, received_at, delay_ms, payload, from, destination)
        {
            self.schedule(direction, send)?;
        }

        self.counters.accepted += 1;
        Ok(true)
    }

    /// Queue a finalized send and record it in the capture log.
    fn schedule(&mut self, direction: Direction, send: PendingSend) -> Result<()> {
        let record = self.capture.record(direction, &send);
        self.queue.push(send);
        record
    }

    async fn transmit(&mut self, send: PendingSend) -> Result<()> {
        let destination = self.socket_target(send.destination);
        match self.socket.send_to(&send.payload, destination).await {
            Ok(_) => {
                self.counters.transmitted += 1;
                Ok(())
            }
            Err(e) => {
                let err: Error = TransportError::SendFailed {
                    addr: send.destination,
                    reason: e.to_string(),
                }
                .into();
                if err.is_fatal() {
                    return Err(err);
                }
                warn!("{}", err);
                self.counters.send_failures += 1;
                Ok(())
            }
        }
    }

    /// Flush held packets and transmit everything still queued, sleeping
    /// until each entry is due.
    async fn drain(&mut self) -> Result<()> {
        let mut result = Ok(());
        for direction in Direction::ALL {
            if let Some(send) = self.reorder.flush(direction) {
                if let Err(e) = self.schedule(direction, send) {
                    result = result.and(Err(e));
                }
            }
        }

        if !self.queue.is_empty() {
            debug!(pending = self.queue.len(), "Draining send queue");
        }
        while let Some(send) = self.queue.pop() {
            tokio::time::sleep_until(send.scheduled_at).await;
            self.transmit(send).await?;
        }

        self.capture.flush()?;
        result
    }

    fn report(&self, stop: StopReason) -> RunReport {
        RunReport {
            stop,
            accepted: self.counters.accepted,
            dropped: self.counters.dropped,
            transmitted: self.counters.transmitted,
            send_failures: self.counters.send_failures,
            captured: self.capture.records(),
            reorder: self.reorder.stats(),
        }
    }

    /// An IPv6 socket can only address IPv4 peers through mapped addresses.
    fn socket_target(&self, addr: SocketAddr) -> SocketAddr {
        match (self.local_addr, addr) {
            (SocketAddr::V6(_), SocketAddr::V4(v4)) => {
                SocketAddr::new(IpAddr::V6(v4.ip().to_ipv6_mapped()), v4.port())
            }
            _ => addr,
        }
    }
}

impl fmt::Debug for ImpairProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImpairProxy")
            .field("local_addr", &self.local_addr)
            .field("upstream", &self.upstream)
            .field("client", &self.client)
            .field("queued", &self.queue.len())
            .finish_non_exhaustive()
    }
}

fn earliest(a: Option<Instant>, b: Option<Instant>) -> Option<Instant> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Compare peers ignoring IPv4-mapped IPv6 notation.
fn same_peer(a: SocketAddr, b: SocketAddr) -> bool {
    a.port() == b.port() && a.ip().to_canonical() == b.ip().to_canonical()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_earliest() {
        let now = Instant::now();
        let later = now + Duration::from_millis(5);
        assert_eq!(earliest(None, None), None);
        assert_eq!(earliest(Some(later), None), Some(later));
        assert_eq!(earliest(None, Some(now)), Some(now));
        assert_eq!(earliest(Some(later), Some(now)), Some(now));
    }

    #[test]
    fn test_same_peer_ignores_mapping() {
        let v4: SocketAddr = "127.0.0.1:5301".parse().unwrap();
        let mapped: SocketAddr = "[::ffff:127.0.0.1]:5301".parse().unwrap();
        assert!(same_peer(v4, mapped));
        assert!(!same_peer(v4, "127.0.0.1:5302".parse().unwrap()));
        assert!(!same_peer(v4, "[::1]:5301".parse().unwrap()));
    }

    #[test]
    fn test_report_display() {
        let mut reorder = ReorderStats::default();
        reorder[Direction::ClientToServer].total = 2000;
        reorder[Direction::ClientToServer].reordered = 1;

        let report = RunReport {
            stop: StopReason::PacketLimit,
            accepted: 2000,
            dropped: 0,
            transmitted: 2000,
            send_failures: 0,
            captured: 2000,
            reorder,
        };
        let text = report.to_string();
        assert!(text.starts_with("=== Reorder Statistics ==="));
        assert!(text.contains("client_to_server: 1/2000 (0.0500%)"));
        assert!(text.contains("server_to_client: 0/0 (0.0000%)"));
    }
}
