use anyhow::{Context, Result};
use chrono::Utc;
use crossbeam::channel::Sender;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::analysis;
use crate::packet::{self, PacketRecord};
use crate::stats::StatsAggregator;

/// Receive buffer size. Datagrams larger than this are truncated by the
/// transport; this tool does not attempt reassembly.
pub const RECV_BUFFER_SIZE: usize = 4096;

/// Bounded read timeout so the loop can observe a stop request
const RECV_TIMEOUT: Duration = Duration::from_secs(1);

/// Kernel receive buffer request, matching the listener tuning used for
/// high-rate capture
const SO_RCVBUF_SIZE: usize = 1024 * 1024;

/// Signals a running [`ReceiverSession`] to exit after its current (or next
/// timed-out) receive call returns.
#[derive(Debug, Clone)]
pub struct StopHandle {
    running: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Owns the listening socket and drives the per-packet pipeline: receive,
/// classify, record, deliver to the sink channel.
pub struct ReceiverSession {
    socket: UdpSocket,
    running: Arc<AtomicBool>,
    stats: Arc<StatsAggregator>,
    sink: Sender<PacketRecord>,
}

impl ReceiverSession {
    /// Bind the listening endpoint. A bind failure (port in use, bad
    /// interface) is fatal: the session never starts.
    pub fn bind(
        bind_ip: IpAddr,
        port: u16,
        stats: Arc<StatsAggregator>,
        sink: Sender<PacketRecord>,
    ) -> Result<Self> {
        let addr = SocketAddr::new(bind_ip, port);
        let domain = Domain::for_address(addr);
        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))
            .context("failed to create UDP socket")?;

        socket
            .set_reuse_address(true)
            .context("failed to set SO_REUSEADDR")?;
        if let Err(e) = socket.set_recv_buffer_size(SO_RCVBUF_SIZE) {
            warn!("Failed to set large receive buffer: {}", e);
        }
        socket
            .set_read_timeout(Some(RECV_TIMEOUT))
            .context("failed to set receive timeout")?;
        socket
            .bind(&addr.into())
            .with_context(|| format!("failed to bind UDP listener on {addr}"))?;

        let socket: UdpSocket = socket.into();
        info!("Listening on UDP {}", socket.local_addr()?);

        Ok(Self {
            socket,
            running: Arc::new(AtomicBool::new(true)),
            stats,
            sink,
        })
    }

    /// Actual bound address, useful when port 0 was requested.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            running: Arc::clone(&self.running),
        }
    }

    /// Receive loop. Runs until stopped, the sink is dropped, or the
    /// transport reports a terminal error.
    pub fn run(self) -> Result<()> {
        let mut buffer = [0u8; RECV_BUFFER_SIZE];

        while self.running.load(Ordering::SeqCst) {
            match self.socket.recv_from(&mut buffer) {
                Ok((size, sender)) => {
                    debug!("Received {} bytes from {}", size, sender);
                    if !self.handle_datagram(&buffer[..size], sender) {
                        break;
                    }
                }
                Err(e) => match e.kind() {
                    // Normal timeout, re-check the running flag and continue
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => continue,
                    _ => {
                        if self.running.load(Ordering::SeqCst) {
                            error!("Receive failed: {}", e);
                            return Err(e).context("UDP receive failed");
                        }
                        // Socket torn down during shutdown, expected
                        debug!("Receive interrupted by stop request");
                        break;
                    }
                },
            }
        }

        info!("Receiver stopped after {} packets", self.stats.snapshot().total_packets);
        Ok(())
    }

    /// Classify, count, and deliver one datagram. Returns false when the
    /// sink has been dropped and the loop should end.
    fn handle_datagram(&self, payload: &[u8], sender: SocketAddr) -> bool {
        let received_at = Utc::now();
        let content = analysis::classify(payload);
        let receipt = self.stats.record(payload.len(), received_at);

        let record = PacketRecord {
            received_at,
            sender,
            sequence: receipt.sequence,
            size_bytes: payload.len(),
            cumulative_bytes: receipt.cumulative_bytes,
            raw_hex: packet::to_hex(payload),
            content,
        };

        if self.sink.send(record).is_err() {
            info!("Record sink closed, stopping receiver");
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::PayloadFormat;
    use crate::sender;
    use crossbeam::channel;
    use std::net::Ipv4Addr;
    use std::thread;

    fn spawn_session() -> (
        SocketAddr,
        StopHandle,
        channel::Receiver<PacketRecord>,
        thread::JoinHandle<Result<()>>,
        Arc<StatsAggregator>,
    ) {
        let stats = Arc::new(StatsAggregator::new());
        let (tx, rx) = channel::unbounded();
        let session = ReceiverSession::bind(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            0,
            Arc::clone(&stats),
            tx,
        )
        .unwrap();
        let addr = session.local_addr().unwrap();
        let handle = session.stop_handle();
        let join = thread::spawn(move || session.run());
        (addr, handle, rx, join, stats)
    }

    #[test]
    fn test_receive_classify_and_stop() {
        let (addr, handle, rx, join, stats) = spawn_session();

        sender::send_text(addr, "\"hello\"").unwrap();
        let record = rx.recv_timeout(Duration::from_secs(5)).unwrap();

        assert_eq!(record.sequence, 1);
        assert_eq!(record.size_bytes, 7);
        assert_eq!(record.cumulative_bytes, 7);
        assert_eq!(record.raw_hex, "2268656c6c6f22");
        assert!(record.content.has_format(PayloadFormat::Json));

        assert_eq!(stats.snapshot().total_packets, 1);

        handle.stop();
        join.join().unwrap().unwrap();
    }

    #[test]
    fn test_records_are_numbered_in_receipt_order() {
        let (addr, handle, rx, join, _stats) = spawn_session();

        sender::send_bytes(addr, b"one").unwrap();
        sender::send_bytes(addr, b"three").unwrap();

        let first = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let second = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert_eq!(second.cumulative_bytes, 8);

        handle.stop();
        join.join().unwrap().unwrap();
    }

    #[test]
    fn test_bind_conflict_is_fatal() {
        let stats = Arc::new(StatsAggregator::new());
        let (tx, _rx) = channel::unbounded();
        // Hold the port with a plain socket that did not opt into reuse
        let occupied = UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = occupied.local_addr().unwrap().port();

        let result = ReceiverSession::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), port, stats, tx);
        assert!(result.is_err());
    }
}
