use std::net::UdpSocket;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{SyncSender, TrySendError};
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::media::rtp::RtpPacket;

/// Read timeout so the receive loop observes the shutdown flag.
const RECV_TIMEOUT: Duration = Duration::from_millis(500);

/// Largest datagram accepted; RTP over UDP stays well under this.
const MAX_DATAGRAM: usize = 65_536;

/// Per-packet error burst threshold: past this many within one second,
/// log once and keep counting silently.
const ERROR_BURST_LIMIT: u64 = 100;

/// Inbound RTP socket pair for one track.
///
/// The RTP socket is bound to the client port advertised in SETUP; the
/// RTCP companion (`port + 1`) is bound so the advertised pair is real,
/// but never read (no RTCP processing).
pub struct RtpSocket {
    rtp: UdpSocket,
    _rtcp: UdpSocket,
}

impl RtpSocket {
    /// Bind `0.0.0.0:rtp_port` and `0.0.0.0:rtp_port + 1`.
    pub fn bind(rtp_port: u16) -> Result<Self> {
        let rtp = UdpSocket::bind(("0.0.0.0", rtp_port))?;
        let rtcp = UdpSocket::bind(("0.0.0.0", rtp_port + 1))?;
        rtp.set_read_timeout(Some(RECV_TIMEOUT))?;
        tracing::debug!(rtp_port, "RTP socket pair bound");
        Ok(Self { rtp, _rtcp: rtcp })
    }

    /// Receive one datagram into `buf`. `Ok(None)` on timeout.
    fn recv(&self, buf: &mut [u8]) -> std::io::Result<Option<usize>> {
        match self.rtp.recv_from(buf) {
            Ok((len, _addr)) => Ok(Some(len)),
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

/// Drop and error counters for one receiver, shared with the pipeline.
#[derive(Debug, Default)]
pub struct ReceiverStats {
    pub received: AtomicU64,
    /// Packets dropped because the queue to the depacketizer was full.
    pub dropped_full: AtomicU64,
    pub parse_errors: AtomicU64,
}

/// Blocking receive loop for one track.
///
/// Parses datagrams as RTP and pushes them onto the bounded queue to
/// the depacketizer. When the queue is full the packet is dropped and
/// counted; blocking here would amplify loss, since UDP applies no
/// back-pressure of its own. Exits when `running` clears or the queue's
/// consumer goes away.
pub fn receive_loop(
    socket: RtpSocket,
    tx: SyncSender<RtpPacket>,
    running: Arc<AtomicBool>,
    stats: Arc<ReceiverStats>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    let mut burst_window = Instant::now();
    let mut burst_count = 0u64;

    while running.load(Ordering::SeqCst) {
        let len = match socket.recv(&mut buf) {
            Ok(Some(len)) => len,
            Ok(None) => continue,
            Err(e) => {
                // Socket closed from the shutdown path.
                if running.load(Ordering::SeqCst) {
                    tracing::warn!(error = %e, "RTP socket error");
                }
                break;
            }
        };

        let packet = match RtpPacket::parse(&buf[..len]) {
            Ok(packet) => packet,
            Err(e) => {
                stats.parse_errors.fetch_add(1, Ordering::Relaxed);
                if burst_window.elapsed() > Duration::from_secs(1) {
                    burst_window = Instant::now();
                    burst_count = 0;
                }
                burst_count += 1;
                if burst_count == ERROR_BURST_LIMIT {
                    tracing::warn!(error = %e, "RTP parse error burst, suppressing further logs");
                } else if burst_count < ERROR_BURST_LIMIT {
                    tracing::trace!(error = %e, "dropped unparseable datagram");
                }
                continue;
            }
        };

        stats.received.fetch_add(1, Ordering::Relaxed);
        match tx.try_send(packet) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                stats.dropped_full.fetch_add(1, Ordering::Relaxed);
                tracing::trace!("depacketizer queue full, packet dropped");
            }
            Err(TrySendError::Disconnected(_)) => break,
        }
    }
    tracing::debug!("RTP receive loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::sync_channel;
    use std::thread;

    fn free_port_base() -> u16 {
        // Bind port 0 to discover a free base, then release it so the
        // pair can be bound for real.
        let port = {
            let probe = UdpSocket::bind("127.0.0.1:0").unwrap();
            probe.local_addr().unwrap().port()
        };
        port & !1
    }

    #[test]
    fn bind_creates_port_pair() {
        let base = free_port_base();
        let socket = RtpSocket::bind(base).expect("bind pair");
        assert_eq!(socket.rtp.local_addr().unwrap().port(), base);
        assert_eq!(socket._rtcp.local_addr().unwrap().port(), base + 1);
    }

    #[test]
    fn receive_loop_delivers_valid_rtp_and_drops_garbage() {
        let base = free_port_base();
        let socket = RtpSocket::bind(base).unwrap();
        let (tx, rx) = sync_channel(16);
        let running = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(ReceiverStats::default());

        let loop_running = running.clone();
        let loop_stats = stats.clone();
        let handle = thread::spawn(move || receive_loop(socket, tx, loop_running, loop_stats));

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        let target = ("127.0.0.1", base);
        // Garbage first, then one valid packet.
        sender.send_to(&[0x00, 0x01], target).unwrap();
        let mut rtp = vec![0x80, 0x60, 0x00, 0x01];
        rtp.extend_from_slice(&3000u32.to_be_bytes());
        rtp.extend_from_slice(&0xAABBCCDDu32.to_be_bytes());
        rtp.extend_from_slice(&[0x65, 0x88]);
        sender.send_to(&rtp, target).unwrap();

        let packet = rx.recv_timeout(Duration::from_secs(2)).expect("packet");
        assert_eq!(packet.sequence, 1);
        assert_eq!(&packet.payload[..], &[0x65, 0x88]);

        running.store(false, Ordering::SeqCst);
        handle.join().unwrap();
        assert_eq!(stats.received.load(Ordering::Relaxed), 1);
        assert_eq!(stats.parse_errors.load(Ordering::Relaxed), 1);
    }
}
