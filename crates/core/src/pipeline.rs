//! Worker threads and queues from UDP datagrams to TS segments.
//!
//! One pipeline per session, three kinds of workers cooperating through
//! bounded queues:
//!
//! ```text
//! receiver (per track)      depacketizer (per track)       muxer (one)
//! UDP recvfrom ──SPSC──► reorder + depacketize ──MPSC──► segmenter
//!   drop on full            blocking send                  cuts, playlist
//! ```
//!
//! Receivers never block on a full queue: UDP applies no back-pressure,
//! so blocking the receive thread would only amplify loss. Depacketizer
//! output does block; the muxer is disk-bound and drains quickly.
//!
//! All workers poll the shared `running` flag between I/O operations;
//! sockets and queue reads carry timeouts so shutdown is never stuck
//! behind a blocking call.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender, sync_channel};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::hls::Segmenter;
use crate::media::jitter::{REORDER_CAPACITY, ReorderBuffer};
use crate::media::rtp::{RtpPacket, TimestampScaler};
use crate::media::{AccessUnit, CodecDepacketizer};
use crate::session::Track;
use crate::transport::udp::{self, ReceiverStats, RtpSocket};

/// Bounded capacity of the per-track packet queues and the shared
/// access-unit queue.
const QUEUE_CAPACITY: usize = 256;

/// One deliver cycle: how long a sequence hole may stall a track before
/// the oldest buffered packet is force-delivered around it.
const DELIVER_CYCLE: Duration = Duration::from_millis(100);

/// How often the muxer re-checks the shutdown flag while idle.
const MUX_IDLE: Duration = Duration::from_millis(500);

/// Per-packet error burst threshold, matching the receiver side: past
/// this many within one second, log once and keep going.
const ERROR_BURST_LIMIT: u64 = 100;

/// Counters shared across the pipeline's workers.
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub packets_received: AtomicU64,
    pub packets_dropped_queue: AtomicU64,
    pub packet_parse_errors: AtomicU64,
    pub media_errors: AtomicU64,
    pub units_muxed: AtomicU64,
}

/// Running worker threads for one session.
pub struct Pipeline {
    handles: Vec<thread::JoinHandle<()>>,
    running: Arc<AtomicBool>,
    receiver_stats: Vec<Arc<ReceiverStats>>,
    stats: Arc<PipelineStats>,
}

impl Pipeline {
    /// Bind every track's socket and spawn the workers. Socket binding
    /// happens before any thread starts so port conflicts surface as a
    /// plain error.
    pub fn start(
        tracks: &[Track],
        segmenter: Segmenter,
        running: Arc<AtomicBool>,
    ) -> Result<Self> {
        let stats = Arc::new(PipelineStats::default());
        let (unit_tx, unit_rx) = sync_channel::<AccessUnit>(QUEUE_CAPACITY);

        // Bind sockets and build depacketizers before any thread starts,
        // so port conflicts and bad SDP parameters surface as plain
        // errors with nothing to unwind.
        let mut per_track = Vec::with_capacity(tracks.len());
        for track in tracks {
            let socket = RtpSocket::bind(track.rtp_port)?;
            let depacketizer = track.make_depacketizer()?;
            per_track.push((track, socket, depacketizer));
        }

        let mut handles = Vec::new();
        let mut receiver_stats = Vec::new();

        for (track, socket, depacketizer) in per_track {
            let (packet_tx, packet_rx) = sync_channel::<RtpPacket>(QUEUE_CAPACITY);

            let recv_stats = Arc::new(ReceiverStats::default());
            receiver_stats.push(recv_stats.clone());
            let recv_running = running.clone();
            let codec = track.codec.name();
            handles.push(
                thread::Builder::new()
                    .name(format!("rtp-recv-{codec}"))
                    .spawn(move || udp::receive_loop(socket, packet_tx, recv_running, recv_stats))
                    .expect("spawn receiver thread"),
            );

            let scaler = TimestampScaler::new(track.clock_rate);
            let depack_running = running.clone();
            let depack_stats = stats.clone();
            let depack_tx = unit_tx.clone();
            handles.push(
                thread::Builder::new()
                    .name(format!("depacketize-{codec}"))
                    .spawn(move || {
                        depacketize_loop(
                            packet_rx,
                            depacketizer,
                            scaler,
                            depack_tx,
                            depack_running,
                            depack_stats,
                        )
                    })
                    .expect("spawn depacketizer thread"),
            );
        }
        // The workers hold the only senders; dropping this one lets the
        // muxer observe end-of-stream when they exit.
        drop(unit_tx);

        let mux_running = running.clone();
        let mux_stats = stats.clone();
        handles.push(
            thread::Builder::new()
                .name("muxer".to_string())
                .spawn(move || mux_loop(unit_rx, segmenter, mux_running, mux_stats))
                .expect("spawn muxer thread"),
        );

        Ok(Self {
            handles,
            running,
            receiver_stats,
            stats,
        })
    }

    /// Clear the running flag and join every worker.
    pub fn shutdown(self) {
        self.running.store(false, Ordering::SeqCst);
        for handle in self.handles {
            let name = handle.thread().name().unwrap_or("worker").to_string();
            if handle.join().is_err() {
                tracing::error!(worker = %name, "worker panicked");
            }
        }
        let received: u64 = self
            .receiver_stats
            .iter()
            .map(|s| s.received.load(Ordering::Relaxed))
            .sum();
        let dropped: u64 = self
            .receiver_stats
            .iter()
            .map(|s| s.dropped_full.load(Ordering::Relaxed))
            .sum();
        let parse_errors: u64 = self
            .receiver_stats
            .iter()
            .map(|s| s.parse_errors.load(Ordering::Relaxed))
            .sum();
        self.stats.packets_received.store(received, Ordering::Relaxed);
        self.stats
            .packets_dropped_queue
            .store(dropped, Ordering::Relaxed);
        self.stats
            .packet_parse_errors
            .store(parse_errors, Ordering::Relaxed);
        tracing::info!(
            received,
            dropped,
            units = self.stats.units_muxed.load(Ordering::Relaxed),
            media_errors = self.stats.media_errors.load(Ordering::Relaxed),
            "pipeline stopped"
        );
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        self.stats.clone()
    }
}

/// Per-track worker: restore sequence order, depacketize, forward
/// access units to the muxer.
fn depacketize_loop(
    packets: Receiver<RtpPacket>,
    mut depacketizer: CodecDepacketizer,
    mut scaler: TimestampScaler,
    units: SyncSender<AccessUnit>,
    running: Arc<AtomicBool>,
    stats: Arc<PipelineStats>,
) {
    let mut jitter = ReorderBuffer::new();
    let mut hole_since: Option<Instant> = None;
    let mut burst_window = Instant::now();
    let mut burst_count = 0u64;

    let codec = depacketizer.codec().name();

    // Returns false when the muxer is gone and the worker should exit.
    let mut process = |packet: RtpPacket,
                       depacketizer: &mut CodecDepacketizer,
                       scaler: &mut TimestampScaler|
     -> bool {
        let pts90k = scaler.to_pts90k(packet.timestamp);
        match depacketizer.depacketize(&packet, pts90k) {
            Ok(parsed) => {
                for unit in parsed {
                    if units.send(unit).is_err() {
                        return false;
                    }
                }
            }
            Err(e) => {
                depacketizer.reset();
                stats.media_errors.fetch_add(1, Ordering::Relaxed);
                if burst_window.elapsed() > Duration::from_secs(1) {
                    burst_window = Instant::now();
                    burst_count = 0;
                }
                burst_count += 1;
                if burst_count == ERROR_BURST_LIMIT {
                    tracing::warn!(codec, error = %e, "media error burst, suppressing further logs");
                } else if burst_count < ERROR_BURST_LIMIT {
                    tracing::debug!(codec, error = %e, "dropped packet");
                }
            }
        }
        true
    };

    while running.load(Ordering::SeqCst) {
        match packets.recv_timeout(DELIVER_CYCLE) {
            Ok(packet) => {
                jitter.push(packet);
                while jitter.len() > REORDER_CAPACITY {
                    let Some(forced) = jitter.pop_oldest() else { break };
                    if !process(forced, &mut depacketizer, &mut scaler) {
                        return;
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        let mut progressed = false;
        while let Some(packet) = jitter.pop_ready() {
            progressed = true;
            if !process(packet, &mut depacketizer, &mut scaler) {
                return;
            }
        }
        if progressed {
            hole_since = None;
        }

        // A hole that has stalled the track for a full deliver cycle is
        // skipped: force the oldest packet out and resume in order.
        if jitter.is_empty() {
            hole_since = None;
        } else {
            match hole_since {
                None => hole_since = Some(Instant::now()),
                Some(since) if since.elapsed() >= DELIVER_CYCLE => {
                    if let Some(forced) = jitter.pop_oldest() {
                        if !process(forced, &mut depacketizer, &mut scaler) {
                            return;
                        }
                    }
                    while let Some(packet) = jitter.pop_ready() {
                        if !process(packet, &mut depacketizer, &mut scaler) {
                            return;
                        }
                    }
                    hole_since = if jitter.is_empty() {
                        None
                    } else {
                        Some(Instant::now())
                    };
                }
                Some(_) => {}
            }
        }
    }

    // Drain whatever is buffered so the tail of the stream is not lost.
    for packet in jitter.flush() {
        if !process(packet, &mut depacketizer, &mut scaler) {
            return;
        }
    }
    let reorder = jitter.stats();
    tracing::debug!(
        codec,
        gaps = reorder.gaps,
        duplicates = reorder.duplicates,
        late = reorder.late,
        "depacketizer exited"
    );
}

/// Muxer worker: the single consumer of access units. Fatal segmenter
/// errors clear the running flag, since the output is unplayable from
/// that point on.
fn mux_loop(
    units: Receiver<AccessUnit>,
    mut segmenter: Segmenter,
    running: Arc<AtomicBool>,
    stats: Arc<PipelineStats>,
) {
    loop {
        match units.recv_timeout(MUX_IDLE) {
            Ok(unit) => {
                if let Err(e) = segmenter.push(&unit) {
                    tracing::error!(error = %e, "segmenter failed, stopping session");
                    running.store(false, Ordering::SeqCst);
                    break;
                }
                stats.units_muxed.fetch_add(1, Ordering::Relaxed);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    if let Err(e) = segmenter.finish() {
        tracing::warn!(error = %e, "final segment flush failed");
    }
}
