use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{RelayError, Result};
use crate::hls::Segmenter;
use crate::media::MediaKind;
use crate::pipeline::{Pipeline, PipelineStats};
use crate::session::{Session, SessionState};

/// Relay configuration: timeouts, ports, and segmentation policy.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Directory receiving `index.m3u8` and `segment_<N>.ts`. Must
    /// exist; the relay never creates it.
    pub output_dir: PathBuf,
    /// Applied to connect, each request/response exchange, and idle
    /// reads on the control connection.
    pub connect_timeout: Duration,
    /// GET_PARAMETER cadence while playing; keep under the server's
    /// session timeout (often 60 s).
    pub keepalive_interval: Duration,
    /// First local RTP port; track `i` binds `base + 2*i` and the RTCP
    /// companion above it.
    pub rtp_base_port: u16,
    /// Target segment length. Cuts only land on keyframes, so real
    /// segments run up to one GOP longer.
    pub segment_duration_ms: u64,
    /// Sliding window length; older segment files are unlinked.
    pub max_segments: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./segments"),
            connect_timeout: Duration::from_secs(5),
            keepalive_interval: Duration::from_secs(30),
            rtp_base_port: 50_000,
            segment_duration_ms: 2_000,
            max_segments: 5,
        }
    }
}

impl RelayConfig {
    /// Reject configurations the pipeline cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.segment_duration_ms < 1_000 {
            return Err(RelayError::InvalidArgument {
                reason: format!(
                    "segment duration must be at least 1000 ms, got {}",
                    self.segment_duration_ms
                ),
            });
        }
        if self.max_segments < 1 {
            return Err(RelayError::InvalidArgument {
                reason: "window must hold at least one segment".to_string(),
            });
        }
        if self.keepalive_interval.is_zero() {
            return Err(RelayError::InvalidArgument {
                reason: "keepalive interval must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}

/// High-level relay orchestrator.
///
/// Owns the RTSP session and the media pipeline. [`start`](Self::start)
/// runs the whole handshake (connect, OPTIONS, DESCRIBE, SETUP, PLAY),
/// spawns the pipeline workers and the keepalive thread, then returns;
/// media flows on the worker threads until [`stop`](Self::stop) or a
/// fatal pipeline error.
pub struct Client {
    config: RelayConfig,
    session: Arc<Mutex<Session>>,
    running: Arc<AtomicBool>,
    pipeline: Option<Pipeline>,
    keepalive: Option<thread::JoinHandle<()>>,
}

impl Client {
    pub fn new(url: &str, config: RelayConfig) -> Result<Self> {
        config.validate()?;
        let session = Session::new(url, config.connect_timeout, config.rtp_base_port)?;
        Ok(Self {
            config,
            session: Arc::new(Mutex::new(session)),
            running: Arc::new(AtomicBool::new(false)),
            pipeline: None,
            keepalive: None,
        })
    }

    /// Run the RTSP handshake and start relaying into the output
    /// directory.
    pub fn start(&mut self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(RelayError::ProtocolState {
                state: "Playing",
                operation: "start",
            });
        }

        if let Err(e) = self.start_inner() {
            tracing::error!(error = %e, "startup failed, tearing down");
            self.stop();
            return Err(e);
        }
        Ok(())
    }

    fn start_inner(&mut self) -> Result<()> {
        let segmenter = {
            let mut session = self.session.lock();
            session.connect()?;
            session.options()?;
            session.describe()?;

            let tracks = session.tracks();
            let video_codec = tracks[0].codec;
            let has_audio = tracks.iter().any(|t| t.kind == MediaKind::Audio);
            Segmenter::new(
                self.config.output_dir.clone(),
                video_codec,
                has_audio,
                self.config.segment_duration_ms,
                self.config.max_segments,
            )?
        };

        self.running.store(true, Ordering::SeqCst);
        {
            let mut session = self.session.lock();
            session.setup()?;
            let pipeline = Pipeline::start(session.tracks(), segmenter, self.running.clone())?;
            self.pipeline = Some(pipeline);
            session.play()?;
        }

        let session = self.session.clone();
        let running = self.running.clone();
        let interval = self.config.keepalive_interval;
        self.keepalive = Some(
            thread::Builder::new()
                .name("rtsp-keepalive".to_string())
                .spawn(move || keepalive_loop(session, running, interval))
                .expect("spawn keepalive thread"),
        );

        tracing::info!(output = %self.config.output_dir.display(), "relay started");
        Ok(())
    }

    /// Stop the relay: best-effort TEARDOWN, then drain and join every
    /// worker. Safe to call repeatedly.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.keepalive.take() {
            let _ = handle.join();
        }
        if let Err(e) = self.session.lock().teardown() {
            tracing::warn!(error = %e, "teardown failed");
        }
        if let Some(pipeline) = self.pipeline.take() {
            pipeline.shutdown();
        }
    }

    /// Whether the pipeline is still live. Cleared by [`stop`](Self::stop)
    /// and by fatal muxer errors.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> SessionState {
        self.session.lock().state()
    }

    pub fn stats(&self) -> Option<Arc<PipelineStats>> {
        self.pipeline.as_ref().map(|p| p.stats())
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if self.running.load(Ordering::SeqCst) {
            self.stop();
        }
    }
}

/// Keepalive worker: GET_PARAMETER every `interval` while playing. A
/// failed keepalive means the control channel is gone; the session is
/// unrecoverable, so the running flag is cleared.
fn keepalive_loop(session: Arc<Mutex<Session>>, running: Arc<AtomicBool>, interval: Duration) {
    const STEP: Duration = Duration::from_millis(250);
    let mut since_last = Duration::ZERO;
    while running.load(Ordering::SeqCst) {
        thread::sleep(STEP);
        since_last += STEP;
        if since_last < interval {
            continue;
        }
        since_last = Duration::ZERO;
        if let Err(e) = session.lock().keepalive() {
            tracing::error!(error = %e, "keepalive failed, stopping session");
            running.store(false, Ordering::SeqCst);
            break;
        }
    }
    tracing::debug!("keepalive loop exited");
}
