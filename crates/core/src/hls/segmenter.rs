//! Keyframe-aligned sliding-window segmenter.
//!
//! Consumes access units in PTS order, multiplexes them into TS bytes,
//! and cuts the byte stream into `segment_<N>.ts` files:
//!
//! - A segment opens only on a video keyframe, and every segment starts
//!   with a fresh PAT+PMT so joiners can decode it without history.
//! - A cut happens on the first keyframe at least the configured
//!   duration after the segment opened (PTS delta, 90 ticks per ms).
//! - Closed segments enter a sliding window; when the window exceeds
//!   `max_segments` the oldest file is unlinked. Indices are never
//!   reused.
//! - After every window change the playlist is republished atomically.
//!
//! Audio units are interleaved into whichever segment is open; audio
//! arriving before the first keyframe has opened a segment is discarded,
//! since a segment that starts with audio is not playable.

use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;

use crate::error::{RelayError, Result};
use crate::hls::playlist;
use crate::media::{AccessUnit, CodecId, MediaKind};
use crate::mux::{PID_AUDIO, PID_VIDEO, TsMuxer, pes};

/// A closed segment in the window. The bytes live on disk; this entry
/// carries what the playlist needs.
#[derive(Debug, Clone)]
pub struct Segment {
    pub index: u32,
    pub duration_ms: u64,
    pub filename: String,
}

struct OpenSegment {
    index: u32,
    start_pts: u64,
    last_pts: u64,
    buffer: Vec<u8>,
}

/// Sliding-window TS segmenter and playlist publisher.
pub struct Segmenter {
    dir: PathBuf,
    target_duration_ms: u64,
    max_segments: usize,
    muxer: TsMuxer,
    current: Option<OpenSegment>,
    window: VecDeque<Segment>,
    next_index: u32,
    audio_discarded: u64,
}

impl Segmenter {
    pub fn new(
        dir: PathBuf,
        video_codec: CodecId,
        has_audio: bool,
        target_duration_ms: u64,
        max_segments: usize,
    ) -> Result<Self> {
        Ok(Self {
            dir,
            target_duration_ms,
            max_segments,
            muxer: TsMuxer::new(video_codec, has_audio)?,
            current: None,
            window: VecDeque::new(),
            next_index: 0,
            audio_discarded: 0,
        })
    }

    /// Feed one access unit. Fatal errors (file writes, playlist
    /// publication) poison the output and must stop the session.
    pub fn push(&mut self, unit: &AccessUnit) -> Result<()> {
        match unit.kind {
            MediaKind::Video => self.push_video(unit),
            MediaKind::Audio => self.push_audio(unit),
        }
    }

    fn push_video(&mut self, unit: &AccessUnit) -> Result<()> {
        let should_cut = unit.keyframe
            && match &self.current {
                None => true,
                Some(open) => {
                    (unit.pts90k.saturating_sub(open.start_pts)) / 90 >= self.target_duration_ms
                }
            };

        if should_cut {
            self.finalize_current(Some(unit.pts90k))?;
            let index = self.next_index;
            self.next_index += 1;
            let mut open = OpenSegment {
                index,
                start_pts: unit.pts90k,
                last_pts: unit.pts90k,
                buffer: Vec::with_capacity(256 * 1024),
            };
            self.muxer.write_psi(&mut open.buffer);
            tracing::debug!(index, pts90k = unit.pts90k, "segment opened");
            // The opening video PES carries the segment's PCR.
            let pes = pes::video_pes(&annexb(&unit.data), unit.pts90k);
            self.muxer
                .write_pes(&mut open.buffer, PID_VIDEO, &pes, Some(unit.pts90k));
            self.current = Some(open);
            return Ok(());
        }

        match &mut self.current {
            Some(open) => {
                open.last_pts = open.last_pts.max(unit.pts90k);
                let pes = pes::video_pes(&annexb(&unit.data), unit.pts90k);
                self.muxer.write_pes(&mut open.buffer, PID_VIDEO, &pes, None);
                Ok(())
            }
            // No keyframe seen yet: nothing is decodable, drop.
            None => Ok(()),
        }
    }

    fn push_audio(&mut self, unit: &AccessUnit) -> Result<()> {
        match &mut self.current {
            Some(open) => {
                open.last_pts = open.last_pts.max(unit.pts90k);
                let pes = pes::audio_pes(&unit.data, unit.pts90k)?;
                self.muxer.write_pes(&mut open.buffer, PID_AUDIO, &pes, None);
                Ok(())
            }
            None => {
                self.audio_discarded += 1;
                if self.audio_discarded == 1 {
                    tracing::debug!("discarding audio until the first video keyframe");
                }
                Ok(())
            }
        }
    }

    /// Close the in-progress segment, if any: flush its bytes to disk,
    /// append it to the window, evict past `max_segments`, republish the
    /// playlist.
    ///
    /// `cut_pts` is the PTS of the keyframe triggering the cut; at
    /// shutdown there is none and the last unit's PTS bounds the
    /// duration instead.
    fn finalize_current(&mut self, cut_pts: Option<u64>) -> Result<()> {
        let open = match self.current.take() {
            Some(open) => open,
            None => return Ok(()),
        };
        let end_pts = cut_pts.unwrap_or(open.last_pts);
        let duration_ms = end_pts.saturating_sub(open.start_pts) / 90;
        let filename = format!("segment_{}.ts", open.index);

        fs::write(self.dir.join(&filename), &open.buffer).map_err(|e| {
            RelayError::Segmentation {
                reason: format!("writing {filename}: {e}"),
            }
        })?;
        tracing::info!(
            index = open.index,
            duration_ms,
            bytes = open.buffer.len(),
            "segment closed"
        );

        self.window.push_back(Segment {
            index: open.index,
            duration_ms,
            filename,
        });
        while self.window.len() > self.max_segments {
            if let Some(evicted) = self.window.pop_front() {
                if let Err(e) = fs::remove_file(self.dir.join(&evicted.filename)) {
                    tracing::warn!(file = %evicted.filename, error = %e, "evicted segment unlink failed");
                }
                tracing::debug!(index = evicted.index, "segment evicted from window");
            }
        }

        self.publish_playlist()
    }

    /// Render and atomically publish the playlist. A failed write is
    /// retried once, then treated as fatal.
    fn publish_playlist(&mut self) -> Result<()> {
        let window: Vec<Segment> = self.window.iter().cloned().collect();
        let content = playlist::render(self.target_duration_ms, &window);
        if let Err(first) = playlist::write_atomic(&self.dir, &content) {
            tracing::warn!(error = %first, "playlist write failed, retrying");
            playlist::write_atomic(&self.dir, &content)
                .map_err(|source| RelayError::Playlist { source })?;
        }
        Ok(())
    }

    /// Flush the in-progress segment on shutdown.
    pub fn finish(&mut self) -> Result<()> {
        self.finalize_current(None)
    }

    /// Segments currently in the window (oldest first).
    pub fn window(&self) -> impl Iterator<Item = &Segment> {
        self.window.iter()
    }
}

/// Prefix a NAL unit with the Annex-B start code for PES transport.
fn annexb(nal: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + nal.len());
    out.extend_from_slice(&[0x00, 0x00, 0x00, 0x01]);
    out.extend_from_slice(nal);
    out
}
