//! Media codecs and RTP depacketization.
//!
//! This module turns ordered RTP packets back into elementary access
//! units: complete NAL units for video, ADTS-framed raw data blocks for
//! audio. It is the inverse of a packetizer; fragmentation is reassembled
//! and aggregation is split apart.
//!
//! ## Supported payload formats
//!
//! | Codec | Module | RFC | Modes |
//! |-------|--------|-----|-------|
//! | H.264 | [`h264`] | [RFC 6184](https://tools.ietf.org/html/rfc6184) | Single NAL, STAP-A, FU-A |
//! | H.265 | [`h265`] | [RFC 7798](https://tools.ietf.org/html/rfc7798) | Single NAL, AP, FU |
//! | AAC | [`aac`] | [RFC 3640](https://tools.ietf.org/html/rfc3640) | MPEG4-GENERIC, AAC-hbr |
//!
//! ## Pipeline position
//!
//! [`rtp`] parses datagrams into [`rtp::RtpPacket`]s, [`jitter`] restores
//! sequence order, and a [`CodecDepacketizer`] emits [`AccessUnit`]s for
//! the muxer. The codec set is closed: a session carries exactly one
//! video depacketizer (H.264 or H.265) and at most one AAC depacketizer,
//! so dispatch is an enum rather than an open trait object.

pub mod aac;
pub mod h264;
pub mod h265;
pub mod jitter;
pub mod rtp;

use bytes::Bytes;

use crate::error::Result;
use rtp::RtpPacket;

/// Whether a track carries video or audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
}

/// Codec carried by a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecId {
    H264,
    H265,
    Aac,
}

impl CodecId {
    /// Codec name as it appears in logs and error messages.
    pub fn name(self) -> &'static str {
        match self {
            Self::H264 => "h264",
            Self::H265 => "h265",
            Self::Aac => "aac",
        }
    }
}

/// One decodable media unit, ready for PES encapsulation.
///
/// For video this is a single NAL unit without a start code (the muxer
/// prepends `00 00 00 01` when building the PES). For audio it is one
/// ADTS frame: 7-byte header plus the raw AAC data block.
#[derive(Debug, Clone)]
pub struct AccessUnit {
    pub kind: MediaKind,
    pub codec: CodecId,
    /// Presentation timestamp in 90 kHz units, re-based to stream start.
    pub pts90k: u64,
    /// Video: unit belongs to a random-access point (IDR/CRA or a
    /// parameter set). Audio: always true, every frame stands alone.
    pub keyframe: bool,
    pub data: Bytes,
}

/// Reassembly state for fragmented NAL units (FU-A / FU).
///
/// `H` is the reconstructed NAL header: one byte for H.264, two for
/// H.265. Every error edge returns to `Idle` and discards the buffer.
#[derive(Debug)]
pub(crate) enum FragmentState<H> {
    Idle,
    Reassembling { header: H, buffer: Vec<u8> },
}

/// Upper bound on a single reassembled NAL unit. A fragment stream that
/// exceeds this is treated as corrupt and dropped.
pub(crate) const MAX_FRAGMENT_BYTES: usize = 1 << 20;

/// Codec-specific depacketizer for one track.
///
/// Consumes RTP packets in sequence order and yields zero or more access
/// units per packet. `reset` discards partial reassembly state; the
/// pipeline calls it after any per-packet error.
pub enum CodecDepacketizer {
    H264(h264::H264Depacketizer),
    H265(h265::H265Depacketizer),
    Aac(aac::AacDepacketizer),
}

impl CodecDepacketizer {
    /// Parse one ordered RTP packet. `pts90k` is the packet's RTP
    /// timestamp already re-based to the 90 kHz mux clock.
    pub fn depacketize(&mut self, packet: &RtpPacket, pts90k: u64) -> Result<Vec<AccessUnit>> {
        match self {
            Self::H264(d) => d.depacketize(packet, pts90k),
            Self::H265(d) => d.depacketize(packet, pts90k),
            Self::Aac(d) => d.depacketize(packet, pts90k),
        }
    }

    /// Drop any partial fragment state.
    pub fn reset(&mut self) {
        match self {
            Self::H264(d) => d.reset(),
            Self::H265(d) => d.reset(),
            Self::Aac(_) => {}
        }
    }

    pub fn codec(&self) -> CodecId {
        match self {
            Self::H264(_) => CodecId::H264,
            Self::H265(_) => CodecId::H265,
            Self::Aac(_) => CodecId::Aac,
        }
    }
}
