//! PES (Packetized Elementary Stream) encapsulation (ISO/IEC 13818-1 §2.4.3.6).
//!
//! One PES packet wraps exactly one access unit:
//!
//! ```text
//! 00 00 01        packet_start_code_prefix
//! E0 | C0         stream_id (video | audio)
//! xx xx           PES_packet_length (0 = unbounded, video only)
//! 80              flags1 (marker bits '10', no scrambling, no priority)
//! 80              flags2 (PTS present, no DTS)
//! 05              PES_header_data_length
//! xx xx xx xx xx  PTS, 33 bits marker-interleaved
//! ...             elementary stream data
//! ```
//!
//! Video carries Annex-B data and uses an unbounded length (0), since a
//! coded frame can exceed the 16-bit length field. Audio carries one ADTS
//! frame and states its actual length.

use crate::error::{RelayError, Result};

/// Video elementary stream id (`1110 xxxx`, stream 0).
pub const STREAM_ID_VIDEO: u8 = 0xE0;
/// Audio elementary stream id (`110x xxxx`, stream 0).
pub const STREAM_ID_AUDIO: u8 = 0xC0;

/// Fixed PES header bytes following `PES_packet_length`:
/// flags1, flags2 (PTS only), header data length.
const HEADER_TAIL_LEN: usize = 3 + 5;

/// Encode a 33-bit PTS into the 5-byte marker-interleaved wire format.
///
/// The `0010` prefix marks a PTS-only field (no DTS).
pub fn encode_pts(pts: u64) -> [u8; 5] {
    let pts = pts & 0x1_FFFF_FFFF;
    [
        0x21 | (((pts >> 29) & 0x0E) as u8),
        ((pts >> 22) & 0xFF) as u8,
        0x01 | (((pts >> 14) & 0xFE) as u8),
        ((pts >> 7) & 0xFF) as u8,
        0x01 | (((pts << 1) & 0xFE) as u8),
    ]
}

fn build(stream_id: u8, packet_length: u16, pts: u64, data: &[u8]) -> Vec<u8> {
    let mut pes = Vec::with_capacity(6 + HEADER_TAIL_LEN + data.len());
    pes.extend_from_slice(&[0x00, 0x00, 0x01, stream_id]);
    pes.extend_from_slice(&packet_length.to_be_bytes());
    pes.push(0x80);
    pes.push(0x80);
    pes.push(0x05);
    pes.extend_from_slice(&encode_pts(pts));
    pes.extend_from_slice(data);
    pes
}

/// Build a video PES packet (unbounded length) around Annex-B data.
pub fn video_pes(annexb: &[u8], pts: u64) -> Vec<u8> {
    build(STREAM_ID_VIDEO, 0, pts, annexb)
}

/// Build an audio PES packet around one ADTS frame.
///
/// Audio states its actual `PES_packet_length`; a frame too large for the
/// 16-bit field is a [`TsEncoding`](RelayError::TsEncoding) error (ADTS
/// frames are bounded at 8 KiB by their own 13-bit length field, so this
/// only fires on corrupt input).
pub fn audio_pes(adts: &[u8], pts: u64) -> Result<Vec<u8>> {
    let length = HEADER_TAIL_LEN + adts.len();
    let length = u16::try_from(length).map_err(|_| RelayError::TsEncoding {
        reason: "audio PES exceeds 16-bit length field",
    })?;
    Ok(build(STREAM_ID_AUDIO, length, pts, adts))
}
