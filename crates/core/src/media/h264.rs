use bytes::Bytes;

use super::rtp::RtpPacket;
use super::{AccessUnit, CodecId, FragmentState, MAX_FRAGMENT_BYTES, MediaKind};
use crate::error::{RelayError, Result};

const NAL_TYPE_IDR: u8 = 5;
const NAL_TYPE_SPS: u8 = 7;
const NAL_TYPE_PPS: u8 = 8;
const NAL_TYPE_STAP_A: u8 = 24;
const NAL_TYPE_FU_A: u8 = 28;

/// H.264 RTP depacketizer (RFC 6184).
///
/// Reconstructs NAL units from RTP payloads. Three packetization modes
/// from RFC 6184 are handled:
///
/// - **Single NAL Unit** (§5.6): the payload is one complete NAL unit,
///   emitted as-is.
///
/// - **STAP-A** (§5.7.1): several NAL units share one packet, each
///   prefixed with a 16-bit big-endian size. All carry the packet's
///   timestamp.
///
/// - **FU-A** (§5.8): one NAL unit split across packets. The original
///   NAL header is reconstructed from the FU indicator's NRI and the FU
///   header's type:
///
///   ```text
///   FU indicator:  [F|NRI|Type=28]     (1 byte)
///   FU header:     [S|E|R|NAL_Type]    (1 byte)
///   Fragment data: [...]
///   ```
///
/// STAP-B, MTAP, and FU-B (§5.7.2, §5.8) require interleaved mode,
/// which is never negotiated here; they are rejected.
///
/// ## Parameter set caching
///
/// SPS and PPS NAL units are cached as they appear, in the stream or
/// seeded from SDP `sprop-parameter-sets`. An IDR that was not directly
/// preceded by in-band parameter sets gets the cached SPS/PPS re-emitted
/// in front of it, so that every segment that opens on that IDR decodes
/// on its own.
///
/// ## Keyframe flag
///
/// Set for IDR slices and parameter sets (types 5, 7, 8); the segmenter
/// only opens segments on flagged units.
pub struct H264Depacketizer {
    state: FragmentState<u8>,
    sps: Option<Bytes>,
    pps: Option<Bytes>,
    /// Parameter sets emitted since the last coded slice; when true an
    /// arriving IDR is already self-contained.
    params_just_emitted: bool,
}

impl H264Depacketizer {
    /// Create a depacketizer, optionally seeded with SPS/PPS decoded
    /// from SDP `sprop-parameter-sets`.
    pub fn new(sps: Option<Bytes>, pps: Option<Bytes>) -> Self {
        Self {
            state: FragmentState::Idle,
            sps,
            pps,
            params_just_emitted: false,
        }
    }

    pub fn reset(&mut self) {
        self.state = FragmentState::Idle;
    }

    pub fn depacketize(&mut self, packet: &RtpPacket, pts90k: u64) -> Result<Vec<AccessUnit>> {
        let payload = &packet.payload;
        if payload.is_empty() {
            return Err(err("empty payload"));
        }

        let indicator = payload[0];
        if indicator & 0x80 != 0 {
            return Err(err("forbidden bit set"));
        }

        match indicator & 0x1F {
            1..=23 => {
                let mut units = Vec::new();
                self.emit_nal(&mut units, payload.clone(), pts90k);
                Ok(units)
            }
            NAL_TYPE_STAP_A => self.depacketize_stap_a(&payload[1..], pts90k),
            NAL_TYPE_FU_A => self.depacketize_fu_a(payload, pts90k),
            25..=27 => Err(err("STAP-B/MTAP requires interleaved mode")),
            _ => Err(err("unsupported NAL unit type")),
        }
    }

    /// STAP-A: iterate `size(u16 BE) | nalu` aggregates.
    fn depacketize_stap_a(&mut self, mut data: &[u8], pts90k: u64) -> Result<Vec<AccessUnit>> {
        let mut units = Vec::new();
        while !data.is_empty() {
            if data.len() < 2 {
                return Err(err("truncated STAP-A size"));
            }
            let size = u16::from_be_bytes([data[0], data[1]]) as usize;
            data = &data[2..];
            if size == 0 || size > data.len() {
                return Err(err("STAP-A aggregate exceeds payload"));
            }
            self.emit_nal(&mut units, Bytes::copy_from_slice(&data[..size]), pts90k);
            data = &data[size..];
        }
        if units.is_empty() {
            return Err(err("empty STAP-A"));
        }
        Ok(units)
    }

    /// FU-A reassembly. `S=1` opens a fragment buffer with the
    /// reconstructed NAL header, middles append, `E=1` completes.
    /// Any inconsistency discards the buffer and errors.
    fn depacketize_fu_a(&mut self, payload: &Bytes, pts90k: u64) -> Result<Vec<AccessUnit>> {
        if payload.len() < 2 {
            return Err(err("FU-A shorter than two bytes"));
        }
        let fu_header = payload[1];
        let start = fu_header & 0x80 != 0;
        let end = fu_header & 0x40 != 0;
        let fragment = &payload[2..];

        if start {
            if matches!(self.state, FragmentState::Reassembling { .. }) {
                self.reset();
                return Err(err("FU-A start while reassembling"));
            }
            // Reconstructed header: F=0, NRI from the indicator, type
            // from the FU header.
            let header = (payload[0] & 0x60) | (fu_header & 0x1F);
            let mut buffer = Vec::with_capacity(2 + fragment.len());
            buffer.push(header);
            buffer.extend_from_slice(fragment);
            self.state = FragmentState::Reassembling { header, buffer };
            return Ok(Vec::new());
        }

        let buffer = match &mut self.state {
            FragmentState::Idle => return Err(err("FU-A continuation without start")),
            FragmentState::Reassembling { buffer, .. } => buffer,
        };
        if buffer.len() + fragment.len() > MAX_FRAGMENT_BYTES {
            self.reset();
            return Err(err("FU-A reassembly exceeds size cap"));
        }
        buffer.extend_from_slice(fragment);

        if !end {
            return Ok(Vec::new());
        }
        let nal = match std::mem::replace(&mut self.state, FragmentState::Idle) {
            FragmentState::Reassembling { buffer, .. } => Bytes::from(buffer),
            FragmentState::Idle => unreachable!(),
        };
        let mut units = Vec::new();
        self.emit_nal(&mut units, nal, pts90k);
        Ok(units)
    }

    /// Emit one NAL unit, maintaining the parameter-set cache and
    /// re-emitting cached SPS/PPS in front of bare IDRs.
    fn emit_nal(&mut self, units: &mut Vec<AccessUnit>, nal: Bytes, pts90k: u64) {
        let nal_type = match nal.first() {
            Some(header) => header & 0x1F,
            None => return,
        };

        match nal_type {
            NAL_TYPE_SPS => {
                self.sps = Some(nal.clone());
                self.params_just_emitted = true;
                tracing::debug!(bytes = nal.len(), "SPS cached from stream");
            }
            NAL_TYPE_PPS => {
                self.pps = Some(nal.clone());
                self.params_just_emitted = true;
                tracing::debug!(bytes = nal.len(), "PPS cached from stream");
            }
            NAL_TYPE_IDR => {
                if !self.params_just_emitted {
                    for cached in [self.sps.clone(), self.pps.clone()].into_iter().flatten() {
                        units.push(access_unit(cached, pts90k, true));
                    }
                }
                self.params_just_emitted = false;
            }
            1..=4 => self.params_just_emitted = false,
            _ => {}
        }

        let keyframe = matches!(nal_type, NAL_TYPE_IDR | NAL_TYPE_SPS | NAL_TYPE_PPS);
        units.push(access_unit(nal, pts90k, keyframe));
    }
}

fn access_unit(data: Bytes, pts90k: u64, keyframe: bool) -> AccessUnit {
    AccessUnit {
        kind: MediaKind::Video,
        codec: CodecId::H264,
        pts90k,
        keyframe,
        data,
    }
}

fn err(reason: &'static str) -> RelayError {
    RelayError::Media {
        codec: "h264",
        reason,
    }
}
