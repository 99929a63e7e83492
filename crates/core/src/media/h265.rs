use bytes::Bytes;

use super::rtp::RtpPacket;
use super::{AccessUnit, CodecId, FragmentState, MAX_FRAGMENT_BYTES, MediaKind};
use crate::error::{RelayError, Result};

const NAL_TYPE_BLA_W_LP: u8 = 16;
const NAL_TYPE_CRA: u8 = 21;
const NAL_TYPE_VPS: u8 = 32;
const NAL_TYPE_SPS: u8 = 33;
const NAL_TYPE_PPS: u8 = 34;
const NAL_TYPE_AP: u8 = 48;
const NAL_TYPE_FU: u8 = 49;

/// H.265 RTP depacketizer (RFC 7798).
///
/// Same shape as the H.264 depacketizer but with the two-byte NAL
/// header:
///
/// ```text
/// +---------------+---------------+
/// |F|   Type(6)   |  LayerId(6)   | TID(3)
/// +---------------+---------------+
/// ```
///
/// - Types 0..=40 are complete NAL units, emitted as-is.
/// - Type 48 (AP) aggregates `size(u16 BE) | nalu` pairs after the
///   two-byte payload header.
/// - Type 49 (FU) fragments one NAL unit; the FU header byte follows
///   the payload header (`S|E|FuType(6)`), and the original NAL header
///   is rebuilt from the FU type plus the outer LayerId/TID.
/// - Type 50 (PACI) and the reserved range are rejected.
///
/// Keyframes are the IRAP types (BLA 16..18, IDR 19..20, CRA 21) and
/// the parameter sets (VPS/SPS/PPS); cached parameter sets are
/// re-emitted before an IRAP that arrives bare, mirroring the H.264
/// behavior.
pub struct H265Depacketizer {
    state: FragmentState<[u8; 2]>,
    vps: Option<Bytes>,
    sps: Option<Bytes>,
    pps: Option<Bytes>,
    params_just_emitted: bool,
}

impl H265Depacketizer {
    /// Create a depacketizer, optionally seeded from SDP
    /// `sprop-vps`/`sprop-sps`/`sprop-pps`.
    pub fn new(vps: Option<Bytes>, sps: Option<Bytes>, pps: Option<Bytes>) -> Self {
        Self {
            state: FragmentState::Idle,
            vps,
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
        if payload.len() < 2 {
            return Err(err("payload shorter than NAL header"));
        }
        if payload[0] & 0x80 != 0 {
            return Err(err("forbidden bit set"));
        }

        match nal_type(payload[0]) {
            0..=40 => {
                let mut units = Vec::new();
                self.emit_nal(&mut units, payload.clone(), pts90k);
                Ok(units)
            }
            NAL_TYPE_AP => self.depacketize_ap(&payload[2..], pts90k),
            NAL_TYPE_FU => self.depacketize_fu(payload, pts90k),
            50 => Err(err("PACI not supported")),
            _ => Err(err("reserved NAL unit type")),
        }
    }

    fn depacketize_ap(&mut self, mut data: &[u8], pts90k: u64) -> Result<Vec<AccessUnit>> {
        let mut units = Vec::new();
        while !data.is_empty() {
            if data.len() < 2 {
                return Err(err("truncated AP size"));
            }
            let size = u16::from_be_bytes([data[0], data[1]]) as usize;
            data = &data[2..];
            if size < 2 || size > data.len() {
                return Err(err("AP aggregate exceeds payload"));
            }
            self.emit_nal(&mut units, Bytes::copy_from_slice(&data[..size]), pts90k);
            data = &data[size..];
        }
        if units.is_empty() {
            return Err(err("empty AP"));
        }
        Ok(units)
    }

    fn depacketize_fu(&mut self, payload: &Bytes, pts90k: u64) -> Result<Vec<AccessUnit>> {
        if payload.len() < 3 {
            return Err(err("FU shorter than three bytes"));
        }
        let fu_header = payload[2];
        let start = fu_header & 0x80 != 0;
        let end = fu_header & 0x40 != 0;
        let fu_type = fu_header & 0x3F;
        let fragment = &payload[3..];

        if start {
            if matches!(self.state, FragmentState::Reassembling { .. }) {
                self.reset();
                return Err(err("FU start while reassembling"));
            }
            // Rebuild the NAL header: F=0, type from the FU header,
            // LayerId/TID carried over from the outer header.
            let header = [(fu_type << 1) | (payload[0] & 0x01), payload[1]];
            let mut buffer = Vec::with_capacity(4 + fragment.len());
            buffer.extend_from_slice(&header);
            buffer.extend_from_slice(fragment);
            self.state = FragmentState::Reassembling { header, buffer };
            return Ok(Vec::new());
        }

        let buffer = match &mut self.state {
            FragmentState::Idle => return Err(err("FU continuation without start")),
            FragmentState::Reassembling { buffer, .. } => buffer,
        };
        if buffer.len() + fragment.len() > MAX_FRAGMENT_BYTES {
            self.reset();
            return Err(err("FU reassembly exceeds size cap"));
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

    fn emit_nal(&mut self, units: &mut Vec<AccessUnit>, nal: Bytes, pts90k: u64) {
        if nal.len() < 2 {
            return;
        }
        let nal_type = nal_type(nal[0]);

        match nal_type {
            NAL_TYPE_VPS => {
                self.vps = Some(nal.clone());
                self.params_just_emitted = true;
                tracing::debug!(bytes = nal.len(), "VPS cached from stream");
            }
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
            NAL_TYPE_BLA_W_LP..=NAL_TYPE_CRA => {
                if !self.params_just_emitted {
                    let cached = [self.vps.clone(), self.sps.clone(), self.pps.clone()];
                    for set in cached.into_iter().flatten() {
                        units.push(access_unit(set, pts90k, true));
                    }
                }
                self.params_just_emitted = false;
            }
            // Other VCL slices end any run of parameter sets.
            0..=31 => self.params_just_emitted = false,
            _ => {}
        }

        let keyframe = matches!(
            nal_type,
            NAL_TYPE_BLA_W_LP..=NAL_TYPE_CRA | NAL_TYPE_VPS | NAL_TYPE_SPS | NAL_TYPE_PPS
        );
        units.push(access_unit(nal, pts90k, keyframe));
    }
}

fn nal_type(first_header_byte: u8) -> u8 {
    (first_header_byte >> 1) & 0x3F
}

fn access_unit(data: Bytes, pts90k: u64, keyframe: bool) -> AccessUnit {
    AccessUnit {
        kind: MediaKind::Video,
        codec: CodecId::H265,
        pts90k,
        keyframe,
        data,
    }
}

fn err(reason: &'static str) -> RelayError {
    RelayError::Media {
        codec: "h265",
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn packet(payload: &[u8]) -> RtpPacket {
        RtpPacket {
            payload_type: 97,
            sequence: 7,
            timestamp: 12345,
            ssrc: 0xDEAD,
            marker: false,
            payload: Bytes::copy_from_slice(payload),
        }
    }

    fn depacketizer() -> H265Depacketizer {
        H265Depacketizer::new(None, None, None)
    }

    #[test]
    fn single_nal_idr_w_radl() {
        // Type 19 (IDR_W_RADL): header byte 0x26.
        let mut d = depacketizer();
        let units = d.depacketize(&packet(&[0x26, 0x01, 0xAF]), 12345).unwrap();
        assert_eq!(units.len(), 1);
        assert!(units[0].keyframe);
        assert_eq!(units[0].pts90k, 12345);
    }

    #[test]
    fn single_nal_trail_not_keyframe() {
        // Type 1 (TRAIL_R): header byte 0x02.
        let mut d = depacketizer();
        let units = d.depacketize(&packet(&[0x02, 0x01, 0xAF]), 0).unwrap();
        assert!(!units[0].keyframe);
    }

    #[test]
    fn fu_three_fragments_reconstructs_header() {
        // Scenario: IDR_N_LP (type 20) split into three FU fragments,
        // outer header 62 01 (type 49, LayerId 0, TID 1).
        let mut d = depacketizer();
        assert!(
            d.depacketize(&packet(&[0x62, 0x01, 0x94, 0x88, 0x84]), 12345)
                .unwrap()
                .is_empty()
        );
        assert!(
            d.depacketize(&packet(&[0x62, 0x01, 0x14, 0x00, 0x01]), 12345)
                .unwrap()
                .is_empty()
        );
        let units = d
            .depacketize(&packet(&[0x62, 0x01, 0x54, 0x02, 0x03]), 12345)
            .unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(
            &units[0].data[..],
            &[0x28, 0x01, 0x88, 0x84, 0x00, 0x01, 0x02, 0x03]
        );
        assert!(units[0].keyframe);
    }

    #[test]
    fn ap_yields_each_aggregate() {
        // AP (type 48, header 0x60 0x01) carrying VPS and SPS.
        let payload = [
            0x60, 0x01, // payload header
            0x00, 0x03, 0x40, 0x01, 0x0C, // VPS (type 32)
            0x00, 0x03, 0x42, 0x01, 0x02, // SPS (type 33)
        ];
        let mut d = depacketizer();
        let units = d.depacketize(&packet(&payload), 0).unwrap();
        assert_eq!(units.len(), 2);
        assert_eq!(&units[0].data[..], &[0x40, 0x01, 0x0C]);
        assert_eq!(&units[1].data[..], &[0x42, 0x01, 0x02]);
        assert!(units.iter().all(|u| u.keyframe));
    }

    #[test]
    fn paci_rejected() {
        let mut d = depacketizer();
        // Type 50: header byte 0x64.
        assert!(d.depacketize(&packet(&[0x64, 0x01, 0x00]), 0).is_err());
    }

    #[test]
    fn fu_continuation_without_start_rejected() {
        let mut d = depacketizer();
        assert!(d.depacketize(&packet(&[0x62, 0x01, 0x14, 0xAA]), 0).is_err());
    }

    #[test]
    fn fu_double_start_resets() {
        let mut d = depacketizer();
        d.depacketize(&packet(&[0x62, 0x01, 0x94, 0xAA]), 0).unwrap();
        assert!(d.depacketize(&packet(&[0x62, 0x01, 0x94, 0xBB]), 0).is_err());
        assert!(matches!(d.state, FragmentState::Idle));
    }

    #[test]
    fn cached_parameter_sets_prepended_before_bare_irap() {
        let vps = Bytes::from_static(&[0x40, 0x01, 0x0C]);
        let sps = Bytes::from_static(&[0x42, 0x01, 0x02]);
        let pps = Bytes::from_static(&[0x44, 0x01, 0xC0]);
        let mut d = H265Depacketizer::new(Some(vps.clone()), Some(sps.clone()), Some(pps.clone()));
        // CRA (type 21): header byte 0x2A.
        let units = d.depacketize(&packet(&[0x2A, 0x01, 0xAF]), 0).unwrap();
        assert_eq!(units.len(), 4);
        assert_eq!(units[0].data, vps);
        assert_eq!(units[1].data, sps);
        assert_eq!(units[2].data, pps);
    }

    #[test]
    fn inline_parameter_sets_not_duplicated() {
        let mut d = depacketizer();
        d.depacketize(&packet(&[0x40, 0x01, 0x0C]), 0).unwrap(); // VPS
        d.depacketize(&packet(&[0x42, 0x01, 0x02]), 0).unwrap(); // SPS
        d.depacketize(&packet(&[0x44, 0x01, 0xC0]), 0).unwrap(); // PPS
        let units = d.depacketize(&packet(&[0x28, 0x01, 0xAF]), 0).unwrap();
        assert_eq!(units.len(), 1, "IRAP after in-band sets stands alone");
    }
}
