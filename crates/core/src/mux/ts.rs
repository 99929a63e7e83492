//! MPEG-2 Transport Stream packet writer (ISO/IEC 13818-1 §2.4).
//!
//! Produces 188-byte TS packets from PSI sections and PES packets:
//!
//! ```text
//! byte 0   0x47 sync
//! byte 1   TEI(0) | PUSI | priority(0) | PID[12:8]
//! byte 2   PID[7:0]
//! byte 3   scrambling(00) | adaptation_field_control | continuity_counter
//! bytes 4.. adaptation field (optional), payload
//! ```
//!
//! ## PID plan
//!
//! | PID | Carries |
//! |-----|---------|
//! | 0x0000 | PAT |
//! | 0x1000 | PMT |
//! | 0x0100 | video elementary stream, PCR |
//! | 0x0101 | audio elementary stream |
//!
//! The muxer tracks one continuity counter per PID. Counters advance only
//! on payload-bearing packets (adaptation_field_control 01 or 11); this
//! writer never emits adaptation-only packets. The final packet of a PES
//! is brought to 188 bytes with adaptation-field stuffing, never with
//! filler in the payload area.

use crate::error::{RelayError, Result};
use crate::media::CodecId;
use crate::mux::crc::crc32_mpeg2;

/// Size of every TS packet.
pub const TS_PACKET_SIZE: usize = 188;
/// Sync byte, first byte of every packet.
pub const SYNC_BYTE: u8 = 0x47;

/// Program Association Table PID.
pub const PID_PAT: u16 = 0x0000;
/// Program Map Table PID.
pub const PID_PMT: u16 = 0x1000;
/// Video elementary stream PID (also the PCR PID).
pub const PID_VIDEO: u16 = 0x0100;
/// Audio elementary stream PID.
pub const PID_AUDIO: u16 = 0x0101;

const PROGRAM_NUMBER: u16 = 1;
const TRANSPORT_STREAM_ID: u16 = 1;

const STREAM_TYPE_H264: u8 = 0x1B;
const STREAM_TYPE_H265: u8 = 0x24;
const STREAM_TYPE_AAC_ADTS: u8 = 0x0F;

/// Payload bytes available in a packet with no adaptation field.
const MAX_PAYLOAD: usize = TS_PACKET_SIZE - 4;

/// TS packet writer for one program with a video and optional audio stream.
pub struct TsMuxer {
    video_stream_type: u8,
    has_audio: bool,
    pat_cc: u8,
    pmt_cc: u8,
    video_cc: u8,
    audio_cc: u8,
}

impl TsMuxer {
    /// Create a muxer for the given video codec, optionally with an AAC
    /// audio stream.
    pub fn new(video_codec: CodecId, has_audio: bool) -> Result<Self> {
        let video_stream_type = match video_codec {
            CodecId::H264 => STREAM_TYPE_H264,
            CodecId::H265 => STREAM_TYPE_H265,
            CodecId::Aac => {
                return Err(RelayError::TsEncoding {
                    reason: "program requires a video codec",
                });
            }
        };
        Ok(Self {
            video_stream_type,
            has_audio,
            pat_cc: 0,
            pmt_cc: 0,
            video_cc: 0,
            audio_cc: 0,
        })
    }

    fn next_cc(&mut self, pid: u16) -> u8 {
        let slot = match pid {
            PID_PAT => &mut self.pat_cc,
            PID_PMT => &mut self.pmt_cc,
            PID_VIDEO => &mut self.video_cc,
            _ => &mut self.audio_cc,
        };
        let cc = *slot;
        *slot = (cc + 1) & 0x0F;
        cc
    }

    /// Append a PAT packet followed by a PMT packet to `out`.
    ///
    /// Emitted at the start of every segment so each segment is
    /// independently decodable.
    pub fn write_psi(&mut self, out: &mut Vec<u8>) {
        let pat = self.pat_section();
        self.write_section(out, PID_PAT, &pat);
        let pmt = self.pmt_section();
        self.write_section(out, PID_PMT, &pmt);
    }

    /// PAT: one program mapping [`PROGRAM_NUMBER`] to [`PID_PMT`].
    fn pat_section(&self) -> Vec<u8> {
        let mut section = Vec::with_capacity(16);
        section.push(0x00); // table_id
        // section_syntax_indicator=1, '0', reserved '11', length in the
        // low 12 bits: 5 fixed bytes + 4 program bytes + 4 CRC bytes.
        let section_length: u16 = 5 + 4 + 4;
        section.push(0xB0 | ((section_length >> 8) as u8 & 0x0F));
        section.push(section_length as u8);
        section.extend_from_slice(&TRANSPORT_STREAM_ID.to_be_bytes());
        section.push(0xC1); // reserved '11', version 0, current_next 1
        section.push(0x00); // section_number
        section.push(0x00); // last_section_number
        section.extend_from_slice(&PROGRAM_NUMBER.to_be_bytes());
        section.push(0xE0 | ((PID_PMT >> 8) as u8 & 0x1F));
        section.push(PID_PMT as u8);
        let crc = crc32_mpeg2(&section);
        section.extend_from_slice(&crc.to_be_bytes());
        section
    }

    /// PMT: program 1, PCR on the video PID, one video and at most one
    /// audio elementary stream, no descriptors.
    fn pmt_section(&self) -> Vec<u8> {
        let es_count: u16 = if self.has_audio { 2 } else { 1 };
        let mut section = Vec::with_capacity(32);
        section.push(0x02); // table_id
        let section_length: u16 = 9 + 5 * es_count + 4;
        section.push(0xB0 | ((section_length >> 8) as u8 & 0x0F));
        section.push(section_length as u8);
        section.extend_from_slice(&PROGRAM_NUMBER.to_be_bytes());
        section.push(0xC1); // reserved '11', version 0, current_next 1
        section.push(0x00); // section_number
        section.push(0x00); // last_section_number
        section.push(0xE0 | ((PID_VIDEO >> 8) as u8 & 0x1F));
        section.push(PID_VIDEO as u8);
        section.push(0xF0); // reserved '1111', program_info_length=0
        section.push(0x00);

        section.push(self.video_stream_type);
        section.push(0xE0 | ((PID_VIDEO >> 8) as u8 & 0x1F));
        section.push(PID_VIDEO as u8);
        section.push(0xF0); // reserved '1111', ES_info_length=0
        section.push(0x00);

        if self.has_audio {
            section.push(STREAM_TYPE_AAC_ADTS);
            section.push(0xE0 | ((PID_AUDIO >> 8) as u8 & 0x1F));
            section.push(PID_AUDIO as u8);
            section.push(0xF0);
            section.push(0x00);
        }

        let crc = crc32_mpeg2(&section);
        section.extend_from_slice(&crc.to_be_bytes());
        section
    }

    /// Write a PSI section as a single TS packet: pointer_field, section,
    /// 0xFF fill to 188 bytes. PAT and PMT both fit one packet.
    fn write_section(&mut self, out: &mut Vec<u8>, pid: u16, section: &[u8]) {
        let cc = self.next_cc(pid);
        out.push(SYNC_BYTE);
        out.push(0x40 | ((pid >> 8) as u8 & 0x1F)); // PUSI=1
        out.push(pid as u8);
        out.push(0x10 | cc); // payload only
        out.push(0x00); // pointer_field
        out.extend_from_slice(section);
        let fill = MAX_PAYLOAD - 1 - section.len();
        out.resize(out.len() + fill, 0xFF);
    }

    /// Split one PES packet into TS packets on `pid`, appending to `out`.
    ///
    /// The first packet sets PUSI and, when `pcr` is given, carries an
    /// adaptation field with the PCR (33-bit base at 90 kHz, extension 0).
    /// The last packet is padded to 188 bytes with adaptation-field
    /// stuffing.
    pub fn write_pes(&mut self, out: &mut Vec<u8>, pid: u16, pes: &[u8], pcr: Option<u64>) {
        let mut offset = 0;
        let mut first = true;

        while offset < pes.len() {
            let remaining = pes.len() - offset;
            let with_pcr = first && pcr.is_some();
            let cc = self.next_cc(pid);

            out.push(SYNC_BYTE);
            let pusi = if first { 0x40 } else { 0x00 };
            out.push(pusi | ((pid >> 8) as u8 & 0x1F));
            out.push(pid as u8);

            if !with_pcr && remaining >= MAX_PAYLOAD {
                // Full packet, payload only.
                out.push(0x10 | cc);
                out.extend_from_slice(&pes[offset..offset + MAX_PAYLOAD]);
                offset += MAX_PAYLOAD;
            } else {
                // Adaptation field present: PCR and/or stuffing.
                out.push(0x30 | cc);
                // One byte of the 184 goes to adaptation_field_length.
                let max_payload = if with_pcr {
                    MAX_PAYLOAD - 1 - 7
                } else {
                    MAX_PAYLOAD - 1
                };
                let payload_len = remaining.min(max_payload);
                let af_len = (MAX_PAYLOAD - 1 - payload_len) as u8;
                out.push(af_len);
                if af_len > 0 {
                    let flags = if with_pcr { 0x10 } else { 0x00 };
                    out.push(flags);
                    if with_pcr {
                        out.extend_from_slice(&encode_pcr(pcr.unwrap_or(0)));
                    }
                    let used = 1 + if with_pcr { 6 } else { 0 };
                    out.resize(out.len() + af_len as usize - used, 0xFF);
                }
                out.extend_from_slice(&pes[offset..offset + payload_len]);
                offset += payload_len;
            }
            first = false;
        }
    }
}

/// Encode a 42-bit PCR field: 33-bit base, 6 reserved bits, 9-bit
/// extension (always 0 here).
fn encode_pcr(base: u64) -> [u8; 6] {
    let base = base & 0x1_FFFF_FFFF;
    [
        (base >> 25) as u8,
        (base >> 17) as u8,
        (base >> 9) as u8,
        (base >> 1) as u8,
        (((base & 1) << 7) as u8) | 0x7E,
        0x00,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mux::pes;

    fn packets(data: &[u8]) -> Vec<&[u8]> {
        assert_eq!(data.len() % TS_PACKET_SIZE, 0, "not packet aligned");
        data.chunks(TS_PACKET_SIZE).collect()
    }

    fn pid_of(pkt: &[u8]) -> u16 {
        (((pkt[1] & 0x1F) as u16) << 8) | pkt[2] as u16
    }

    #[test]
    fn psi_is_two_full_packets() {
        let mut mux = TsMuxer::new(CodecId::H264, true).unwrap();
        let mut out = Vec::new();
        mux.write_psi(&mut out);
        let pkts = packets(&out);
        assert_eq!(pkts.len(), 2);
        assert_eq!(pid_of(pkts[0]), PID_PAT);
        assert_eq!(pid_of(pkts[1]), PID_PMT);
        for pkt in &pkts {
            assert_eq!(pkt[0], SYNC_BYTE);
            assert_eq!(pkt[1] & 0x40, 0x40, "PSI packets set PUSI");
        }
    }

    #[test]
    fn pat_section_crc_round_trips() {
        let mux = TsMuxer::new(CodecId::H264, true).unwrap();
        let section = mux.pat_section();
        let body = &section[..section.len() - 4];
        let stored = u32::from_be_bytes(section[section.len() - 4..].try_into().unwrap());
        assert_eq!(crc32_mpeg2(body), stored);
    }

    #[test]
    fn pmt_section_crc_round_trips() {
        let mux = TsMuxer::new(CodecId::H265, true).unwrap();
        let section = mux.pmt_section();
        let body = &section[..section.len() - 4];
        let stored = u32::from_be_bytes(section[section.len() - 4..].try_into().unwrap());
        assert_eq!(crc32_mpeg2(body), stored);
    }

    #[test]
    fn pat_maps_program_to_pmt_pid() {
        let mux = TsMuxer::new(CodecId::H264, false).unwrap();
        let section = mux.pat_section();
        // Last 8 bytes: program_number(2), PMT PID(2), CRC(4).
        let n = section.len();
        assert_eq!(u16::from_be_bytes([section[n - 8], section[n - 7]]), 1);
        let pid = (((section[n - 6] & 0x1F) as u16) << 8) | section[n - 5] as u16;
        assert_eq!(pid, PID_PMT);
    }

    #[test]
    fn pmt_stream_types() {
        let mux = TsMuxer::new(CodecId::H264, true).unwrap();
        let section = mux.pmt_section();
        assert_eq!(section[12], STREAM_TYPE_H264);
        assert_eq!(section[17], STREAM_TYPE_AAC_ADTS);

        let mux = TsMuxer::new(CodecId::H265, false).unwrap();
        let section = mux.pmt_section();
        assert_eq!(section[12], STREAM_TYPE_H265);
        assert_eq!(section.len(), 3 + 9 + 5 + 4);
    }

    #[test]
    fn audio_codec_rejected_as_video() {
        assert!(TsMuxer::new(CodecId::Aac, true).is_err());
    }

    #[test]
    fn small_pes_single_stuffed_packet() {
        let mut mux = TsMuxer::new(CodecId::H264, false).unwrap();
        let pes = pes::video_pes(&[0x00, 0x00, 0x00, 0x01, 0x65, 0xAA], 0);
        let mut out = Vec::new();
        mux.write_pes(&mut out, PID_VIDEO, &pes, None);
        let pkts = packets(&out);
        assert_eq!(pkts.len(), 1);
        let pkt = pkts[0];
        assert_eq!(pkt[1] & 0x40, 0x40, "PUSI on first packet");
        assert_eq!(pkt[3] >> 4 & 0x03, 0x03, "adaptation + payload");
        // Payload ends exactly at byte 188, PES data at the tail.
        assert_eq!(&pkt[TS_PACKET_SIZE - pes.len()..], &pes[..]);
        // Stuffing lives in the adaptation field.
        let af_len = pkt[4] as usize;
        assert_eq!(4 + 1 + af_len + pes.len(), TS_PACKET_SIZE);
    }

    #[test]
    fn large_pes_spans_packets_with_continuity() {
        let mut mux = TsMuxer::new(CodecId::H264, false).unwrap();
        let frame = vec![0xABu8; 1000];
        let pes = pes::video_pes(&frame, 3000);
        let mut out = Vec::new();
        mux.write_pes(&mut out, PID_VIDEO, &pes, None);
        let pkts = packets(&out);
        assert!(pkts.len() > 1);
        assert_eq!(pkts[0][1] & 0x40, 0x40);
        for (i, pkt) in pkts.iter().enumerate() {
            assert_eq!(pkt[0], SYNC_BYTE);
            assert_eq!(pkt[3] & 0x0F, (i & 0x0F) as u8, "continuity counter");
            if i > 0 {
                assert_eq!(pkt[1] & 0x40, 0, "PUSI only on first packet");
            }
        }
        // Reassemble payloads and compare to the original PES.
        let mut got = Vec::new();
        for pkt in pkts {
            let afc = (pkt[3] >> 4) & 0x03;
            let start = if afc == 0x03 { 4 + 1 + pkt[4] as usize } else { 4 };
            got.extend_from_slice(&pkt[start..]);
        }
        assert_eq!(got, pes);
    }

    #[test]
    fn pcr_on_first_packet_only() {
        let mut mux = TsMuxer::new(CodecId::H264, false).unwrap();
        let frame = vec![0x11u8; 500];
        let pes = pes::video_pes(&frame, 90_000);
        let mut out = Vec::new();
        mux.write_pes(&mut out, PID_VIDEO, &pes, Some(90_000));
        let pkts = packets(&out);
        let first = pkts[0];
        assert_eq!((first[3] >> 4) & 0x03, 0x03);
        let af_len = first[4] as usize;
        assert!(af_len >= 7);
        assert_eq!(first[5] & 0x10, 0x10, "PCR flag");
        // PCR base round-trip.
        let b = &first[6..12];
        let base = ((b[0] as u64) << 25)
            | ((b[1] as u64) << 17)
            | ((b[2] as u64) << 9)
            | ((b[3] as u64) << 1)
            | ((b[4] as u64) >> 7);
        assert_eq!(base, 90_000);
        for pkt in &pkts[1..] {
            let afc = (pkt[3] >> 4) & 0x03;
            if afc == 0x03 {
                assert_eq!(pkt[5] & 0x10, 0, "no PCR after first packet");
            }
        }
    }

    #[test]
    fn continuity_separate_per_pid() {
        let mut mux = TsMuxer::new(CodecId::H264, true).unwrap();
        let mut out = Vec::new();
        let vpes = pes::video_pes(&[0x65u8; 10], 0);
        let apes = pes::audio_pes(&[0xFFu8; 10], 0).unwrap();
        mux.write_pes(&mut out, PID_VIDEO, &vpes, None);
        mux.write_pes(&mut out, PID_AUDIO, &apes, None);
        mux.write_pes(&mut out, PID_VIDEO, &vpes, None);
        let pkts = packets(&out);
        let video_ccs: Vec<u8> = pkts
            .iter()
            .filter(|p| pid_of(p) == PID_VIDEO)
            .map(|p| p[3] & 0x0F)
            .collect();
        assert_eq!(video_ccs, vec![0, 1]);
        let audio_ccs: Vec<u8> = pkts
            .iter()
            .filter(|p| pid_of(p) == PID_AUDIO)
            .map(|p| p[3] & 0x0F)
            .collect();
        assert_eq!(audio_ccs, vec![0]);
    }

    #[test]
    fn exact_boundary_no_stuffing() {
        // PES sized to exactly one full payload.
        let mut mux = TsMuxer::new(CodecId::H264, false).unwrap();
        let data_len = MAX_PAYLOAD - 14; // 14-byte video PES header
        let pes = pes::video_pes(&vec![0x22u8; data_len], 0);
        assert_eq!(pes.len(), MAX_PAYLOAD);
        let mut out = Vec::new();
        mux.write_pes(&mut out, PID_VIDEO, &pes, None);
        let pkts = packets(&out);
        assert_eq!(pkts.len(), 1);
        assert_eq!((pkts[0][3] >> 4) & 0x03, 0x01, "payload only, no AF");
    }
}
