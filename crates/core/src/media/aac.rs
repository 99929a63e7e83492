use bytes::{BufMut, Bytes, BytesMut};

use super::rtp::RtpPacket;
use super::{AccessUnit, CodecId, MediaKind};
use crate::error::{RelayError, Result};

/// Samples per AAC frame, fixed for AAC-LC.
const SAMPLES_PER_FRAME: u64 = 1024;

/// ADTS header length without CRC.
const ADTS_HEADER_LEN: usize = 7;

/// AAC RTP depacketizer (RFC 3640, MPEG4-GENERIC in AAC-hbr mode).
///
/// Payload layout:
///
/// ```text
/// AU-headers-length (u16 BE, in bits)
/// AU-header * n     (sizelength + indexlength bits each,
///                    indexdeltalength for headers after the first)
/// AU data           (byte-aligned, concatenated raw data blocks)
/// ```
///
/// With the default 13/3/3 split each AU-header is one big-endian u16:
/// 13 bits of size, 3 bits of index. Interleaving (a non-zero index or
/// index delta) is not supported and rejected.
///
/// Each raw data block is emitted wrapped in a 7-byte ADTS header
/// (AAC-LC profile, no CRC) so the TS audio stream is self-describing.
/// When several AUs share a packet, each later AU advances the PTS by
/// one frame (1024 samples at the negotiated rate).
pub struct AacDepacketizer {
    size_length: u32,
    index_length: u32,
    index_delta_length: u32,
    clock_rate: u32,
    frequency_index: u8,
    channels: u8,
}

impl AacDepacketizer {
    /// Create a depacketizer from negotiated SDP parameters.
    ///
    /// `size_length`/`index_length`/`index_delta_length` come from the
    /// `fmtp` line (defaults 13/3/3); the sampling rate must be one of
    /// the ADTS table rates.
    pub fn new(
        clock_rate: u32,
        channels: u8,
        size_length: u32,
        index_length: u32,
        index_delta_length: u32,
    ) -> Result<Self> {
        let frequency_index = frequency_index(clock_rate).ok_or_else(|| RelayError::Sdp {
            reason: format!("unsupported AAC sampling rate {clock_rate}"),
        })?;
        if size_length == 0 || size_length > 16 || index_length > 8 || index_delta_length > 8 {
            return Err(RelayError::Sdp {
                reason: format!(
                    "unsupported AU header split {size_length}/{index_length}/{index_delta_length}"
                ),
            });
        }
        Ok(Self {
            size_length,
            index_length,
            index_delta_length,
            clock_rate,
            frequency_index,
            channels,
        })
    }

    /// The RFC 3640 AAC-hbr defaults: sizelength 13, indexlength 3,
    /// indexdeltalength 3.
    pub fn with_defaults(clock_rate: u32, channels: u8) -> Result<Self> {
        Self::new(clock_rate, channels, 13, 3, 3)
    }

    pub fn depacketize(&mut self, packet: &RtpPacket, pts90k: u64) -> Result<Vec<AccessUnit>> {
        let payload = &packet.payload;
        if payload.len() < 2 {
            return Err(err("payload shorter than AU-headers-length"));
        }
        let headers_bits = u16::from_be_bytes([payload[0], payload[1]]) as u32;
        let headers_bytes = headers_bits.div_ceil(8) as usize;
        if payload.len() < 2 + headers_bytes {
            return Err(err("AU headers exceed payload"));
        }

        let mut reader = BitReader::new(&payload[2..2 + headers_bytes]);
        let mut sizes = Vec::new();
        let mut consumed_bits = 0;
        while consumed_bits < headers_bits {
            let size = reader.read(self.size_length).ok_or(err("truncated AU header"))?;
            let index_bits = if sizes.is_empty() {
                self.index_length
            } else {
                self.index_delta_length
            };
            let index = reader.read(index_bits).ok_or(err("truncated AU header"))?;
            if index != 0 {
                return Err(err("interleaved AUs not supported"));
            }
            consumed_bits += self.size_length + index_bits;
            sizes.push(size as usize);
        }
        if sizes.is_empty() {
            return Err(err("no AU headers"));
        }

        let mut data = &payload[2 + headers_bytes..];
        let mut units = Vec::with_capacity(sizes.len());
        for (i, size) in sizes.iter().copied().enumerate() {
            if size > data.len() {
                return Err(err("AU data exceeds payload"));
            }
            // Later AUs in the same packet are one frame apart.
            let pts = pts90k + (i as u64 * SAMPLES_PER_FRAME * 90_000) / self.clock_rate as u64;
            units.push(AccessUnit {
                kind: MediaKind::Audio,
                codec: CodecId::Aac,
                pts90k: pts,
                keyframe: true,
                data: self.wrap_adts(&data[..size]),
            });
            data = &data[size..];
        }
        Ok(units)
    }

    /// Prefix one raw data block with a 7-byte ADTS header (no CRC).
    fn wrap_adts(&self, raw: &[u8]) -> Bytes {
        let frame_length = (ADTS_HEADER_LEN + raw.len()) as u32;
        let mut framed = BytesMut::with_capacity(ADTS_HEADER_LEN + raw.len());
        framed.put_u8(0xFF);
        // MPEG-4, layer 00, protection absent.
        framed.put_u8(0xF1);
        // Profile bits 01 = AAC-LC (object type 2).
        framed.put_u8(
            (1 << 6) | (self.frequency_index << 2) | ((self.channels >> 2) & 0x01),
        );
        framed.put_u8(((self.channels & 0x03) << 6) | ((frame_length >> 11) & 0x03) as u8);
        framed.put_u8((frame_length >> 3) as u8);
        // Buffer fullness all-ones (VBR), one raw data block.
        framed.put_u8((((frame_length & 0x07) << 5) as u8) | 0x1F);
        framed.put_u8(0xFC);
        framed.put_slice(raw);
        framed.freeze()
    }
}

/// ADTS sampling_frequency_index table (ISO/IEC 14496-3).
fn frequency_index(rate: u32) -> Option<u8> {
    const RATES: [u32; 13] = [
        96_000, 88_200, 64_000, 48_000, 44_100, 32_000, 24_000, 22_050, 16_000, 12_000, 11_025,
        8_000, 7_350,
    ];
    RATES.iter().position(|&r| r == rate).map(|i| i as u8)
}

/// MSB-first bit reader over a byte slice.
struct BitReader<'a> {
    data: &'a [u8],
    position: u32,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Read `count` bits (at most 16) as a big-endian value.
    fn read(&mut self, count: u32) -> Option<u32> {
        if count == 0 {
            return Some(0);
        }
        if self.position + count > self.data.len() as u32 * 8 {
            return None;
        }
        let mut value = 0u32;
        for _ in 0..count {
            let byte = self.data[(self.position / 8) as usize];
            let bit = (byte >> (7 - self.position % 8)) & 1;
            value = (value << 1) | bit as u32;
            self.position += 1;
        }
        Some(value)
    }
}

fn err(reason: &'static str) -> RelayError {
    RelayError::Media {
        codec: "aac",
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
            sequence: 1,
            timestamp: 48_000,
            ssrc: 0xFEED,
            marker: true,
            payload: Bytes::copy_from_slice(payload),
        }
    }

    fn depacketizer() -> AacDepacketizer {
        AacDepacketizer::with_defaults(48_000, 2).unwrap()
    }

    #[test]
    fn single_au() {
        // Scenario: headers length 16 bits, one header 0x0020
        // (size 4, index 0), then 4 data bytes.
        let mut d = depacketizer();
        let units = d
            .depacketize(&packet(&[0x00, 0x10, 0x00, 0x20, 0x21, 0x12, 0x23, 0x34]), 90_000)
            .unwrap();
        assert_eq!(units.len(), 1);
        let au = &units[0];
        assert_eq!(au.pts90k, 90_000);
        assert!(au.keyframe);
        assert_eq!(au.data.len(), ADTS_HEADER_LEN + 4);
        assert_eq!(&au.data[ADTS_HEADER_LEN..], &[0x21, 0x12, 0x23, 0x34]);
    }

    #[test]
    fn adts_header_fields() {
        let mut d = depacketizer();
        let units = d
            .depacketize(&packet(&[0x00, 0x10, 0x00, 0x20, 0x21, 0x12, 0x23, 0x34]), 0)
            .unwrap();
        let h = &units[0].data[..ADTS_HEADER_LEN];
        assert_eq!(h[0], 0xFF);
        assert_eq!(h[1], 0xF1, "MPEG-4, no CRC");
        assert_eq!(h[2] >> 6, 1, "AAC-LC profile bits");
        assert_eq!((h[2] >> 2) & 0x0F, 3, "48 kHz frequency index");
        let channels = ((h[2] & 0x01) << 2) | (h[3] >> 6);
        assert_eq!(channels, 2);
        let frame_length =
            (((h[3] & 0x03) as usize) << 11) | ((h[4] as usize) << 3) | ((h[5] >> 5) as usize);
        assert_eq!(frame_length, 11);
        assert_eq!(h[5] & 0x1F, 0x1F);
        assert_eq!(h[6], 0xFC);
    }

    #[test]
    fn two_aus_one_frame_apart() {
        // Two headers (32 bits): sizes 2 and 3, delta 0.
        let payload = [
            0x00, 0x20, // 32 header bits
            0x00, 0x10, // size 2, index 0
            0x00, 0x18, // size 3, delta 0
            0xA1, 0xA2, // AU 0
            0xB1, 0xB2, 0xB3, // AU 1
        ];
        let mut d = depacketizer();
        let units = d.depacketize(&packet(&payload), 9_000).unwrap();
        assert_eq!(units.len(), 2);
        assert_eq!(&units[0].data[ADTS_HEADER_LEN..], &[0xA1, 0xA2]);
        assert_eq!(&units[1].data[ADTS_HEADER_LEN..], &[0xB1, 0xB2, 0xB3]);
        assert_eq!(units[0].pts90k, 9_000);
        // 1024 samples at 48 kHz = 1920 PTS units.
        assert_eq!(units[1].pts90k, 9_000 + 1920);
    }

    #[test]
    fn interleaving_rejected() {
        // Index 1 in the first header.
        let payload = [0x00, 0x10, 0x00, 0x21, 0xA1, 0xA2, 0xA3, 0xA4];
        let mut d = depacketizer();
        assert!(d.depacketize(&packet(&payload), 0).is_err());
    }

    #[test]
    fn au_data_shorter_than_header_claims() {
        let payload = [0x00, 0x10, 0x00, 0x40, 0xA1, 0xA2]; // size 8, 2 bytes present
        let mut d = depacketizer();
        assert!(d.depacketize(&packet(&payload), 0).is_err());
    }

    #[test]
    fn truncated_header_area() {
        let payload = [0x00, 0x20, 0x00, 0x10]; // claims 32 bits, has 16
        let mut d = depacketizer();
        assert!(d.depacketize(&packet(&payload), 0).is_err());
    }

    #[test]
    fn unsupported_rate_rejected() {
        assert!(AacDepacketizer::with_defaults(13_370, 2).is_err());
    }

    #[test]
    fn frequency_index_table() {
        assert_eq!(frequency_index(96_000), Some(0));
        assert_eq!(frequency_index(44_100), Some(4));
        assert_eq!(frequency_index(48_000), Some(3));
        assert_eq!(frequency_index(8_000), Some(11));
        assert_eq!(frequency_index(1), None);
    }
}
