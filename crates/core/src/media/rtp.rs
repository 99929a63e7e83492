//! RTP fixed-header parsing (RFC 3550 §5.1) and timestamp re-basing.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           Timestamp                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                             SSRC                              |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |            CSRC list (0..15 entries, skipped)                 |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! The parser accepts version 2 only, skips the CSRC list and any header
//! extension (RFC 3550 §5.3.1), and honors the padding bit.

use bytes::Bytes;

use crate::error::{RelayError, Result};

const FIXED_HEADER_LEN: usize = 12;

/// A parsed RTP packet.
#[derive(Debug, Clone)]
pub struct RtpPacket {
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub marker: bool,
    pub payload: Bytes,
}

impl RtpPacket {
    /// Parse a datagram as RTP. Anything that is not version 2, or whose
    /// stated CSRC/extension/padding lengths exceed the datagram, is an
    /// [`Rtp`](RelayError::Rtp) error.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < FIXED_HEADER_LEN {
            return Err(RelayError::Rtp {
                reason: "datagram shorter than fixed header",
            });
        }

        let b0 = data[0];
        if b0 >> 6 != 2 {
            return Err(RelayError::Rtp {
                reason: "version is not 2",
            });
        }
        let padding = b0 & 0x20 != 0;
        let extension = b0 & 0x10 != 0;
        let csrc_count = (b0 & 0x0F) as usize;

        let b1 = data[1];
        let marker = b1 & 0x80 != 0;
        let payload_type = b1 & 0x7F;

        let sequence = u16::from_be_bytes([data[2], data[3]]);
        let timestamp = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let ssrc = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);

        let mut offset = FIXED_HEADER_LEN + 4 * csrc_count;
        if offset > data.len() {
            return Err(RelayError::Rtp {
                reason: "CSRC list exceeds datagram",
            });
        }

        if extension {
            if offset + 4 > data.len() {
                return Err(RelayError::Rtp {
                    reason: "extension header exceeds datagram",
                });
            }
            let words = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
            offset += 4 + 4 * words;
            if offset > data.len() {
                return Err(RelayError::Rtp {
                    reason: "extension body exceeds datagram",
                });
            }
        }

        let mut end = data.len();
        if padding {
            let pad = *data.last().unwrap_or(&0) as usize;
            if pad == 0 || offset + pad > end {
                return Err(RelayError::Rtp {
                    reason: "invalid padding length",
                });
            }
            end -= pad;
        }

        Ok(Self {
            payload_type,
            sequence,
            timestamp,
            ssrc,
            marker,
            payload: Bytes::copy_from_slice(&data[offset..end]),
        })
    }
}

/// Re-bases 32-bit RTP timestamps onto the 90 kHz mux clock.
///
/// The RTP timestamp runs at the codec clock rate and wraps at 2^32.
/// This scaler unwraps it into a u64 (wrap-aware relative to the last
/// seen value), subtracts the first-seen timestamp so streams start at
/// PTS 0, and rescales `clock_rate -> 90000` exactly in 128-bit
/// arithmetic so non-integer ratios (44.1 kHz audio) accumulate no
/// drift.
#[derive(Debug)]
pub struct TimestampScaler {
    clock_rate: u32,
    base: Option<u64>,
    last_raw: u32,
    last_extended: u64,
}

impl TimestampScaler {
    pub fn new(clock_rate: u32) -> Self {
        Self {
            clock_rate,
            base: None,
            last_raw: 0,
            last_extended: 0,
        }
    }

    /// Map an RTP timestamp to a 90 kHz PTS.
    pub fn to_pts90k(&mut self, rtp_timestamp: u32) -> u64 {
        let extended = match self.base {
            None => {
                let extended = rtp_timestamp as u64;
                self.base = Some(extended);
                extended
            }
            Some(_) => {
                // Signed wrap-aware delta from the previous timestamp.
                let delta = rtp_timestamp.wrapping_sub(self.last_raw) as i32 as i64;
                self.last_extended.saturating_add_signed(delta)
            }
        };
        self.last_raw = rtp_timestamp;
        self.last_extended = extended;

        let base = self.base.unwrap_or(0);
        let elapsed = extended.saturating_sub(base);
        ((elapsed as u128 * 90_000) / self.clock_rate as u128) as u64
    }
}
