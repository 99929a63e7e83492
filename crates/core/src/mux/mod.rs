//! MPEG-2 Transport Stream multiplexing (ISO/IEC 13818-1).
//!
//! Three layers, bottom up:
//!
//! - [`crc`]: CRC-32/MPEG-2 over PSI sections.
//! - [`pes`]: access unit -> PES packet (header, 33-bit PTS).
//! - [`ts`]: PES packets and PAT/PMT sections -> 188-byte TS packets
//!   with per-PID continuity counters, PCR, and stuffing.
//!
//! The segmenter in [`crate::hls`] drives this module: it opens each
//! segment with [`ts::TsMuxer::write_psi`] and feeds access units through
//! [`ts::TsMuxer::write_pes`].

pub mod crc;
pub mod pes;
pub mod ts;

pub use ts::{PID_AUDIO, PID_PAT, PID_PMT, PID_VIDEO, TS_PACKET_SIZE, TsMuxer};
