//! # hls-relay — RTSP to HLS restreaming library
//!
//! A Rust library that pulls a live stream from an RTSP source (H.264
//! or H.265 video, optionally AAC audio), remuxes it into MPEG-2
//! Transport Stream segments, and maintains a live HLS playlist on
//! disk for any standard HLS player to consume over HTTP.
//!
//! ## Protocol references
//!
//! | RFC | Topic | How this crate uses it |
//! |-----|-------|----------------------|
//! | [RFC 2326](https://tools.ietf.org/html/rfc2326) | RTSP 1.0 | Client session lifecycle, request/response exchange, transport negotiation |
//! | [RFC 3550](https://tools.ietf.org/html/rfc3550) | RTP | Packet parsing, sequence/timestamp semantics, reordering |
//! | [RFC 4566](https://tools.ietf.org/html/rfc4566) | SDP | Parsing DESCRIBE bodies into tracks |
//! | [RFC 6184](https://tools.ietf.org/html/rfc6184) | H.264 RTP payload | Single NAL / STAP-A / FU-A depacketization |
//! | [RFC 7798](https://tools.ietf.org/html/rfc7798) | H.265 RTP payload | Single NAL / AP / FU depacketization |
//! | [RFC 3640](https://tools.ietf.org/html/rfc3640) | AAC RTP payload | AAC-hbr AU parsing, ADTS framing |
//! | [RFC 8216](https://tools.ietf.org/html/rfc8216) | HLS | Segment files and live media playlist |
//! | ISO/IEC 13818-1 | MPEG-2 TS | PAT/PMT, PES, PCR, 188-byte packetization |
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────┐
//! │  Client         — public API, orchestrator│
//! ├───────────────────────────────────────────┤
//! │  Session        — RTSP FSM, track table   │
//! │  Protocol       — requests, responses, SDP│
//! ├───────────────────────────────────────────┤
//! │  Transport      — TCP control, UDP media  │
//! │  Media          — reorder, depacketizers  │
//! ├───────────────────────────────────────────┤
//! │  Mux            — PES, PAT/PMT, TS packets│
//! │  Hls            — segmenter, playlist     │
//! └───────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```no_run
//! use hls_relay::{Client, RelayConfig};
//!
//! let config = RelayConfig {
//!     output_dir: "./segments".into(),
//!     ..RelayConfig::default()
//! };
//! let mut client = Client::new("rtsp://camera.local/stream", config).unwrap();
//! client.start().unwrap();
//! // segments and index.m3u8 accumulate under ./segments until:
//! client.stop();
//! ```
//!
//! ## Crate layout
//!
//! - [`client`] — High-level [`Client`] orchestrator and [`RelayConfig`].
//! - [`session`] — RTSP session state machine and [`session::Track`] table.
//! - [`protocol`] — request building, response parsing, SDP parsing.
//! - [`transport`] — TCP control connection, UDP RTP sockets.
//! - [`media`] — RTP parsing, reorder buffer, codec depacketizers.
//! - [`mux`] — PES and MPEG-2 TS packetization.
//! - [`hls`] — segment cutting, sliding window, playlist publication.
//! - [`pipeline`] — worker threads and queues tying it together.
//! - [`error`] — [`RelayError`] enum and [`Result`] alias.

pub mod client;
pub mod error;
pub mod hls;
pub mod media;
pub mod mux;
pub mod pipeline;
pub mod protocol;
pub mod session;
pub mod transport;

pub use client::{Client, RelayConfig};
pub use error::{RelayError, Result};
pub use media::{AccessUnit, CodecId, MediaKind};
pub use session::SessionState;
