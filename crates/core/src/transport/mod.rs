//! Network transport layer for RTSP signaling and RTP media reception.
//!
//! RTSP uses a split transport model:
//!
//! - **TCP** ([`tcp`]): carries RTSP request/response signaling. One
//!   connection to the server for the life of the session, with
//!   timeouts on connect, reads, and writes.
//!
//! - **UDP** ([`udp`]): carries inbound RTP media. One socket pair
//!   (RTP + RTCP companion) per track, bound to the client ports
//!   advertised in SETUP. Reads are timed so the shutdown flag is
//!   honored between datagrams.
//!
//! Interleaved TCP transport (RFC 2326 §10.12, `$`-framed RTP on the
//! signaling connection) is not implemented.

pub mod tcp;
pub mod udp;

pub use tcp::ControlConnection;
pub use udp::RtpSocket;
