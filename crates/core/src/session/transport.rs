//! RTSP `Transport` header handling for SETUP (RFC 2326 §12.39).
//!
//! The client requests unicast UDP delivery to its own port pair and
//! reads back whatever the server actually allocated:
//!
//! ```text
//! Client -> Server:
//!   Transport: RTP/AVP;unicast;client_port=50000-50001
//!
//! Server -> Client:
//!   Transport: RTP/AVP;unicast;client_port=50000-50001;server_port=6970-6971
//! ```

/// Format the client's requested `Transport` header value. The RTCP
/// port is always `rtp_port + 1` (RFC 3550 §11).
pub fn request_value(rtp_port: u16) -> String {
    format!(
        "RTP/AVP;unicast;client_port={}-{}",
        rtp_port,
        rtp_port + 1
    )
}

/// Server-side transport parameters parsed from the SETUP reply.
///
/// All fields are optional: servers differ in what they echo, and the
/// relay only needs them for logging since media arrives on the client
/// ports regardless.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportReply {
    pub server_rtp_port: Option<u16>,
    pub server_rtcp_port: Option<u16>,
    /// SSRC announced by the server, when present.
    pub ssrc: Option<u32>,
}

impl TransportReply {
    /// Parse the reply's `Transport` header value, tolerating unknown
    /// parameters.
    pub fn parse(header: &str) -> Self {
        let mut reply = Self::default();
        for part in header.split(';') {
            let part = part.trim();
            if let Some(ports) = part.strip_prefix("server_port=") {
                let mut ports = ports.split('-');
                reply.server_rtp_port = ports.next().and_then(|p| p.parse().ok());
                reply.server_rtcp_port = ports.next().and_then(|p| p.parse().ok());
            } else if let Some(ssrc) = part.strip_prefix("ssrc=") {
                reply.ssrc = u32::from_str_radix(ssrc.trim(), 16).ok();
            }
        }
        reply
    }
}
