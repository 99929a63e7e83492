//! Error types for the RTSP-to-HLS relay library.

use std::fmt;

/// Errors that can occur in the relay library.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Control**: [`Connect`](Self::Connect), [`Timeout`](Self::Timeout),
///   [`Status`](Self::Status), [`ProtocolState`](Self::ProtocolState),
///   [`Parse`](Self::Parse), [`Sdp`](Self::Sdp) — RTSP signaling failures.
///   These abort the session.
/// - **Media**: [`Rtp`](Self::Rtp), [`Media`](Self::Media) — per-packet
///   failures. The pipeline drops the packet, resets any fragmentation
///   state, and continues.
/// - **Output**: [`TsEncoding`](Self::TsEncoding),
///   [`Segmentation`](Self::Segmentation), [`Playlist`](Self::Playlist),
///   [`Io`](Self::Io) — failures that make the output unplayable. Fatal.
/// - **Setup**: [`InvalidArgument`](Self::InvalidArgument) — configuration
///   rejected before anything runs.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// TCP connection to the RTSP server could not be established.
    #[error("RTSP connect failed: {source}")]
    Connect { source: std::io::Error },

    /// An RTSP request/response exchange exceeded the configured timeout.
    #[error("RTSP timeout during {operation}")]
    Timeout { operation: &'static str },

    /// The server answered with a non-200 status code.
    #[error("RTSP status {code} {phrase}")]
    Status { code: u16, phrase: String },

    /// An operation was attempted in a session state that does not allow it
    /// (e.g. PLAY before SETUP).
    #[error("illegal in state {state}: {operation}")]
    ProtocolState {
        state: &'static str,
        operation: &'static str,
    },

    /// Failed to parse an RTSP response message (RFC 2326 §7).
    #[error("RTSP parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// The SDP body of the DESCRIBE response was malformed or unusable.
    #[error("SDP error: {reason}")]
    Sdp { reason: String },

    /// A UDP datagram could not be parsed as RTP (RFC 3550 §5.1).
    #[error("RTP packet error: {reason}")]
    Rtp { reason: &'static str },

    /// A codec payload violated its RTP payload format
    /// (RFC 6184 / RFC 7798 / RFC 3640).
    #[error("{codec} payload error: {reason}")]
    Media {
        codec: &'static str,
        reason: &'static str,
    },

    /// The muxer could not encode a TS packet or PSI section.
    #[error("TS encoding error: {reason}")]
    TsEncoding { reason: &'static str },

    /// The segmenter reached an unrecoverable state.
    #[error("segmentation error: {reason}")]
    Segmentation { reason: String },

    /// Writing or renaming the playlist failed after a retry.
    #[error("playlist update failed: {source}")]
    Playlist { source: std::io::Error },

    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration rejected by validation.
    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },
}

/// Specific kind of RTSP response parse failure.
#[derive(Debug)]
pub enum ParseErrorKind {
    /// Input was empty (no status line).
    EmptyResponse,
    /// Status line did not have the expected `Version Code Phrase` format.
    InvalidStatusLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
    /// The body was shorter than the advertised Content-Length.
    TruncatedBody,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyResponse => write!(f, "empty response"),
            Self::InvalidStatusLine => write!(f, "invalid status line"),
            Self::InvalidHeader => write!(f, "invalid header"),
            Self::TruncatedBody => write!(f, "truncated body"),
        }
    }
}

/// Convenience alias for `Result<T, RelayError>`.
pub type Result<T> = std::result::Result<T, RelayError>;
