use crate::error::{ParseErrorKind, RelayError, Result};

/// A parsed RTSP response (RFC 2326 §7).
///
/// ```text
/// RTSP/1.0 200 OK\r\n
/// CSeq: 2\r\n
/// Content-Type: application/sdp\r\n
/// Content-Length: 142\r\n
/// \r\n
/// v=0\r\n...
/// ```
///
/// Header lookup is case-insensitive per RFC 2326 §4.2, and folded
/// headers (continuation lines starting with space or tab, RFC 2616
/// §2.2 syntax that some servers still emit) are unfolded into the
/// preceding header's value. The body is attached separately by the
/// transport layer, which reads `Content-Length` bytes past the blank
/// line.
#[derive(Debug)]
pub struct RtspResponse {
    pub status_code: u16,
    pub status_phrase: String,
    /// Headers as ordered (name, value) pairs. Names are stored
    /// as-received; lookups via [`header`](Self::header) are
    /// case-insensitive.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RtspResponse {
    /// Parse the head of a response: status line and headers, up to and
    /// excluding the blank line.
    pub fn parse_head(raw: &str) -> Result<Self> {
        let mut lines = raw.lines();

        let status_line = lines.next().filter(|l| !l.trim().is_empty()).ok_or(
            RelayError::Parse {
                kind: ParseErrorKind::EmptyResponse,
            },
        )?;

        // "RTSP/1.0 200 OK" - the phrase may contain spaces.
        let mut parts = status_line.splitn(3, ' ');
        let version = parts.next().unwrap_or("");
        let code = parts.next().and_then(|c| c.parse::<u16>().ok());
        let (status_code, status_phrase) = match code {
            Some(code) if version.starts_with("RTSP/") => {
                (code, parts.next().unwrap_or("").trim().to_string())
            }
            _ => {
                return Err(RelayError::Parse {
                    kind: ParseErrorKind::InvalidStatusLine,
                });
            }
        };

        let mut headers: Vec<(String, String)> = Vec::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            if line.starts_with(' ') || line.starts_with('\t') {
                // Folded continuation of the previous header.
                match headers.last_mut() {
                    Some((_, value)) => {
                        value.push(' ');
                        value.push_str(line.trim());
                        continue;
                    }
                    None => {
                        return Err(RelayError::Parse {
                            kind: ParseErrorKind::InvalidHeader,
                        });
                    }
                }
            }
            let colon_pos = line.find(':').ok_or(RelayError::Parse {
                kind: ParseErrorKind::InvalidHeader,
            })?;
            let name = line[..colon_pos].trim().to_string();
            let value = line[colon_pos + 1..].trim().to_string();
            headers.push((name, value));
        }

        Ok(RtspResponse {
            status_code,
            status_phrase,
            headers,
            body: Vec::new(),
        })
    }

    /// Look up a header value by name (case-insensitive, RFC 2326 §4.2).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Declared body length (RFC 2326 §12.14), 0 when absent or
    /// malformed.
    pub fn content_length(&self) -> usize {
        self.header("Content-Length")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }

    /// The CSeq echoed by the server (RFC 2326 §12.17).
    pub fn cseq(&self) -> Option<u32> {
        self.header("CSeq").and_then(|v| v.trim().parse().ok())
    }

    /// Session identifier with any `;timeout=` suffix stripped
    /// (RFC 2326 §12.37).
    pub fn session_id(&self) -> Option<&str> {
        self.header("Session")
            .map(|s| s.split(';').next().unwrap_or(s).trim())
    }

    /// Session timeout in seconds from the `Session` header, if stated.
    pub fn session_timeout_secs(&self) -> Option<u64> {
        self.header("Session")?
            .split(';')
            .find_map(|p| p.trim().strip_prefix("timeout="))
            .and_then(|v| v.parse().ok())
    }

    /// Error out unless the status is 200 (RFC 2326 §7.1.1).
    pub fn ensure_ok(&self) -> Result<()> {
        if self.status_code == 200 {
            Ok(())
        } else {
            Err(RelayError::Status {
                code: self.status_code,
                phrase: self.status_phrase.clone(),
            })
        }
    }
}
