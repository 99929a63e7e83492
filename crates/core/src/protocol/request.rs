/// An outgoing RTSP request (RFC 2326 §6).
///
/// Serializes to the standard text format:
///
/// ```text
/// SETUP rtsp://camera/stream/track1 RTSP/1.0\r\n
/// CSeq: 3\r\n
/// Transport: RTP/AVP;unicast;client_port=50000-50001\r\n
/// \r\n
/// ```
///
/// Uses a builder pattern: chain [`add_header`](Self::add_header), then
/// call [`serialize`](Self::serialize). None of this client's requests
/// carry a body, so `Content-Length` is never emitted.
#[must_use]
pub struct RtspRequest {
    pub method: &'static str,
    pub uri: String,
    pub headers: Vec<(String, String)>,
}

/// Client identification string included in every request
/// per RFC 2326 §12.41.
pub const USER_AGENT: &str = "hls-relay/0.1";

impl RtspRequest {
    pub fn new(method: &'static str, uri: &str) -> Self {
        RtspRequest {
            method,
            uri: uri.to_string(),
            headers: vec![("User-Agent".to_string(), USER_AGENT.to_string())],
        }
    }

    pub fn options(uri: &str) -> Self {
        Self::new("OPTIONS", uri)
    }

    /// DESCRIBE with the mandatory `Accept: application/sdp`.
    pub fn describe(uri: &str) -> Self {
        Self::new("DESCRIBE", uri).add_header("Accept", "application/sdp")
    }

    pub fn setup(uri: &str) -> Self {
        Self::new("SETUP", uri)
    }

    /// PLAY from the live edge (`Range: npt=0.000-`).
    pub fn play(uri: &str) -> Self {
        Self::new("PLAY", uri).add_header("Range", "npt=0.000-")
    }

    pub fn pause(uri: &str) -> Self {
        Self::new("PAUSE", uri)
    }

    pub fn teardown(uri: &str) -> Self {
        Self::new("TEARDOWN", uri)
    }

    /// GET_PARAMETER with no body, the conventional keepalive
    /// (RFC 2326 §10.8).
    pub fn get_parameter(uri: &str) -> Self {
        Self::new("GET_PARAMETER", uri)
    }

    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Serialize to the RTSP text wire format.
    pub fn serialize(&self) -> String {
        let mut request = format!("{} {} RTSP/1.0\r\n", self.method, self.uri);
        for (name, value) in &self.headers {
            request.push_str(&format!("{}: {}\r\n", name, value));
        }
        request.push_str("\r\n");
        request
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_options() {
        let req = RtspRequest::options("rtsp://localhost:554/stream").add_header("CSeq", "1");
        let s = req.serialize();
        assert!(s.starts_with("OPTIONS rtsp://localhost:554/stream RTSP/1.0\r\n"));
        assert!(s.contains("User-Agent: hls-relay/0.1\r\n"));
        assert!(s.contains("CSeq: 1\r\n"));
        assert!(s.ends_with("\r\n\r\n"));
    }

    #[test]
    fn describe_accepts_sdp() {
        let s = RtspRequest::describe("rtsp://cam/live").serialize();
        assert!(s.contains("Accept: application/sdp\r\n"));
    }

    #[test]
    fn play_requests_live_range() {
        let s = RtspRequest::play("rtsp://cam/live").serialize();
        assert!(s.contains("Range: npt=0.000-\r\n"));
    }

    #[test]
    fn headers_preserve_insertion_order() {
        let s = RtspRequest::setup("rtsp://cam/live/track1")
            .add_header("CSeq", "3")
            .add_header("Transport", "RTP/AVP;unicast;client_port=50000-50001")
            .serialize();
        let cseq = s.find("CSeq:").unwrap();
        let transport = s.find("Transport:").unwrap();
        assert!(cseq < transport);
    }
}
