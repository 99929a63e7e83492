use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::error::{ParseErrorKind, RelayError, Result};
use crate::protocol::{RtspRequest, RtspResponse};

/// The RTSP signaling connection to the server.
///
/// Owns the TCP stream for the life of a session. One request is in
/// flight at a time: [`exchange`](Self::exchange) writes the serialized
/// request and blocks on the response, with the configured timeout
/// applied to connect, every read, and every write. A timed-out read
/// surfaces as [`Timeout`](RelayError::Timeout) rather than a raw I/O
/// error, since it usually means the server went away mid-session.
pub struct ControlConnection {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl ControlConnection {
    /// Resolve `host:port` and connect, trying each resolved address
    /// until one accepts within `timeout`.
    pub fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self> {
        let addrs: Vec<_> = (host, port)
            .to_socket_addrs()
            .map_err(|source| RelayError::Connect { source })?
            .collect();
        if addrs.is_empty() {
            return Err(RelayError::Connect {
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no addresses for {host}"),
                ),
            });
        }

        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(timeout))?;
                    stream.set_write_timeout(Some(timeout))?;
                    let reader_stream = stream.try_clone()?;
                    tracing::info!(%addr, "RTSP control connected");
                    return Ok(Self {
                        reader: BufReader::new(reader_stream),
                        writer: stream,
                    });
                }
                Err(e) => {
                    tracing::debug!(%addr, error = %e, "connect attempt failed");
                    last_error = Some(e);
                }
            }
        }
        Err(RelayError::Connect {
            source: last_error.unwrap_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::TimedOut, "connect failed")
            }),
        })
    }

    /// Send a request and read its response, including any
    /// `Content-Length`-delimited body.
    pub fn exchange(&mut self, request: &RtspRequest) -> Result<RtspResponse> {
        let text = request.serialize();
        tracing::trace!(method = request.method, uri = %request.uri, "sending request");
        self.writer
            .write_all(text.as_bytes())
            .map_err(|e| map_timeout(e, "request write"))?;
        self.writer
            .flush()
            .map_err(|e| map_timeout(e, "request write"))?;
        self.read_response()
    }

    /// Read one response: lines up to the blank separator, then the
    /// declared body.
    fn read_response(&mut self) -> Result<RtspResponse> {
        let mut head = String::new();
        loop {
            let mut line = String::new();
            let n = self
                .reader
                .read_line(&mut line)
                .map_err(|e| map_timeout(e, "response read"))?;
            if n == 0 {
                return Err(RelayError::Parse {
                    kind: ParseErrorKind::EmptyResponse,
                });
            }
            if line == "\r\n" || line == "\n" {
                break;
            }
            head.push_str(&line);
        }

        let mut response = RtspResponse::parse_head(&head)?;

        let content_length = response.content_length();
        if content_length > 0 {
            let mut body = vec![0u8; content_length];
            self.reader.read_exact(&mut body).map_err(|e| {
                if is_timeout(&e) {
                    RelayError::Timeout {
                        operation: "response body read",
                    }
                } else {
                    RelayError::Parse {
                        kind: ParseErrorKind::TruncatedBody,
                    }
                }
            })?;
            response.body = body;
        }

        tracing::trace!(
            status = response.status_code,
            body_bytes = response.body.len(),
            "response received"
        );
        Ok(response)
    }

    /// Shut down both directions, unblocking any reader.
    pub fn shutdown(&self) {
        let _ = self.writer.shutdown(std::net::Shutdown::Both);
    }
}

fn is_timeout(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}

fn map_timeout(e: std::io::Error, operation: &'static str) -> RelayError {
    if is_timeout(&e) {
        RelayError::Timeout { operation }
    } else {
        RelayError::Io(e)
    }
}
