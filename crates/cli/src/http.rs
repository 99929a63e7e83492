//! Minimal static HTTP server for the segment directory.
//!
//! Serves `GET` requests for the playlist and segment files with the
//! MIME types HLS players expect (RFC 8216 §4 and §3). One thread per
//! connection, `Connection: close` semantics; anything fancier belongs
//! in a real web server fronting the output directory.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// Accept loop with a poll interval so shutdown is prompt.
pub fn serve(listener: TcpListener, root: PathBuf, running: Arc<AtomicBool>) {
    listener
        .set_nonblocking(true)
        .expect("nonblocking listener");
    let root = Arc::new(root);
    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _)) => {
                if stream.set_nonblocking(false).is_err() {
                    continue;
                }
                let root = root.clone();
                thread::spawn(move || handle(stream, &root));
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                if running.load(Ordering::SeqCst) {
                    tracing::warn!(error = %e, "HTTP accept error");
                }
            }
        }
    }
    tracing::debug!("HTTP accept loop exited");
}

fn handle(stream: TcpStream, root: &Path) {
    let mut reader = BufReader::new(match stream.try_clone() {
        Ok(s) => s,
        Err(_) => return,
    });
    let mut writer = stream;

    let mut request_line = String::new();
    if reader.read_line(&mut request_line).is_err() {
        return;
    }
    // Drain headers; nothing in them matters for static files.
    loop {
        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) if line == "\r\n" || line == "\n" => break,
            Ok(_) => {}
            Err(_) => return,
        }
    }

    let path = match parse_get_path(&request_line) {
        Some(path) => path,
        None => {
            let _ = respond(&mut writer, 405, "Method Not Allowed", "text/plain", b"");
            return;
        }
    };

    match sanitize(&path).map(|name| root.join(name)) {
        Some(file) => match std::fs::read(&file) {
            Ok(body) => {
                let _ = respond(&mut writer, 200, "OK", content_type(&path), &body);
                tracing::trace!(path = %path, bytes = body.len(), "served");
            }
            Err(_) => {
                let _ = respond(&mut writer, 404, "Not Found", "text/plain", b"not found\n");
            }
        },
        None => {
            let _ = respond(&mut writer, 403, "Forbidden", "text/plain", b"");
        }
    }
}

/// Extract the path from `GET /path HTTP/1.1`, mapping `/` to the
/// playlist and stripping any query string.
fn parse_get_path(request_line: &str) -> Option<String> {
    let mut parts = request_line.split_whitespace();
    if parts.next()? != "GET" {
        return None;
    }
    let target = parts.next()?;
    let target = target.split('?').next().unwrap_or(target);
    Some(if target == "/" {
        "/index.m3u8".to_string()
    } else {
        target.to_string()
    })
}

/// Only bare filenames inside the output directory are reachable.
fn sanitize(path: &str) -> Option<&str> {
    let name = path.strip_prefix('/')?;
    if name.is_empty() || name.contains('/') || name.contains("..") || name.starts_with('.') {
        return None;
    }
    Some(name)
}

fn content_type(path: &str) -> &'static str {
    if path.ends_with(".m3u8") {
        "application/vnd.apple.mpegurl"
    } else if path.ends_with(".ts") {
        "video/mp2t"
    } else {
        "application/octet-stream"
    }
}

fn respond(
    writer: &mut TcpStream,
    code: u16,
    phrase: &str,
    content_type: &str,
    body: &[u8],
) -> std::io::Result<()> {
    let head = format!(
        "HTTP/1.1 {code} {phrase}\r\n\
         Content-Type: {content_type}\r\n\
         Content-Length: {}\r\n\
         Cache-Control: no-cache\r\n\
         Access-Control-Allow-Origin: *\r\n\
         Connection: close\r\n\r\n",
        body.len()
    );
    writer.write_all(head.as_bytes())?;
    writer.write_all(body)
}
