//! Integration tests: full RTSP handshake against a mock server, and an
//! end-to-end run from RTP datagrams to segments and playlist on disk.
//!
//! The mock server answers OPTIONS → DESCRIBE → SETUP → PLAY → TEARDOWN
//! with canned responses on a loopback TCP socket; media is injected by
//! sending RTP datagrams straight at the relay's bound client port.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, UdpSocket};
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use hls_relay::session::{Session, SessionState};
use hls_relay::{Client, RelayConfig};

const SDP_VIDEO_ONLY: &str = "v=0\r\n\
    o=- 0 0 IN IP4 127.0.0.1\r\n\
    s=Mock\r\n\
    t=0 0\r\n\
    m=video 0 RTP/AVP 96\r\n\
    a=rtpmap:96 H264/90000\r\n\
    a=control:track1\r\n";

/// Start a mock RTSP server on a loopback port. Handles one client
/// connection, answering each method with a canned response until
/// TEARDOWN or disconnect.
fn mock_rtsp_server(sdp: &'static str) -> (u16, thread::JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server");
    let port = listener.local_addr().unwrap().port();

    let handle = thread::spawn(move || {
        let mut methods_seen = Vec::new();
        let (stream, _) = match listener.accept() {
            Ok(conn) => conn,
            Err(_) => return methods_seen,
        };
        let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));
        let mut writer = stream;

        loop {
            // Read one request: request line + headers.
            let mut request = String::new();
            loop {
                let mut line = String::new();
                match reader.read_line(&mut line) {
                    Ok(0) => return methods_seen,
                    Ok(_) => {
                        request.push_str(&line);
                        if line == "\r\n" || line == "\n" {
                            break;
                        }
                    }
                    Err(_) => return methods_seen,
                }
            }

            let method = request
                .split_whitespace()
                .next()
                .unwrap_or("")
                .to_string();
            let cseq = request
                .lines()
                .find(|l| l.to_ascii_lowercase().starts_with("cseq:"))
                .and_then(|l| l.split(':').nth(1))
                .map(|v| v.trim().to_string())
                .unwrap_or_else(|| "0".to_string());
            methods_seen.push(method.clone());

            let response = match method.as_str() {
                "OPTIONS" => format!(
                    "RTSP/1.0 200 OK\r\nCSeq: {cseq}\r\n\
                     Public: OPTIONS, DESCRIBE, SETUP, PLAY, PAUSE, TEARDOWN, GET_PARAMETER\r\n\r\n"
                ),
                "DESCRIBE" => format!(
                    "RTSP/1.0 200 OK\r\nCSeq: {cseq}\r\n\
                     Content-Type: application/sdp\r\n\
                     Content-Length: {}\r\n\r\n{sdp}",
                    sdp.len()
                ),
                "SETUP" => format!(
                    "RTSP/1.0 200 OK\r\nCSeq: {cseq}\r\n\
                     Session: 4F9D2B31;timeout=60\r\n\
                     Transport: RTP/AVP;unicast;client_port=0-1;server_port=6970-6971\r\n\r\n"
                ),
                "PLAY" => format!(
                    "RTSP/1.0 200 OK\r\nCSeq: {cseq}\r\n\
                     Session: 4F9D2B31\r\nRange: npt=0.000-\r\n\r\n"
                ),
                "PAUSE" | "GET_PARAMETER" | "TEARDOWN" => {
                    format!("RTSP/1.0 200 OK\r\nCSeq: {cseq}\r\n\r\n")
                }
                _ => format!("RTSP/1.0 501 Not Implemented\r\nCSeq: {cseq}\r\n\r\n"),
            };

            if writer.write_all(response.as_bytes()).is_err() {
                return methods_seen;
            }
            if method == "TEARDOWN" {
                return methods_seen;
            }
        }
    });

    (port, handle)
}

fn temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("hls-relay-it-{tag}-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn full_handshake_describe_setup_play_teardown() {
    let (port, server) = mock_rtsp_server(SDP_VIDEO_ONLY);
    let url = format!("rtsp://127.0.0.1:{port}/stream");

    let mut session = Session::new(&url, Duration::from_secs(2), 47_000).expect("session");
    assert_eq!(session.state(), SessionState::Disconnected);

    session.connect().expect("connect");
    assert_eq!(session.state(), SessionState::Connected);

    session.options().expect("options");

    session.describe().expect("describe");
    assert_eq!(session.state(), SessionState::Described);
    assert_eq!(session.tracks().len(), 1);
    assert_eq!(session.tracks()[0].rtp_port, 47_000);

    session.setup().expect("setup");
    assert_eq!(session.state(), SessionState::Setup);
    assert_eq!(session.session_id(), Some("4F9D2B31"));

    session.play().expect("play");
    assert_eq!(session.state(), SessionState::Playing);

    session.pause().expect("pause");
    assert_eq!(session.state(), SessionState::Paused);

    session.play().expect("resume");
    assert_eq!(session.state(), SessionState::Playing);

    session.teardown().expect("teardown");
    assert_eq!(session.state(), SessionState::Disconnected);
    assert_eq!(session.session_id(), None);
    // Idempotent: a second teardown is a local no-op.
    session.teardown().expect("second teardown");
    assert_eq!(session.state(), SessionState::Disconnected);

    let methods = server.join().expect("server thread");
    assert_eq!(
        methods,
        vec![
            "OPTIONS", "DESCRIBE", "SETUP", "PLAY", "PAUSE", "PLAY", "TEARDOWN"
        ]
    );
}

/// Build an RTP datagram with the given sequence/timestamp and payload.
fn rtp_datagram(sequence: u16, timestamp: u32, payload: &[u8]) -> Vec<u8> {
    let mut datagram = vec![0x80, 0x60];
    datagram.extend_from_slice(&sequence.to_be_bytes());
    datagram.extend_from_slice(&timestamp.to_be_bytes());
    datagram.extend_from_slice(&0x1357_9BDFu32.to_be_bytes());
    datagram.extend_from_slice(payload);
    datagram
}

#[test]
fn end_to_end_rtp_to_segments_and_playlist() {
    let (port, _server) = mock_rtsp_server(SDP_VIDEO_ONLY);
    let url = format!("rtsp://127.0.0.1:{port}/stream");
    let dir = temp_dir("e2e");
    let rtp_base_port = 47_100;

    let config = RelayConfig {
        output_dir: dir.clone(),
        segment_duration_ms: 1000,
        max_segments: 5,
        rtp_base_port,
        ..RelayConfig::default()
    };
    let mut client = Client::new(&url, config).expect("client");
    client.start().expect("start");
    assert!(client.is_running());

    // Inject a self-contained stream: SPS, PPS, IDR at t=0, then a
    // second IDR 1.2 s later to trigger the first cut.
    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
    let target = ("127.0.0.1", rtp_base_port);
    sender
        .send_to(&rtp_datagram(1, 0, &[0x67, 0x42, 0x00, 0x1E]), target)
        .unwrap();
    sender
        .send_to(&rtp_datagram(2, 0, &[0x68, 0xCE, 0x38, 0x80]), target)
        .unwrap();
    sender
        .send_to(&rtp_datagram(3, 0, &[0x65, 0x88, 0x84, 0x00]), target)
        .unwrap();
    sender
        .send_to(&rtp_datagram(4, 108_000, &[0x65, 0x88, 0x84, 0x11]), target)
        .unwrap();

    // The first segment closes when the second keyframe lands.
    let deadline = Instant::now() + Duration::from_secs(5);
    let first_segment = dir.join("segment_0.ts");
    while !first_segment.exists() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(50));
    }
    assert!(first_segment.exists(), "segment_0.ts not produced in time");

    client.stop();
    assert!(!client.is_running());

    // Segment 0: closed at the cut. Segment 1: flushed on shutdown.
    let segment = std::fs::read(&first_segment).unwrap();
    assert!(!segment.is_empty());
    assert_eq!(segment.len() % 188, 0, "TS packets are 188-byte aligned");
    for packet in segment.chunks(188) {
        assert_eq!(packet[0], 0x47, "sync byte on every packet");
    }
    // PAT, then PMT, then the keyframe-bearing video PES.
    let pid = |i: usize| {
        (((segment[i * 188 + 1] & 0x1F) as u16) << 8) | segment[i * 188 + 2] as u16
    };
    assert_eq!(pid(0), 0x0000);
    assert_eq!(pid(1), 0x1000);
    assert_eq!(pid(2), 0x0100);

    let playlist = std::fs::read_to_string(dir.join("index.m3u8")).unwrap();
    assert!(playlist.starts_with("#EXTM3U\n"));
    assert!(playlist.contains("#EXT-X-MEDIA-SEQUENCE:0\n"));
    assert!(playlist.contains("segment_0.ts\n"));
    // Every listed segment exists on disk.
    for line in playlist.lines().filter(|l| l.ends_with(".ts")) {
        assert!(dir.join(line).exists(), "{line} listed but missing");
    }

    std::fs::remove_dir_all(&dir).unwrap();
}
