//! SDP (Session Description Protocol) parsing (RFC 4566 / RFC 8866).
//!
//! Parses the SDP body of a DESCRIBE response into per-track media
//! descriptions. Only the lines this client acts on are interpreted:
//!
//! ```text
//! m=video 0 RTP/AVP 96          <- opens a media section
//! a=rtpmap:96 H264/90000        <- codec name and clock rate
//! a=control:track1              <- per-track control URL (may be relative)
//! a=fmtp:96 packetization-mode=1;sprop-parameter-sets=Z0IAHt==,aM44gA==
//! ```
//!
//! Everything else (`v=`, `o=`, `s=`, `c=`, `t=`, `b=`, unknown
//! attributes) is ignored. Lines are CR/LF or LF delimited. A video or
//! audio section without an `a=rtpmap` is an error; sections of other
//! kinds (`m=application` etc.) are skipped whole.

use base64::prelude::{BASE64_STANDARD, Engine as _};
use bytes::Bytes;

use crate::error::{RelayError, Result};
use crate::media::{CodecId, MediaKind};

/// One `m=` section of interest, with its accumulated attributes.
#[derive(Debug, Clone)]
pub struct MediaDescription {
    pub kind: MediaKind,
    pub payload_type: u8,
    pub codec: CodecId,
    pub clock_rate: u32,
    /// Channel count from the rtpmap (audio), when stated.
    pub channels: Option<u8>,
    /// Track control URL or token, as written (resolution against the
    /// session base happens at SETUP time).
    pub control: Option<String>,
    /// `a=fmtp` parameters as ordered key/value pairs.
    pub fmtp: Vec<(String, String)>,
}

impl MediaDescription {
    /// Look up an fmtp parameter (case-insensitive key).
    pub fn fmtp_param(&self, key: &str) -> Option<&str> {
        self.fmtp
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// H.264 `sprop-parameter-sets`: comma-separated base64 NAL units,
    /// conventionally SPS then PPS (RFC 6184 §8.1). Undecodable entries
    /// are skipped with a warning rather than failing the session.
    pub fn h264_parameter_sets(&self) -> (Option<Bytes>, Option<Bytes>) {
        let mut sps = None;
        let mut pps = None;
        if let Some(value) = self.fmtp_param("sprop-parameter-sets") {
            for entry in value.split(',') {
                match BASE64_STANDARD.decode(entry.trim()) {
                    Ok(nal) if !nal.is_empty() => match nal[0] & 0x1F {
                        7 => sps = Some(Bytes::from(nal)),
                        8 => pps = Some(Bytes::from(nal)),
                        other => {
                            tracing::debug!(nal_type = other, "ignoring sprop NAL of other type");
                        }
                    },
                    _ => tracing::warn!("undecodable sprop-parameter-sets entry"),
                }
            }
        }
        (sps, pps)
    }

    /// H.265 `sprop-vps`/`sprop-sps`/`sprop-pps` (RFC 7798 §7.1).
    pub fn h265_parameter_sets(&self) -> (Option<Bytes>, Option<Bytes>, Option<Bytes>) {
        let decode = |key: &str| {
            self.fmtp_param(key).and_then(|v| {
                BASE64_STANDARD
                    .decode(v.trim())
                    .ok()
                    .filter(|nal| !nal.is_empty())
                    .map(Bytes::from)
            })
        };
        (decode("sprop-vps"), decode("sprop-sps"), decode("sprop-pps"))
    }

    /// AAC AU-header bit lengths from fmtp, defaulting to the AAC-hbr
    /// 13/3/3 split (RFC 3640 §3.3.6).
    pub fn aac_au_header_lengths(&self) -> (u32, u32, u32) {
        let parse = |key: &str, default: u32| {
            self.fmtp_param(key)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(default)
        };
        (
            parse("sizelength", 13),
            parse("indexlength", 3),
            parse("indexdeltalength", 3),
        )
    }

    /// Audio channel count: rtpmap channels, else the fmtp `config=`
    /// AudioSpecificConfig channel_configuration, else 2.
    pub fn audio_channels(&self) -> u8 {
        if let Some(channels) = self.channels {
            return channels;
        }
        if let Some(config) = self.fmtp_param("config") {
            if let Some(channels) = channels_from_audio_specific_config(config) {
                return channels;
            }
        }
        2
    }
}

/// The parsed DESCRIBE body.
#[derive(Debug)]
pub struct SessionDescription {
    pub medias: Vec<MediaDescription>,
}

/// Parse an SDP body. Tolerates CRLF or bare LF line endings; unknown
/// lines are ignored.
pub fn parse(body: &str) -> Result<SessionDescription> {
    let mut medias = Vec::new();
    // Section state: None before the first m= line, Some(None) inside a
    // skipped section, Some(Some(..)) inside a section under construction.
    let mut section: Option<Option<PendingMedia>> = None;

    for raw_line in body.lines() {
        let line = raw_line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix("m=") {
            if let Some(Some(pending)) = section.take() {
                medias.push(pending.finish()?);
            }
            section = Some(parse_media_line(rest)?);
            continue;
        }

        let pending = match section.as_mut() {
            Some(Some(pending)) => pending,
            // Session-level lines and skipped sections.
            _ => continue,
        };

        if let Some(rest) = line.strip_prefix("a=rtpmap:") {
            pending.apply_rtpmap(rest)?;
        } else if let Some(rest) = line.strip_prefix("a=control:") {
            pending.control = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("a=fmtp:") {
            pending.apply_fmtp(rest);
        }
    }
    if let Some(Some(pending)) = section.take() {
        medias.push(pending.finish()?);
    }

    if medias.is_empty() {
        return Err(sdp_err("no usable media sections"));
    }
    Ok(SessionDescription { medias })
}

struct PendingMedia {
    kind: MediaKind,
    payload_type: u8,
    rtpmap: Option<(CodecId, u32, Option<u8>)>,
    control: Option<String>,
    fmtp: Vec<(String, String)>,
}

/// Parse `<kind> <port> <proto> <pt> ...` from an `m=` line. Returns
/// `None` (skip the section) for kinds other than video/audio or
/// non-RTP/AVP profiles.
fn parse_media_line(rest: &str) -> Result<Option<PendingMedia>> {
    let parts: Vec<&str> = rest.split_whitespace().collect();
    if parts.len() < 4 {
        return Err(sdp_err("malformed m= line"));
    }
    let kind = match parts[0] {
        "video" => MediaKind::Video,
        "audio" => MediaKind::Audio,
        other => {
            tracing::debug!(kind = other, "skipping non-audio/video media section");
            return Ok(None);
        }
    };
    if !parts[2].starts_with("RTP/AVP") {
        tracing::debug!(profile = parts[2], "skipping non-RTP/AVP media section");
        return Ok(None);
    }
    let payload_type: u8 = parts[3]
        .parse()
        .map_err(|_| sdp_err("invalid payload type in m= line"))?;
    Ok(Some(PendingMedia {
        kind,
        payload_type,
        rtpmap: None,
        control: None,
        fmtp: Vec::new(),
    }))
}

impl PendingMedia {
    /// `a=rtpmap:<pt> <codec>/<rate>[/<channels>]`
    fn apply_rtpmap(&mut self, rest: &str) -> Result<()> {
        let (pt, mapping) = rest.split_once(' ').ok_or(sdp_err("malformed rtpmap"))?;
        if pt.trim().parse::<u8>() != Ok(self.payload_type) {
            // rtpmap for a payload type this section does not use.
            return Ok(());
        }
        let mut fields = mapping.trim().split('/');
        let name = fields.next().unwrap_or("");
        let rate: u32 = fields
            .next()
            .and_then(|r| r.parse().ok())
            .ok_or(sdp_err("rtpmap missing clock rate"))?;
        let channels: Option<u8> = fields.next().and_then(|c| c.parse().ok());

        let codec = if name.eq_ignore_ascii_case("H264") {
            CodecId::H264
        } else if name.eq_ignore_ascii_case("H265") || name.eq_ignore_ascii_case("HEVC") {
            CodecId::H265
        } else if name.eq_ignore_ascii_case("MPEG4-GENERIC") || name.eq_ignore_ascii_case("AAC") {
            CodecId::Aac
        } else {
            return Err(RelayError::Sdp {
                reason: format!("unsupported codec {name}"),
            });
        };
        self.rtpmap = Some((codec, rate, channels));
        Ok(())
    }

    /// `a=fmtp:<pt> key=value;key=value;...`
    fn apply_fmtp(&mut self, rest: &str) {
        let Some((pt, params)) = rest.split_once(' ') else {
            return;
        };
        if pt.trim().parse::<u8>() != Ok(self.payload_type) {
            return;
        }
        for param in params.split(';') {
            let param = param.trim();
            if param.is_empty() {
                continue;
            }
            match param.split_once('=') {
                Some((key, value)) => self
                    .fmtp
                    .push((key.trim().to_string(), value.trim().to_string())),
                None => self.fmtp.push((param.to_string(), String::new())),
            }
        }
    }

    fn finish(self) -> Result<MediaDescription> {
        let (codec, clock_rate, channels) = self.rtpmap.ok_or_else(|| {
            sdp_err("media section without rtpmap")
        })?;
        Ok(MediaDescription {
            kind: self.kind,
            payload_type: self.payload_type,
            codec,
            clock_rate,
            channels,
            control: self.control,
            fmtp: self.fmtp,
        })
    }
}

/// Extract channel_configuration from a hex AudioSpecificConfig
/// (ISO/IEC 14496-3 §1.6.2.1): 5 bits object type, 4 bits frequency
/// index, 4 bits channel configuration.
fn channels_from_audio_specific_config(hex: &str) -> Option<u8> {
    let hex = hex.trim();
    if hex.len() < 4 {
        return None;
    }
    let b1 = u8::from_str_radix(&hex[2..4], 16).ok()?;
    let channels = (b1 >> 3) & 0x0F;
    (channels > 0).then_some(channels)
}

fn sdp_err(reason: &str) -> RelayError {
    RelayError::Sdp {
        reason: reason.to_string(),
    }
}
