//! Live HLS media playlist rendering and atomic publication (RFC 8216).
//!
//! The playlist is a derived view of the segment window, never a source
//! of truth. It is rewritten after every window change via
//! write-new-then-rename, so an HTTP reader can never observe a
//! truncated file.

use std::fs;
use std::path::Path;

use crate::hls::Segment;

/// Playlist filename published next to the segments.
pub const PLAYLIST_NAME: &str = "index.m3u8";

const PLAYLIST_TMP_NAME: &str = ".index.m3u8.tmp";

/// Render a version-3 live media playlist over the current window.
///
/// `target_duration_ms` is the configured segment duration; the
/// advertised `#EXT-X-TARGETDURATION` is that value or the longest
/// observed segment, whichever is larger, rounded up to whole seconds.
pub fn render(target_duration_ms: u64, segments: &[Segment]) -> String {
    let max_observed = segments.iter().map(|s| s.duration_ms).max().unwrap_or(0);
    let target_secs = target_duration_ms.max(max_observed).div_ceil(1000);
    let media_sequence = segments.first().map(|s| s.index).unwrap_or(0);

    let mut playlist = String::with_capacity(128 + segments.len() * 40);
    playlist.push_str("#EXTM3U\n");
    playlist.push_str("#EXT-X-VERSION:3\n");
    playlist.push_str(&format!("#EXT-X-TARGETDURATION:{target_secs}\n"));
    playlist.push_str(&format!("#EXT-X-MEDIA-SEQUENCE:{media_sequence}\n"));
    for segment in segments {
        let secs = segment.duration_ms / 1000;
        let tenths = (segment.duration_ms % 1000) / 100;
        playlist.push_str(&format!("#EXTINF:{secs}.{tenths},\n"));
        playlist.push_str(&segment.filename);
        playlist.push('\n');
    }
    playlist
}

/// Write the playlist into `dir` atomically: write a temp file, then
/// rename over [`PLAYLIST_NAME`].
pub fn write_atomic(dir: &Path, content: &str) -> std::io::Result<()> {
    let tmp = dir.join(PLAYLIST_TMP_NAME);
    fs::write(&tmp, content)?;
    fs::rename(&tmp, dir.join(PLAYLIST_NAME))
}
