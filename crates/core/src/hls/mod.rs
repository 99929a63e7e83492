//! HTTP Live Streaming output (RFC 8216, version 3).
//!
//! The [`Segmenter`] owns the live end of the pipeline: it muxes access
//! units into TS bytes, cuts keyframe-aligned segments, maintains the
//! sliding window of files on disk, and republishes the playlist after
//! every window change. [`playlist`] renders and atomically writes the
//! `.m3u8` view.
//!
//! Filesystem layout under the output directory:
//!
//! ```text
//! index.m3u8      current playlist, replaced by rename
//! segment_<N>.ts  TS segments, N monotonically increasing from 0
//! ```

pub mod playlist;
pub mod segmenter;

pub use playlist::PLAYLIST_NAME;
pub use segmenter::{Segment, Segmenter};
