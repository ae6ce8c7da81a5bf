//! Error types for ISOBMFF parsing and writing.

use thiserror::Error;

use crate::fourcc::FourCC;

/// Errors that can occur while parsing or scanning ISOBMFF data.
#[derive(Error, Debug)]
pub enum Mp4Error {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The provided buffer does not begin with a `moov` box.
    #[error("moov box not found in buffer")]
    MoovNotFound,

    /// Required sample table data is missing for a track.
    ///
    /// Recorded per track; `parse_tracks` drops the track instead of
    /// failing the whole parse.
    #[error("track {track_id}: invalid track: {reason}")]
    InvalidTrack {
        /// Track ID from tkhd.
        track_id: u32,
        /// Which prerequisite is missing.
        reason: &'static str,
    },

    /// A sample table iterator exhausted mid-stream.
    #[error("track {track_id}: corrupt data: {detail}")]
    CorruptData {
        /// Track ID from tkhd.
        track_id: u32,
        /// Where the under-run occurred.
        detail: String,
    },

    /// Unexpected EOF while reading a box header or body.
    #[error("short read: expected {expected} bytes, got {actual}")]
    ShortRead {
        /// Bytes required.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },

    /// A box declares a size smaller than its own header.
    #[error("box {kind} declares invalid size {size}")]
    InvalidBoxSize {
        /// Offending box type.
        kind: FourCC,
        /// Declared total size.
        size: u64,
    },
}

/// Result type alias for ISOBMFF operations.
pub type Result<T> = std::result::Result<T, Mp4Error>;
