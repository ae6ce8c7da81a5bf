//! ISO Base Media File Format (ISO/IEC 14496-12) structure parsing.
//!
//! This crate reads MP4 files and exposes their logical media structure
//! without touching the media payload: the box tree, per-track metadata,
//! and a flat per-sample index carrying absolute file offsets, decode and
//! presentation timestamps, durations, and sync flags.
//!
//! The usual flow: scan the file with [`Scanner`] to locate the `moov` box,
//! pull its bytes into a buffer, and hand them to [`track::parse_tracks`].
//! Lower layers are exposed for custom walks: [`Reader`] is a re-entrant
//! cursor over any in-memory box tree, and the [`tables`] iterators decode
//! the raw sample-table payloads lazily. [`Writer`] emits well-formed boxes
//! with size back-patching for init-segment and fragment building.

pub mod codec;
mod cursor;
pub mod error;
pub mod fourcc;
pub mod reader;
pub mod scanner;
pub mod tables;
pub mod track;
pub mod writer;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{Mp4Error, Result};
pub use fourcc::FourCC;
pub use reader::{
    AudioSampleEntry, Ftyp, Mdhd, Mvhd, Reader, Tkhd, Trex, VisualSampleEntry,
    read_audio_sample_entry, read_ftyp, read_visual_sample_entry,
};
pub use scanner::{ScanEntry, Scanner};
pub use tables::{
    Co64Iter, CttsEntry, CttsIter, ElstEntry, ElstIter, StscEntry, StscIter, StszIter, SttsEntry,
    SttsIter, TrunEntry, TrunIter, U32Iter,
};
pub use track::{
    Sample, Track, TrackKind, TrackSampleStats, collect_track_sample_stats, find_track,
    parse_tracks,
};
pub use writer::{DrefEntry, Writer};
