//! Sequential box writer with size back-patching.
//!
//! [`Writer`] appends well-formed boxes to a growable buffer. Containers are
//! opened with [`Writer::start_box`], which reserves the 4-byte size field;
//! the matching [`Writer::end_box`] patches it once the content length is
//! known. The typed `write_*` encoders cover the header- and fragment-level
//! boxes needed by init-segment builders; they are not on the read critical
//! path.

use bytes::Bytes;

use crate::fourcc::FourCC;
use crate::reader::Trex;
use crate::tables::{
    CttsEntry, ElstEntry, StscEntry, SttsEntry, TRUN_DATA_OFFSET_PRESENT,
    TRUN_SAMPLE_CTO_PRESENT, TRUN_SAMPLE_DURATION_PRESENT, TRUN_SAMPLE_FLAGS_PRESENT,
    TRUN_SAMPLE_SIZE_PRESENT, TrunEntry,
};

/// trun flags emitted by [`Writer::write_trun`]: data offset plus all four
/// per-sample fields.
pub const TRUN_WRITE_FLAGS: u32 = TRUN_DATA_OFFSET_PRESENT
    | TRUN_SAMPLE_DURATION_PRESENT
    | TRUN_SAMPLE_SIZE_PRESENT
    | TRUN_SAMPLE_FLAGS_PRESENT
    | TRUN_SAMPLE_CTO_PRESENT;

/// A data reference entry: child box type plus its content after the header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrefEntry {
    pub kind: FourCC,
    pub data: Vec<u8>,
}

/// Sequential box writer.
#[derive(Debug, Default)]
pub struct Writer {
    buf: Vec<u8>,
    stack: Vec<usize>,
}

impl Writer {
    pub fn new() -> Self {
        Writer::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Writer {
            buf: Vec::with_capacity(capacity),
            stack: Vec::new(),
        }
    }

    /// Bytes written so far. Meaningful once every started box was ended.
    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Bytes {
        Bytes::from(self.buf)
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Open a box; the size field is back-patched by [`Writer::end_box`].
    pub fn start_box(&mut self, kind: FourCC) {
        self.stack.push(self.buf.len());
        self.put_u32(0);
        self.buf.extend_from_slice(&kind.0);
    }

    /// Open a full box: box header plus version and 24-bit flags.
    pub fn start_full_box(&mut self, kind: FourCC, version: u8, flags: u32) {
        self.start_box(kind);
        self.buf.push(version);
        self.buf.push((flags >> 16) as u8);
        self.buf.push((flags >> 8) as u8);
        self.buf.push(flags as u8);
    }

    /// Close the innermost open box, patching its size field.
    pub fn end_box(&mut self) {
        let Some(at) = self.stack.pop() else {
            return;
        };
        let size = (self.buf.len() - at) as u32;
        self.buf[at..at + 4].copy_from_slice(&size.to_be_bytes());
    }

    /// Emit a leaf box with an opaque payload.
    pub fn write_box(&mut self, kind: FourCC, payload: &[u8]) {
        self.start_box(kind);
        self.buf.extend_from_slice(payload);
        self.end_box();
    }

    /// Emit a full leaf box with an opaque payload.
    pub fn write_full_box(&mut self, kind: FourCC, version: u8, flags: u32, payload: &[u8]) {
        self.start_full_box(kind, version, flags);
        self.buf.extend_from_slice(payload);
        self.end_box();
    }

    pub fn write_ftyp(&mut self, major_brand: FourCC, minor_version: u32, compatible: &[FourCC]) {
        self.start_box(crate::fourcc::FTYP);
        self.buf.extend_from_slice(&major_brand.0);
        self.put_u32(minor_version);
        for brand in compatible {
            self.buf.extend_from_slice(&brand.0);
        }
        self.end_box();
    }

    /// Movie header with a unity matrix, 1.0 rate and volume, and zeroed
    /// timestamps. Version 1 is emitted when the duration needs 64 bits.
    pub fn write_mvhd(&mut self, time_scale: u32, duration: u64, next_track_id: u32) {
        let v1 = duration > u32::MAX as u64;
        self.start_full_box(crate::fourcc::MVHD, v1 as u8, 0);
        if v1 {
            self.put_zeros(16); // creation + modification
            self.put_u32(time_scale);
            self.put_u64(duration);
        } else {
            self.put_zeros(8);
            self.put_u32(time_scale);
            self.put_u32(duration as u32);
        }
        self.put_u32(0x0001_0000); // preferred rate 1.0
        self.put_u16(0x0100); // preferred volume 1.0
        self.put_zeros(10);
        self.put_unity_matrix();
        self.put_zeros(24); // pre-defined
        self.put_u32(next_track_id);
        self.end_box();
    }

    /// Track header. Version 1 is emitted when the duration needs 64 bits.
    pub fn write_tkhd(&mut self, flags: u32, track_id: u32, duration: u64, width: u32, height: u32) {
        let v1 = duration > u32::MAX as u64;
        self.start_full_box(crate::fourcc::TKHD, v1 as u8, flags);
        if v1 {
            self.put_zeros(16);
            self.put_u32(track_id);
            self.put_zeros(4);
            self.put_u64(duration);
        } else {
            self.put_zeros(8);
            self.put_u32(track_id);
            self.put_zeros(4);
            self.put_u32(duration as u32);
        }
        self.put_zeros(8); // reserved
        self.put_zeros(8); // layer, alternate group, volume, reserved
        self.put_unity_matrix();
        self.put_u32(width); // 16.16 fixed
        self.put_u32(height);
        self.end_box();
    }

    /// Media header. The version-1 duration is written as the full 64-bit
    /// field.
    pub fn write_mdhd(&mut self, time_scale: u32, duration: u64, language: u16) {
        let v1 = duration > u32::MAX as u64;
        self.start_full_box(crate::fourcc::MDHD, v1 as u8, 0);
        if v1 {
            self.put_zeros(16);
            self.put_u32(time_scale);
            self.put_u64(duration);
        } else {
            self.put_zeros(8);
            self.put_u32(time_scale);
            self.put_u32(duration as u32);
        }
        self.put_u16(language);
        self.put_u16(0); // quality
        self.end_box();
    }

    pub fn write_hdlr(&mut self, handler: [u8; 4], name: &str) {
        self.start_full_box(crate::fourcc::HDLR, 0, 0);
        self.put_u32(0); // pre-defined
        self.buf.extend_from_slice(&handler);
        self.put_zeros(12); // reserved
        self.buf.extend_from_slice(name.as_bytes());
        self.buf.push(0);
        self.end_box();
    }

    pub fn write_vmhd(&mut self, graphics_mode: u16, opcolor: [u16; 3]) {
        self.start_full_box(crate::fourcc::VMHD, 0, 1);
        self.put_u16(graphics_mode);
        for c in opcolor {
            self.put_u16(c);
        }
        self.end_box();
    }

    pub fn write_smhd(&mut self, balance: u16) {
        self.start_full_box(crate::fourcc::SMHD, 0, 0);
        self.put_u16(balance);
        self.put_u16(0); // reserved
        self.end_box();
    }

    pub fn write_dref(&mut self, entries: &[DrefEntry]) {
        self.start_full_box(crate::fourcc::DREF, 0, 0);
        self.put_u32(entries.len() as u32);
        for entry in entries {
            self.write_box(entry.kind, &entry.data);
        }
        self.end_box();
    }

    /// Edit list. Version 1 is emitted when any entry needs 64-bit fields.
    pub fn write_elst(&mut self, entries: &[ElstEntry]) {
        let v1 = entries.iter().any(|e| {
            e.segment_duration > u32::MAX as u64
                || e.media_time > i32::MAX as i64
                || e.media_time < i32::MIN as i64
        });
        self.start_full_box(crate::fourcc::ELST, v1 as u8, 0);
        self.put_u32(entries.len() as u32);
        for entry in entries {
            if v1 {
                self.put_u64(entry.segment_duration);
                self.put_u64(entry.media_time as u64);
            } else {
                self.put_u32(entry.segment_duration as u32);
                self.put_u32(entry.media_time as i32 as u32);
            }
            self.put_u32(entry.media_rate);
        }
        self.end_box();
    }

    /// Sample sizes in the per-sample form (`sample_size` field 0).
    pub fn write_stsz(&mut self, sizes: &[u32]) {
        self.start_full_box(crate::fourcc::STSZ, 0, 0);
        self.put_u32(0);
        self.put_u32(sizes.len() as u32);
        for &size in sizes {
            self.put_u32(size);
        }
        self.end_box();
    }

    pub fn write_stco(&mut self, offsets: &[u32]) {
        self.start_full_box(crate::fourcc::STCO, 0, 0);
        self.put_u32(offsets.len() as u32);
        for &offset in offsets {
            self.put_u32(offset);
        }
        self.end_box();
    }

    pub fn write_co64(&mut self, offsets: &[u64]) {
        self.start_full_box(crate::fourcc::CO64, 0, 0);
        self.put_u32(offsets.len() as u32);
        for &offset in offsets {
            self.put_u64(offset);
        }
        self.end_box();
    }

    pub fn write_stss(&mut self, sample_indices: &[u32]) {
        self.start_full_box(crate::fourcc::STSS, 0, 0);
        self.put_u32(sample_indices.len() as u32);
        for &index in sample_indices {
            self.put_u32(index);
        }
        self.end_box();
    }

    pub fn write_stts(&mut self, entries: &[SttsEntry]) {
        self.start_full_box(crate::fourcc::STTS, 0, 0);
        self.put_u32(entries.len() as u32);
        for entry in entries {
            self.put_u32(entry.count);
            self.put_u32(entry.duration);
        }
        self.end_box();
    }

    /// Composition offsets. Version 1 is emitted when any offset is negative.
    pub fn write_ctts(&mut self, entries: &[CttsEntry]) {
        let v1 = entries.iter().any(|e| e.offset < 0);
        self.start_full_box(crate::fourcc::CTTS, v1 as u8, 0);
        self.put_u32(entries.len() as u32);
        for entry in entries {
            self.put_u32(entry.count);
            self.put_u32(entry.offset as u32);
        }
        self.end_box();
    }

    pub fn write_stsc(&mut self, entries: &[StscEntry]) {
        self.start_full_box(crate::fourcc::STSC, 0, 0);
        self.put_u32(entries.len() as u32);
        for entry in entries {
            self.put_u32(entry.first_chunk);
            self.put_u32(entry.samples_per_chunk);
            self.put_u32(entry.sample_desc_idx);
        }
        self.end_box();
    }

    /// Movie extends header. Version 1 is emitted for 64-bit durations.
    pub fn write_mehd(&mut self, fragment_duration: u64) {
        let v1 = fragment_duration > u32::MAX as u64;
        self.start_full_box(crate::fourcc::MEHD, v1 as u8, 0);
        if v1 {
            self.put_u64(fragment_duration);
        } else {
            self.put_u32(fragment_duration as u32);
        }
        self.end_box();
    }

    pub fn write_trex(&mut self, trex: Trex) {
        self.start_full_box(crate::fourcc::TREX, 0, 0);
        self.put_u32(trex.track_id);
        self.put_u32(trex.default_sample_description_index);
        self.put_u32(trex.default_sample_duration);
        self.put_u32(trex.default_sample_size);
        self.put_u32(trex.default_sample_flags);
        self.end_box();
    }

    pub fn write_mfhd(&mut self, sequence_number: u32) {
        self.start_full_box(crate::fourcc::MFHD, 0, 0);
        self.put_u32(sequence_number);
        self.end_box();
    }

    pub fn write_tfhd(&mut self, track_id: u32) {
        self.start_full_box(crate::fourcc::TFHD, 0, 0);
        self.put_u32(track_id);
        self.end_box();
    }

    /// Track fragment decode time. Version 1 is emitted for 64-bit times.
    pub fn write_tfdt(&mut self, base_media_decode_time: u64) {
        let v1 = base_media_decode_time > u32::MAX as u64;
        self.start_full_box(crate::fourcc::TFDT, v1 as u8, 0);
        if v1 {
            self.put_u64(base_media_decode_time);
        } else {
            self.put_u32(base_media_decode_time as u32);
        }
        self.end_box();
    }

    /// Track run with flags [`TRUN_WRITE_FLAGS`]: a data offset plus
    /// duration, size, flags, and composition offset per sample.
    pub fn write_trun(&mut self, data_offset: i32, entries: &[TrunEntry]) {
        self.start_full_box(crate::fourcc::TRUN, 0, TRUN_WRITE_FLAGS);
        self.put_u32(entries.len() as u32);
        self.put_u32(data_offset as u32);
        for entry in entries {
            self.put_u32(entry.duration);
            self.put_u32(entry.size);
            self.put_u32(entry.flags);
            self.put_u32(entry.composition_offset as u32);
        }
        self.end_box();
    }

    fn put_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    fn put_zeros(&mut self, n: usize) {
        self.buf.resize(self.buf.len() + n, 0);
    }

    fn put_unity_matrix(&mut self) {
        for v in [
            0x0001_0000u32,
            0,
            0,
            0,
            0x0001_0000,
            0,
            0,
            0,
            0x4000_0000,
        ] {
            self.put_u32(v);
        }
    }
}
