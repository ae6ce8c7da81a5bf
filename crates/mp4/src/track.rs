//! Track extraction and sample-index reconstruction from a moov buffer.
//!
//! [`parse_tracks`] walks the moov tree capturing per-track metadata and the
//! raw sample-table payloads, then fuses the size, timing, chunk-layout, and
//! sync tables into a flat [`Sample`] index per track. Tracks with missing
//! prerequisites or corrupt tables are dropped from the result rather than
//! failing the parse, so one broken track does not hide the others.

use bytes::Bytes;
use tracing::debug;

use crate::codec::{avc1_codec_string, mp4a_codec_string};
use crate::error::{Mp4Error, Result};
use crate::fourcc;
use crate::reader::{Reader, read_audio_sample_entry, read_visual_sample_entry};
use crate::tables::{Co64Iter, CttsEntry, CttsIter, StscIter, StszIter, SttsIter, U32Iter};

/// Distinguishes video and audio tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackKind {
    #[default]
    Video,
    Audio,
}

/// A single media sample in decode order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    pub track_id: u32,
    /// Absolute file offset of the sample payload (i64 to accommodate co64).
    pub offset: i64,
    pub size: u32,
    /// Duration in the track's time-scale units.
    pub duration: u32,
    /// Decode timestamp in the track's time-scale units.
    pub dts: i64,
    /// Composition offset; pts = dts + pres_offset.
    pub pres_offset: i32,
    pub is_sync: bool,
}

impl Sample {
    /// Presentation timestamp.
    pub fn pts(&self) -> i64 {
        self.dts + self.pres_offset as i64
    }
}

/// Raw moov sub-slices and parsing state retained for init-segment
/// regeneration.
#[derive(Debug, Default)]
struct TrackRaw {
    stsd: Bytes, // entire raw box
    tkhd: Bytes, // payload after version/flags
    mdhd: Bytes, // payload after version/flags
    hdlr: Bytes, // entire raw box
    dinf: Bytes, // entire raw box
    tkhd_version: u8,
    tkhd_flags: u32,
    mdhd_version: u8,
    has_vmhd: bool,
    has_dinf: bool,

    stsz: Option<Bytes>,
    stts: Option<Bytes>,
    stsc: Option<Bytes>,
    ctts: Option<Bytes>,
    ctts_version: u8,
    stss: Option<Bytes>,
    stco: Option<Bytes>,
    co64: Option<Bytes>,
    sample_count: u32,
}

/// Metadata for one track parsed from a moov box.
#[derive(Debug, Default)]
pub struct Track {
    pub id: u32,
    pub kind: TrackKind,
    pub time_scale: u32,
    /// Track duration in `time_scale` units.
    pub duration: u64,

    pub width: u16,
    pub height: u16,
    pub channel_count: u16,
    /// Sample rate in Hz (top 16 bits of the mp4a fixed-point field).
    pub sample_rate: u32,

    /// MIME codec string (e.g. "avc1.64001e", "mp4a.40.2").
    pub codec: String,
    /// 1-based stsd entry index, finalised from the last activated stsc run.
    pub sample_desc_idx: u32,
    /// Flat sample index in decode order.
    pub samples: Vec<Sample>,

    raw: TrackRaw,
}

impl Track {
    /// The raw stsd box, header included.
    pub fn stsd_raw(&self) -> &Bytes {
        &self.raw.stsd
    }

    /// The tkhd payload after the version/flags header.
    pub fn tkhd_raw(&self) -> &Bytes {
        &self.raw.tkhd
    }

    /// The mdhd payload after the version/flags header.
    pub fn mdhd_raw(&self) -> &Bytes {
        &self.raw.mdhd
    }

    /// The entire raw hdlr box.
    pub fn hdlr_raw(&self) -> &Bytes {
        &self.raw.hdlr
    }

    /// The entire raw dinf box.
    pub fn dinf_raw(&self) -> &Bytes {
        &self.raw.dinf
    }

    pub fn tkhd_version(&self) -> u8 {
        self.raw.tkhd_version
    }

    pub fn tkhd_flags(&self) -> u32 {
        self.raw.tkhd_flags
    }

    pub fn mdhd_version(&self) -> u8 {
        self.raw.mdhd_version
    }

    /// True if the track carries a vmhd box (video media header).
    pub fn has_vmhd(&self) -> bool {
        self.raw.has_vmhd
    }

    /// True if the track carries a dinf box.
    pub fn has_dinf(&self) -> bool {
        self.raw.has_dinf
    }

    /// Declared stsz sample count.
    pub fn sample_count(&self) -> u32 {
        self.raw.sample_count
    }
}

/// Returns the track with the given ID, if present.
pub fn find_track(tracks: &[Track], id: u32) -> Option<&Track> {
    tracks.iter().find(|t| t.id == id)
}

/// Aggregated stats for the samples belonging to one track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackSampleStats {
    pub track_id: u32,
    pub time_scale: u32,
    /// Sum of sample durations.
    pub duration: u64,
    /// Smallest PTS seen, or -1 when the track has no samples.
    pub earliest_pts: i64,
    pub sample_count: usize,
}

/// Aggregate sample count, duration, and earliest PTS per track.
///
/// Only tracks with at least one sample in `samples` are returned.
pub fn collect_track_sample_stats(tracks: &[Track], samples: &[Sample]) -> Vec<TrackSampleStats> {
    let mut stats: Vec<TrackSampleStats> = tracks
        .iter()
        .map(|t| TrackSampleStats {
            track_id: t.id,
            time_scale: t.time_scale,
            duration: 0,
            earliest_pts: -1,
            sample_count: 0,
        })
        .collect();

    for sample in samples {
        if let Some(st) = stats.iter_mut().find(|st| st.track_id == sample.track_id) {
            st.sample_count += 1;
            st.duration += sample.duration as u64;
            let pts = sample.pts();
            if st.earliest_pts < 0 || pts < st.earliest_pts {
                st.earliest_pts = pts;
            }
        }
    }

    stats.retain(|st| st.sample_count > 0);
    stats
}

/// Parse a full moov box buffer (header included) into tracks with their
/// sample indices populated, plus the movie duration from mvhd.
///
/// Tracks whose sample tables are missing or corrupt are dropped from the
/// result with a debug diagnostic; an empty track list is not an error by
/// itself.
pub fn parse_tracks(moov: &Bytes) -> Result<(Vec<Track>, u64)> {
    let mut r = Reader::new(moov.clone());
    if !r.next() || r.box_type() != fourcc::MOOV {
        return Err(Mp4Error::MoovNotFound);
    }

    let mut tracks = Vec::new();
    let mut duration = 0u64;

    r.enter();
    while r.next() {
        match r.box_type() {
            fourcc::MVHD => duration = r.read_mvhd().duration,
            fourcc::TRAK => {
                if let Some(track) = parse_trak(&mut r) {
                    tracks.push(track);
                }
            }
            _ => {}
        }
    }
    r.exit();

    let mut valid = Vec::with_capacity(tracks.len());
    for mut track in tracks {
        match track.build_samples() {
            Ok(()) => valid.push(track),
            Err(e) => debug!(track_id = track.id, error = %e, "dropping track"),
        }
    }

    Ok((valid, duration))
}

fn parse_trak(r: &mut Reader) -> Option<Track> {
    let mut track = Track::default();

    r.enter();
    while r.next() {
        match r.box_type() {
            fourcc::TKHD => {
                track.raw.tkhd_version = r.version();
                track.raw.tkhd_flags = r.flags();
                track.raw.tkhd = r.payload();
                let tkhd = r.read_tkhd();
                track.id = tkhd.track_id;
                track.width = (tkhd.width >> 16) as u16;
                track.height = (tkhd.height >> 16) as u16;
            }
            fourcc::MDIA => parse_mdia(r, &mut track),
            _ => {}
        }
    }
    r.exit();

    // Unrecognised tracks never assemble a codec string.
    if track.id == 0 || track.codec.is_empty() {
        return None;
    }
    Some(track)
}

fn parse_mdia(r: &mut Reader, track: &mut Track) {
    let mut handler_type = [0u8; 4];

    r.enter();
    while r.next() {
        match r.box_type() {
            fourcc::MDHD => {
                track.raw.mdhd_version = r.version();
                track.raw.mdhd = r.payload();
                let mdhd = r.read_mdhd();
                track.time_scale = mdhd.time_scale;
                track.duration = mdhd.duration;
            }
            fourcc::HDLR => {
                track.raw.hdlr = r.raw_box();
                handler_type = r.read_hdlr();
            }
            fourcc::MINF => parse_minf(r, track, handler_type),
            _ => {}
        }
    }
    r.exit();
}

fn parse_minf(r: &mut Reader, track: &mut Track, handler_type: [u8; 4]) {
    r.enter();
    while r.next() {
        match r.box_type() {
            fourcc::VMHD => track.raw.has_vmhd = true,
            fourcc::SMHD => track.raw.has_vmhd = false,
            fourcc::DINF => {
                track.raw.has_dinf = true;
                track.raw.dinf = r.raw_box();
            }
            fourcc::STBL => parse_stbl(r, track, handler_type),
            _ => {}
        }
    }
    r.exit();
}

fn parse_stbl(r: &mut Reader, track: &mut Track, handler_type: [u8; 4]) {
    r.enter();
    while r.next() {
        match r.box_type() {
            fourcc::STSD => {
                track.raw.stsd = r.raw_box();
                parse_stsd(r, track, handler_type);
            }
            fourcc::STSZ => track.raw.stsz = Some(r.payload()),
            fourcc::STTS => track.raw.stts = Some(r.payload()),
            fourcc::STSC => track.raw.stsc = Some(r.payload()),
            fourcc::CTTS => {
                track.raw.ctts = Some(r.payload());
                track.raw.ctts_version = r.version();
            }
            fourcc::STSS => track.raw.stss = Some(r.payload()),
            fourcc::STCO => track.raw.stco = Some(r.payload()),
            fourcc::CO64 => track.raw.co64 = Some(r.payload()),
            _ => {}
        }
    }
    r.exit();

    if let Some(stsz) = track.raw.stsz.as_ref() {
        track.raw.sample_count = StszIter::count(&StszIter::new(stsz));
    }

    // Provisional; finalised from the last activated stsc run during fusion.
    if let Some(stsc) = track.raw.stsc.as_ref()
        && let Some(entry) = StscIter::new(stsc).next()
    {
        track.sample_desc_idx = entry.sample_desc_idx;
    }
}

/// Inspect the first stsd entry for codec configuration. Other handler and
/// entry type combinations leave the codec string empty and the track is
/// discarded by the caller.
fn parse_stsd(r: &mut Reader, track: &mut Track, handler_type: [u8; 4]) {
    if r.payload().len() < 4 {
        return;
    }

    r.enter();
    r.skip(4); // entry count

    if !r.next() {
        r.exit();
        return;
    }

    let entry_type = r.box_type();
    let entry = r.payload();

    if handler_type == fourcc::HANDLER_VIDEO && entry_type == fourcc::AVC1 {
        track.kind = TrackKind::Video;
        track.codec = "avc1".to_owned();
        if entry.len() >= 78 {
            let visual = read_visual_sample_entry(&entry);
            track.width = visual.width;
            track.height = visual.height;

            r.enter();
            r.skip(visual.child_offset);
            while r.next() {
                if r.box_type() == fourcc::AVCC {
                    if let Some(codec) = avc1_codec_string(&r.payload()) {
                        track.codec = codec;
                    }
                    break;
                }
            }
            r.exit();
        }
    } else if handler_type == fourcc::HANDLER_AUDIO && entry_type == fourcc::MP4A {
        track.kind = TrackKind::Audio;
        track.codec = "mp4a".to_owned();
        if entry.len() >= 28 {
            let audio = read_audio_sample_entry(&entry);
            track.channel_count = audio.channel_count;
            track.sample_rate = audio.sample_rate >> 16;

            r.enter();
            r.skip(audio.child_offset);
            while r.next() {
                if r.box_type() == fourcc::ESDS {
                    track.codec = mp4a_codec_string(&r.payload());
                    break;
                }
            }
            r.exit();
        }
    }

    r.exit();
}

/// Chunk offset source: co64 when present, stco otherwise.
enum ChunkOffsetIter<'a> {
    Stco(U32Iter<'a>),
    Co64(Co64Iter<'a>),
}

impl ChunkOffsetIter<'_> {
    fn next(&mut self) -> Option<i64> {
        match self {
            ChunkOffsetIter::Stco(it) => it.next().map(i64::from),
            ChunkOffsetIter::Co64(it) => it.next().map(|v| v as i64),
        }
    }
}

impl Track {
    /// Fuse the captured sample tables into the flat sample index.
    fn build_samples(&mut self) -> Result<()> {
        let (samples, sample_desc_idx) = build_sample_index(self.id, &self.raw)?;
        self.samples = samples;
        if let Some(idx) = sample_desc_idx {
            self.sample_desc_idx = idx;
        }
        Ok(())
    }
}

/// Fuse the raw sample tables into a flat sample index.
///
/// The four run-length streams (sizes, decode deltas, composition offsets,
/// chunk map) are consumed in lockstep with the chunk offset list. The last
/// sample does not advance the chunk or time cursors, so inputs that provide
/// exactly enough entries parse cleanly. Exhausted stts/ctts runs are
/// tolerated (the last duration continues, the composition offset falls back
/// to 0); an exhausted stsz stream is corruption.
///
/// Returns the samples plus the sample description index of the last
/// activated stsc run (`None` when the table is empty).
fn build_sample_index(track_id: u32, raw: &TrackRaw) -> Result<(Vec<Sample>, Option<u32>)> {
    let invalid = |reason| Mp4Error::InvalidTrack { track_id, reason };

    let Some(stsz) = raw.stsz.as_ref() else {
        return Err(invalid("missing stsz sample sizes"));
    };
    let Some(stts) = raw.stts.as_ref() else {
        return Err(invalid("missing stts time-to-sample data"));
    };
    let Some(stsc) = raw.stsc.as_ref() else {
        return Err(invalid("missing stsc sample-to-chunk data"));
    };

    let mut chunk_offsets = if let Some(co64) = raw.co64.as_ref() {
        ChunkOffsetIter::Co64(Co64Iter::new(co64))
    } else if let Some(stco) = raw.stco.as_ref() {
        ChunkOffsetIter::Stco(U32Iter::new(stco))
    } else {
        return Err(invalid("missing chunk offset data (stco/co64)"));
    };

    let num_samples = StszIter::count(&StszIter::new(stsz)) as usize;
    if num_samples == 0 {
        return Ok((Vec::new(), None));
    }
    let mut stsz_it = StszIter::new(stsz);

    let mut stsc_it = StscIter::new(stsc);
    let mut cur_stsc = stsc_it.next().ok_or(invalid("empty stsc table"))?;
    let mut next_stsc = stsc_it.next();

    let mut stts_it = SttsIter::new(stts);
    let mut cur_stts = stts_it.next().ok_or(invalid("empty stts table"))?;
    let mut stts_remaining = cur_stts.count;
    let mut stts_underrun = false;

    let mut ctts_it = raw
        .ctts
        .as_ref()
        .map(|data| CttsIter::new(data, raw.ctts_version));
    let mut cur_ctts = CttsEntry {
        count: 0,
        offset: 0,
    };
    let mut ctts_remaining = 0u32;
    if let Some(it) = ctts_it.as_mut()
        && let Some(entry) = it.next()
    {
        cur_ctts = entry;
        ctts_remaining = entry.count;
    }
    let mut ctts_underrun = false;

    let mut sync_it = raw.stss.as_ref().map(|data| U32Iter::new(data));
    let has_sync_table = sync_it.is_some();
    let mut next_sync = sync_it.as_mut().and_then(|it| it.next());

    let mut chunk_offset = chunk_offsets.next().unwrap_or(0);
    let mut chunk_idx = 1u32;
    let mut sample_in_chunk = 0u32;
    let mut offset_in_chunk = 0i64;
    let mut dts = 0i64;

    let mut samples = Vec::with_capacity(num_samples);

    for i in 0..num_samples {
        let Some(size) = stsz_it.next() else {
            return Err(Mp4Error::CorruptData {
                track_id,
                detail: format!("stsz iterator exhausted at sample {i}/{num_samples}"),
            });
        };

        let pres_offset = if ctts_remaining > 0 { cur_ctts.offset } else { 0 };
        let is_sync = if has_sync_table {
            next_sync == Some(i as u32 + 1)
        } else {
            true
        };

        samples.push(Sample {
            track_id,
            offset: chunk_offset + offset_in_chunk,
            size,
            duration: cur_stts.duration,
            dts,
            pres_offset,
            is_sync,
        });

        // The last sample advances no cursors; a spurious chunk-offset
        // fetch here would reject inputs with exactly enough entries.
        if i + 1 == num_samples {
            break;
        }

        sample_in_chunk += 1;
        offset_in_chunk += size as i64;
        if sample_in_chunk >= cur_stsc.samples_per_chunk {
            sample_in_chunk = 0;
            offset_in_chunk = 0;
            chunk_idx += 1;
            if let Some(offset) = chunk_offsets.next() {
                chunk_offset = offset;
            }
            if let Some(next) = next_stsc
                && chunk_idx >= next.first_chunk
            {
                cur_stsc = next;
                next_stsc = stsc_it.next();
            }
        }

        dts += cur_stts.duration as i64;
        stts_remaining = stts_remaining.saturating_sub(1);
        if stts_remaining == 0 {
            if let Some(entry) = stts_it.next() {
                cur_stts = entry;
                stts_remaining = entry.count;
            } else if !stts_underrun {
                debug!(
                    track_id,
                    sample = i,
                    "stts runs exhausted before sample count, continuing with last duration"
                );
                stts_underrun = true;
            }
        }

        if ctts_it.is_some() {
            ctts_remaining = ctts_remaining.saturating_sub(1);
            if ctts_remaining == 0 {
                if let Some(entry) = ctts_it.as_mut().and_then(|it| it.next()) {
                    cur_ctts = entry;
                    ctts_remaining = entry.count;
                } else if !ctts_underrun {
                    debug!(
                        track_id,
                        sample = i,
                        "ctts runs exhausted before sample count, presentation offset falls back to 0"
                    );
                    ctts_underrun = true;
                }
            }
        }

        if is_sync && has_sync_table {
            next_sync = sync_it.as_mut().and_then(|it| it.next());
        }
    }

    Ok((samples, Some(cur_stsc.sample_desc_idx)))
}
