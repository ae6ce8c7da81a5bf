//! Shared test builders for assembling box structures byte by byte.

pub fn make_box(fourcc: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let size = (8 + body.len()) as u32;
    let mut out = Vec::with_capacity(size as usize);
    out.extend_from_slice(&size.to_be_bytes());
    out.extend_from_slice(fourcc);
    out.extend_from_slice(body);
    out
}

pub fn make_full_box(fourcc: &[u8; 4], version: u8, flags: u32, payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(4 + payload.len());
    body.push(version);
    body.push((flags >> 16) as u8);
    body.push((flags >> 8) as u8);
    body.push(flags as u8);
    body.extend_from_slice(payload);
    make_box(fourcc, &body)
}

pub fn make_moov(children: &[Vec<u8>]) -> Vec<u8> {
    make_box(b"moov", &children.concat())
}

pub fn make_stbl(children: &[Vec<u8>]) -> Vec<u8> {
    make_box(b"stbl", &children.concat())
}

/// Version-0 mvhd with the given time scale and duration.
pub fn make_mvhd(time_scale: u32, duration: u32) -> Vec<u8> {
    let mut payload = vec![0u8; 96];
    payload[8..12].copy_from_slice(&time_scale.to_be_bytes());
    payload[12..16].copy_from_slice(&duration.to_be_bytes());
    make_full_box(b"mvhd", 0, 0, &payload)
}

/// Version-0 tkhd carrying only a track ID.
pub fn make_tkhd(track_id: u32) -> Vec<u8> {
    let mut payload = vec![0u8; 80];
    payload[8..12].copy_from_slice(&track_id.to_be_bytes());
    make_full_box(b"tkhd", 0, 3, &payload)
}

/// Version-0 mdhd with the given time scale and duration.
pub fn make_mdhd(time_scale: u32, duration: u32) -> Vec<u8> {
    let mut payload = vec![0u8; 20];
    payload[8..12].copy_from_slice(&time_scale.to_be_bytes());
    payload[12..16].copy_from_slice(&duration.to_be_bytes());
    make_full_box(b"mdhd", 0, 0, &payload)
}

pub fn make_hdlr(handler: &[u8; 4], name: &str) -> Vec<u8> {
    let mut payload = vec![0u8; 20];
    payload[4..8].copy_from_slice(handler);
    payload.extend_from_slice(name.as_bytes());
    payload.push(0);
    make_full_box(b"hdlr", 0, 0, &payload)
}

/// stsd with a single sample entry.
pub fn make_stsd(entry: &[u8]) -> Vec<u8> {
    let mut payload = 1u32.to_be_bytes().to_vec();
    payload.extend_from_slice(entry);
    make_full_box(b"stsd", 0, 0, &payload)
}

/// avc1 sample entry with the fixed 78-byte prefix and an avcC child.
pub fn make_avc1_entry(width: u16, height: u16, avcc_payload: &[u8]) -> Vec<u8> {
    let mut body = vec![0u8; 78];
    body[24..26].copy_from_slice(&width.to_be_bytes());
    body[26..28].copy_from_slice(&height.to_be_bytes());
    body.extend_from_slice(&make_box(b"avcC", avcc_payload));
    make_box(b"avc1", &body)
}

/// mp4a sample entry with the fixed 28-byte prefix and an esds child.
pub fn make_mp4a_entry(channel_count: u16, sample_rate_hz: u32, esds_payload: &[u8]) -> Vec<u8> {
    let mut body = vec![0u8; 28];
    body[16..18].copy_from_slice(&channel_count.to_be_bytes());
    body[18..20].copy_from_slice(&16u16.to_be_bytes());
    body[24..28].copy_from_slice(&(sample_rate_hz << 16).to_be_bytes());
    body.extend_from_slice(&make_full_box(b"esds", 0, 0, esds_payload));
    make_box(b"mp4a", &body)
}

/// esds descriptor chain: ES_Descriptor > DecoderConfigDescriptor(oti) >
/// DecoderSpecificInfo(asc).
pub fn make_esds(oti: u8, asc: &[u8]) -> Vec<u8> {
    let mut dsi = vec![0x05, asc.len() as u8];
    dsi.extend_from_slice(asc);

    let mut dcd = vec![0x04, (13 + dsi.len()) as u8];
    dcd.push(oti);
    dcd.extend_from_slice(&[0u8; 12]);
    dcd.extend_from_slice(&dsi);

    let mut esd = vec![0x03, (3 + dcd.len()) as u8];
    esd.extend_from_slice(&[0, 1, 0]);
    esd.extend_from_slice(&dcd);
    esd
}

/// stsz in the constant-size form.
pub fn make_stsz_constant(sample_size: u32, count: u32) -> Vec<u8> {
    let mut payload = sample_size.to_be_bytes().to_vec();
    payload.extend_from_slice(&count.to_be_bytes());
    make_full_box(b"stsz", 0, 0, &payload)
}

/// stsz in the per-sample form.
pub fn make_stsz_sizes(sizes: &[u32]) -> Vec<u8> {
    let mut payload = 0u32.to_be_bytes().to_vec();
    payload.extend_from_slice(&(sizes.len() as u32).to_be_bytes());
    for &size in sizes {
        payload.extend_from_slice(&size.to_be_bytes());
    }
    make_full_box(b"stsz", 0, 0, &payload)
}

pub fn make_stts(runs: &[(u32, u32)]) -> Vec<u8> {
    let mut payload = (runs.len() as u32).to_be_bytes().to_vec();
    for &(count, duration) in runs {
        payload.extend_from_slice(&count.to_be_bytes());
        payload.extend_from_slice(&duration.to_be_bytes());
    }
    make_full_box(b"stts", 0, 0, &payload)
}

pub fn make_stsc(runs: &[(u32, u32, u32)]) -> Vec<u8> {
    let mut payload = (runs.len() as u32).to_be_bytes().to_vec();
    for &(first_chunk, samples_per_chunk, sample_desc_idx) in runs {
        payload.extend_from_slice(&first_chunk.to_be_bytes());
        payload.extend_from_slice(&samples_per_chunk.to_be_bytes());
        payload.extend_from_slice(&sample_desc_idx.to_be_bytes());
    }
    make_full_box(b"stsc", 0, 0, &payload)
}

pub fn make_stss(sample_indices: &[u32]) -> Vec<u8> {
    let mut payload = (sample_indices.len() as u32).to_be_bytes().to_vec();
    for &index in sample_indices {
        payload.extend_from_slice(&index.to_be_bytes());
    }
    make_full_box(b"stss", 0, 0, &payload)
}

/// A complete video trak: tkhd + mdia(mdhd, hdlr vide, minf(vmhd, stbl)).
pub fn make_video_trak(track_id: u32, time_scale: u32, duration: u32, stbl: Vec<u8>) -> Vec<u8> {
    let vmhd = make_full_box(b"vmhd", 0, 1, &[0u8; 8]);
    let minf = make_box(b"minf", &[vmhd, stbl].concat());
    let mdia = make_box(
        b"mdia",
        &[
            make_mdhd(time_scale, duration),
            make_hdlr(b"vide", "VideoHandler"),
            minf,
        ]
        .concat(),
    );
    make_box(b"trak", &[make_tkhd(track_id), mdia].concat())
}

/// A complete audio trak: tkhd + mdia(mdhd, hdlr soun, minf(smhd, stbl)).
pub fn make_audio_trak(track_id: u32, time_scale: u32, duration: u32, stbl: Vec<u8>) -> Vec<u8> {
    let smhd = make_full_box(b"smhd", 0, 0, &[0u8; 4]);
    let minf = make_box(b"minf", &[smhd, stbl].concat());
    let mdia = make_box(
        b"mdia",
        &[
            make_mdhd(time_scale, duration),
            make_hdlr(b"soun", "SoundHandler"),
            minf,
        ]
        .concat(),
    );
    make_box(b"trak", &[make_tkhd(track_id), mdia].concat())
}
