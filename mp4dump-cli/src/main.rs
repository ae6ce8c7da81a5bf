//! Command mp4dump reads an MP4 file and prints its box structure.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::process;

use clap::{Parser, ValueEnum};
use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::error;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use mp4::{
    Reader, Scanner, StszIter, TrunIter, U32Iter, fourcc, read_audio_sample_entry, read_ftyp,
    read_visual_sample_entry,
    tables::{Co64Iter, CttsIter, ElstIter, StscIter, SttsIter, TRUN_DATA_OFFSET_PRESENT},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "mp4dump", about = "Dump the box structure of an MP4 file")]
struct Args {
    /// Input file.
    file: PathBuf,

    /// Output format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
}

/// A box in the rendered tree.
#[derive(Debug, Default, Serialize)]
struct BoxNode {
    #[serde(rename = "type")]
    kind: String,
    size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    flags: Option<u32>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    info: Map<String, Value>,
    #[serde(rename = "dataLength", skip_serializing_if = "Option::is_none")]
    data_length: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    children: Vec<BoxNode>,
}

fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) if e.use_stderr() => {
            let _ = e.print();
            process::exit(1);
        }
        Err(e) => {
            // --help / --version
            let _ = e.print();
            process::exit(0);
        }
    };

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer().with_target(false))
        .init();

    if let Err(e) = run(&args) {
        error!("dump failed: {e}");
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run(args: &Args) -> mp4::Result<()> {
    let file = File::open(&args.file)?;
    let mut sc = Scanner::new(BufReader::new(file));

    let mut root = Vec::new();
    while let Some(entry) = sc.next_entry()? {
        let mut node = BoxNode {
            kind: entry.kind.to_string(),
            size: entry.size,
            ..BoxNode::default()
        };

        // Only metadata boxes are loaded into memory for deep parsing.
        if entry.kind == fourcc::MOOV || entry.kind == fourcc::MOOF {
            let mut buf = vec![0u8; entry.data_size() as usize];
            sc.read_body(&mut buf)?;
            let mut r = Reader::new(buf.into());
            node.children = build_tree(&mut r);
        } else if entry.kind == fourcc::FTYP {
            let mut buf = vec![0u8; entry.data_size() as usize];
            sc.read_body(&mut buf)?;
            let ftyp = read_ftyp(&buf);
            node.info.insert("brand".into(), json!(ftyp.major_brand.to_string()));
            node.info.insert("version".into(), json!(ftyp.minor_version));
            if !ftyp.compatible.is_empty() {
                let compat: Vec<String> =
                    ftyp.compatible.iter().map(|b| b.to_string()).collect();
                node.info.insert("compatible".into(), json!(compat));
            }
        } else if entry.kind == fourcc::MDAT {
            node.data_length = Some(entry.data_size());
        }

        root.push(node);
    }

    print_tree(&root, args.format);
    Ok(())
}

fn build_tree(r: &mut Reader) -> Vec<BoxNode> {
    let mut nodes = Vec::new();

    while r.next() {
        let mut node = BoxNode {
            kind: r.box_type().to_string(),
            size: r.size(),
            ..BoxNode::default()
        };

        if fourcc::is_full_box(r.box_type()) {
            node.version = Some(r.version());
            node.flags = Some(r.flags());
        }

        node.info = collect_box_info(r);

        if fourcc::is_container_box(r.box_type()) {
            r.enter();
            node.children = build_tree(r);
            r.exit();
        } else if r.box_type() == fourcc::STSD {
            // stsd: entry count, then sample entry boxes.
            r.enter();
            r.skip(4);
            while r.next() {
                node.children.push(build_sample_entry_node(r));
            }
            r.exit();
        }

        nodes.push(node);
    }

    nodes
}

fn build_sample_entry_node(r: &mut Reader) -> BoxNode {
    let mut node = BoxNode {
        kind: r.box_type().to_string(),
        size: r.size(),
        ..BoxNode::default()
    };

    match r.box_type() {
        fourcc::AVC1 => {
            let entry = r.payload();
            let visual = read_visual_sample_entry(&entry);
            node.info.insert("width".into(), json!(visual.width));
            node.info.insert("height".into(), json!(visual.height));
            node.info
                .insert("compressor".into(), json!(visual.compressor_name));

            r.enter();
            r.skip(visual.child_offset);
            while r.next() {
                let mut child = BoxNode {
                    kind: r.box_type().to_string(),
                    size: r.size(),
                    ..BoxNode::default()
                };
                if fourcc::is_full_box(r.box_type()) {
                    child.version = Some(r.version());
                    child.flags = Some(r.flags());
                }
                if r.box_type() == fourcc::AVCC
                    && let Some(codec) = mp4::codec::avc1_codec_string(&r.payload())
                {
                    child.info.insert("codec".into(), json!(codec));
                }
                node.children.push(child);
            }
            r.exit();
        }
        fourcc::MP4A => {
            let entry = r.payload();
            let audio = read_audio_sample_entry(&entry);
            node.info
                .insert("channelCount".into(), json!(audio.channel_count));
            node.info.insert("sampleSize".into(), json!(audio.sample_size));
            node.info
                .insert("sampleRate".into(), json!(audio.sample_rate >> 16));

            r.enter();
            r.skip(audio.child_offset);
            while r.next() {
                let mut child = BoxNode {
                    kind: r.box_type().to_string(),
                    size: r.size(),
                    ..BoxNode::default()
                };
                if fourcc::is_full_box(r.box_type()) {
                    child.version = Some(r.version());
                    child.flags = Some(r.flags());
                }
                if r.box_type() == fourcc::ESDS {
                    let codec = mp4::codec::mp4a_codec_string(&r.payload());
                    child.info.insert("codec".into(), json!(codec));
                }
                node.children.push(child);
            }
            r.exit();
        }
        _ => {
            if fourcc::is_full_box(r.box_type()) {
                node.version = Some(r.version());
                node.flags = Some(r.flags());
            }
            node.data_length = Some(r.payload().len() as u64);
        }
    }

    node
}

fn collect_box_info(r: &Reader) -> Map<String, Value> {
    let mut info = Map::new();

    match r.box_type() {
        fourcc::MVHD => {
            let m = r.read_mvhd();
            info.insert("timescale".into(), json!(m.time_scale));
            info.insert("duration".into(), json!(m.duration));
            info.insert("nextTrackId".into(), json!(m.next_track_id));
        }
        fourcc::TKHD => {
            let t = r.read_tkhd();
            info.insert("trackId".into(), json!(t.track_id));
            info.insert("duration".into(), json!(t.duration));
            info.insert("width".into(), json!(t.width >> 16));
            info.insert("height".into(), json!(t.height >> 16));
        }
        fourcc::MDHD => {
            let m = r.read_mdhd();
            info.insert("timescale".into(), json!(m.time_scale));
            info.insert("duration".into(), json!(m.duration));
            info.insert("language".into(), json!(m.language));
        }
        fourcc::HDLR => {
            let handler: String = r.read_hdlr().iter().map(|&b| b as char).collect();
            info.insert("handlerType".into(), json!(handler));
            info.insert("name".into(), json!(r.read_hdlr_name()));
        }
        fourcc::STSD | fourcc::DREF => {
            if r.payload().len() >= 4 {
                info.insert("entries".into(), json!(r.entry_count()));
            }
        }
        fourcc::STSZ => {
            info.insert("entries".into(), json!(StszIter::new(&r.payload()).count()));
        }
        fourcc::STCO | fourcc::STSS => {
            info.insert("entries".into(), json!(U32Iter::new(&r.payload()).count()));
        }
        fourcc::CO64 => {
            info.insert("entries".into(), json!(Co64Iter::new(&r.payload()).count()));
        }
        fourcc::STTS => {
            info.insert("entries".into(), json!(SttsIter::new(&r.payload()).count()));
        }
        fourcc::CTTS => {
            let payload = r.payload();
            let it = CttsIter::new(&payload, r.version());
            info.insert("entries".into(), json!(it.count()));
        }
        fourcc::STSC => {
            info.insert("entries".into(), json!(StscIter::new(&r.payload()).count()));
        }
        fourcc::ELST => {
            let payload = r.payload();
            let it = ElstIter::new(&payload, r.version());
            info.insert("entries".into(), json!(it.count()));
        }
        fourcc::MEHD => {
            info.insert("fragmentDuration".into(), json!(r.read_mehd()));
        }
        fourcc::TREX => {
            info.insert("trackId".into(), json!(r.read_trex().track_id));
        }
        fourcc::MFHD => {
            info.insert("sequence".into(), json!(r.read_mfhd()));
        }
        fourcc::TFHD => {
            info.insert("trackId".into(), json!(r.read_tfhd()));
        }
        fourcc::TFDT => {
            info.insert("baseMediaDecodeTime".into(), json!(r.read_tfdt()));
        }
        fourcc::TRUN => {
            let payload = r.payload();
            let it = TrunIter::new(&payload, r.flags());
            info.insert("entries".into(), json!(TrunIter::count(&it)));
            if r.flags() & TRUN_DATA_OFFSET_PRESENT != 0 {
                info.insert("dataOffset".into(), json!(it.data_offset()));
            }
        }
        // vmhd/smhd carry nothing worth annotating.
        fourcc::VMHD | fourcc::SMHD => {}
        kind if !fourcc::is_container_box(kind) => {
            if !r.payload().is_empty() {
                info.insert("dataLength".into(), json!(r.payload().len()));
            }
        }
        _ => {}
    }

    info
}

fn print_tree(nodes: &[BoxNode], format: OutputFormat) {
    match format {
        OutputFormat::Json => match serde_json::to_string_pretty(nodes) {
            Ok(out) => println!("{out}"),
            Err(e) => {
                eprintln!("Error encoding JSON: {e}");
                process::exit(1);
            }
        },
        OutputFormat::Text => {
            for node in nodes {
                print_node_text(node, 0);
            }
        }
    }
}

fn print_node_text(node: &BoxNode, depth: usize) {
    let indent = "  ".repeat(depth);
    print!("{indent}[{}] size={}", node.kind, node.size);

    if let Some(version) = node.version {
        print!(" v={version}");
    }
    if let Some(flags) = node.flags {
        print!(" flags=0x{flags:06x}");
    }

    for (key, value) in &node.info {
        match value {
            Value::String(s) if matches!(key.as_str(), "name" | "compressor") => {
                print!(" {key}={s:?}");
            }
            Value::String(s) => print!(" {key}={s}"),
            Value::Array(items) => {
                let joined: Vec<String> = items
                    .iter()
                    .map(|v| v.as_str().unwrap_or_default().to_owned())
                    .collect();
                print!(" {key}=[{}]", joined.join(","));
            }
            other => print!(" {key}={other}"),
        }
    }

    if let Some(len) = node.data_length {
        print!(" dataLen={len}");
    }

    println!();

    for child in &node.children {
        print_node_text(child, depth + 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_box(fourcc: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let size = (8 + body.len()) as u32;
        let mut out = Vec::with_capacity(size as usize);
        out.extend_from_slice(&size.to_be_bytes());
        out.extend_from_slice(fourcc);
        out.extend_from_slice(body);
        out
    }

    fn make_full_box(fourcc: &[u8; 4], version: u8, flags: u32, payload: &[u8]) -> Vec<u8> {
        let mut body = Vec::with_capacity(4 + payload.len());
        body.push(version);
        body.push((flags >> 16) as u8);
        body.push((flags >> 8) as u8);
        body.push(flags as u8);
        body.extend_from_slice(payload);
        make_box(fourcc, &body)
    }

    fn make_avc1_entry(width: u16, height: u16, avcc_payload: &[u8]) -> Vec<u8> {
        let mut body = vec![0u8; 78];
        body[24..26].copy_from_slice(&width.to_be_bytes());
        body[26..28].copy_from_slice(&height.to_be_bytes());
        body.extend_from_slice(&make_box(b"avcC", avcc_payload));
        make_box(b"avc1", &body)
    }

    fn make_mp4a_entry(channel_count: u16, sample_rate_hz: u32, esds_payload: &[u8]) -> Vec<u8> {
        let mut body = vec![0u8; 28];
        body[16..18].copy_from_slice(&channel_count.to_be_bytes());
        body[18..20].copy_from_slice(&16u16.to_be_bytes());
        body[24..28].copy_from_slice(&(sample_rate_hz << 16).to_be_bytes());
        body.extend_from_slice(&make_full_box(b"esds", 0, 0, esds_payload));
        make_box(b"mp4a", &body)
    }

    fn make_esds(oti: u8, asc: &[u8]) -> Vec<u8> {
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

    fn make_stsd(entry: &[u8]) -> Vec<u8> {
        let mut payload = 1u32.to_be_bytes().to_vec();
        payload.extend_from_slice(entry);
        make_full_box(b"stsd", 0, 0, &payload)
    }

    fn reader_for(data: Vec<u8>) -> Reader {
        Reader::new(data.into())
    }

    #[test]
    fn test_collect_box_info_mvhd() {
        let mut payload = vec![0u8; 96];
        payload[8..12].copy_from_slice(&1000u32.to_be_bytes());
        payload[12..16].copy_from_slice(&30000u32.to_be_bytes());
        payload[92..96].copy_from_slice(&3u32.to_be_bytes());
        let mut r = reader_for(make_full_box(b"mvhd", 0, 0, &payload));
        assert!(r.next());

        let info = collect_box_info(&r);
        assert_eq!(info["timescale"], json!(1000));
        assert_eq!(info["duration"], json!(30000));
        assert_eq!(info["nextTrackId"], json!(3));
    }

    #[test]
    fn test_collect_box_info_hdlr() {
        let mut payload = vec![0u8; 20];
        payload[4..8].copy_from_slice(b"vide");
        payload.extend_from_slice(b"VideoHandler\0");
        let mut r = reader_for(make_full_box(b"hdlr", 0, 0, &payload));
        assert!(r.next());

        let info = collect_box_info(&r);
        assert_eq!(info["handlerType"], json!("vide"));
        assert_eq!(info["name"], json!("VideoHandler"));
    }

    #[test]
    fn test_collect_box_info_table_entry_counts() {
        // Constant-size stsz declaring 4 samples.
        let mut stsz_payload = 417u32.to_be_bytes().to_vec();
        stsz_payload.extend_from_slice(&4u32.to_be_bytes());
        let mut r = reader_for(make_full_box(b"stsz", 0, 0, &stsz_payload));
        assert!(r.next());
        assert_eq!(collect_box_info(&r)["entries"], json!(4));

        let mut stco_payload = 2u32.to_be_bytes().to_vec();
        stco_payload.extend_from_slice(&0x1000u32.to_be_bytes());
        stco_payload.extend_from_slice(&0x2000u32.to_be_bytes());
        let mut r = reader_for(make_full_box(b"stco", 0, 0, &stco_payload));
        assert!(r.next());
        assert_eq!(collect_box_info(&r)["entries"], json!(2));
    }

    #[test]
    fn test_collect_box_info_trun_data_offset() {
        // Flags: data_offset + per-sample sizes.
        let flags = 0x000201;
        let mut payload = 2u32.to_be_bytes().to_vec();
        payload.extend_from_slice(&0x30i32.to_be_bytes());
        payload.extend_from_slice(&100u32.to_be_bytes());
        payload.extend_from_slice(&200u32.to_be_bytes());
        let mut r = reader_for(make_full_box(b"trun", 0, flags, &payload));
        assert!(r.next());

        let info = collect_box_info(&r);
        assert_eq!(info["entries"], json!(2));
        assert_eq!(info["dataOffset"], json!(0x30));
    }

    #[test]
    fn test_collect_box_info_stsd_short_payload_has_no_entries() {
        let mut r = reader_for(make_full_box(b"stsd", 0, 0, &[0, 0]));
        assert!(r.next());
        assert!(!collect_box_info(&r).contains_key("entries"));
    }

    #[test]
    fn test_collect_box_info_vmhd_is_empty() {
        let mut r = reader_for(make_full_box(b"vmhd", 0, 1, &[0u8; 8]));
        assert!(r.next());
        assert!(collect_box_info(&r).is_empty());
    }

    #[test]
    fn test_build_tree_descends_into_avc1_sample_entry() {
        let stsd = make_stsd(&make_avc1_entry(640, 480, &[0x01, 0x64, 0x00, 0x1E]));
        let stbl = make_box(b"stbl", &stsd);

        let mut r = reader_for(stbl);
        let nodes = build_tree(&mut r);
        assert_eq!(nodes.len(), 1);

        let stbl_node = &nodes[0];
        assert_eq!(stbl_node.kind, "stbl");
        assert_eq!(stbl_node.children.len(), 1);

        let stsd_node = &stbl_node.children[0];
        assert_eq!(stsd_node.kind, "stsd");
        assert_eq!(stsd_node.version, Some(0));
        assert_eq!(stsd_node.info["entries"], json!(1));
        assert_eq!(stsd_node.children.len(), 1);

        let avc1_node = &stsd_node.children[0];
        assert_eq!(avc1_node.kind, "avc1");
        assert_eq!(avc1_node.info["width"], json!(640));
        assert_eq!(avc1_node.info["height"], json!(480));
        assert_eq!(avc1_node.children.len(), 1);

        let avcc_node = &avc1_node.children[0];
        assert_eq!(avcc_node.kind, "avcC");
        assert_eq!(avcc_node.info["codec"], json!("avc1.64001e"));
    }

    #[test]
    fn test_build_tree_descends_into_mp4a_sample_entry() {
        let stsd = make_stsd(&make_mp4a_entry(2, 48000, &make_esds(0x40, &[0x12, 0x10])));
        let stbl = make_box(b"stbl", &stsd);

        let mut r = reader_for(stbl);
        let nodes = build_tree(&mut r);
        let mp4a_node = &nodes[0].children[0].children[0];
        assert_eq!(mp4a_node.kind, "mp4a");
        assert_eq!(mp4a_node.info["channelCount"], json!(2));
        assert_eq!(mp4a_node.info["sampleRate"], json!(48000));

        let esds_node = &mp4a_node.children[0];
        assert_eq!(esds_node.kind, "esds");
        assert_eq!(esds_node.version, Some(0));
        assert_eq!(esds_node.info["codec"], json!("mp4a.40.2"));
    }

    #[test]
    fn test_build_tree_unknown_sample_entry_is_opaque() {
        let entry = make_box(b"enca", &[0u8; 20]);
        let stsd = make_stsd(&entry);

        let mut r = reader_for(stsd);
        let nodes = build_tree(&mut r);
        let entry_node = &nodes[0].children[0];
        assert_eq!(entry_node.kind, "enca");
        assert_eq!(entry_node.data_length, Some(20));
        assert!(entry_node.children.is_empty());
    }

    #[test]
    fn test_build_tree_walks_siblings_in_containers() {
        let mvhd = make_full_box(b"mvhd", 0, 0, &[0u8; 96]);
        let tkhd = make_full_box(b"tkhd", 0, 3, &[0u8; 80]);
        let trak = make_box(b"trak", &tkhd);
        let moov = make_box(b"moov", &[mvhd, trak].concat());

        let mut r = reader_for(moov);
        let nodes = build_tree(&mut r);
        assert_eq!(nodes.len(), 1);
        let kinds: Vec<&str> = nodes[0].children.iter().map(|n| n.kind.as_str()).collect();
        assert_eq!(kinds, vec!["mvhd", "trak"]);
        assert_eq!(nodes[0].children[1].children[0].kind, "tkhd");
        assert_eq!(nodes[0].children[1].children[0].flags, Some(3));
    }
}
