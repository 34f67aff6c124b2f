//! Raw frame dump: one flat byte blob plus a plain-text metadata file
//!
//! ```text
//! shape=(N, H, W)
//! dtype=uint8
//! timestamps_sec=
//! 0.000000
//! 0.004167
//! ```

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use color_eyre::{eyre::eyre, eyre::WrapErr, Result};
use tokio::task::JoinHandle;
use tracing::{info, instrument};

use crate::capture::Frame;
use crate::pipeline::ringbuf::{Snapshot, TimedFrame};

pub const RAW_FILE_NAME: &str = "piv_frames.raw";
pub const META_FILE_NAME: &str = "piv_frames_meta.txt";

#[derive(Debug, Clone)]
pub struct RawDumpPaths {
    pub raw: PathBuf,
    pub meta: PathBuf,
}

/// Write `snapshot` into `out_dir`, creating the directory if needed
#[instrument(skip(snapshot), fields(frames = snapshot.len()))]
pub fn write_raw_dump(snapshot: &Snapshot, out_dir: &Path) -> Result<RawDumpPaths> {
    let (height, width) = snapshot
        .shape()
        .ok_or_else(|| eyre!("Refusing to export an empty snapshot"))?;

    fs::create_dir_all(out_dir)
        .wrap_err_with(|| format!("Failed to create export dir {}", out_dir.display()))?;
    let paths = RawDumpPaths {
        raw: out_dir.join(RAW_FILE_NAME),
        meta: out_dir.join(META_FILE_NAME),
    };

    let mut raw = BufWriter::new(File::create(&paths.raw)?);
    for entry in snapshot.iter() {
        for row in entry.frame.rows() {
            raw.write_all(row)?;
        }
    }
    raw.flush()?;

    let mut meta = BufWriter::new(File::create(&paths.meta)?);
    writeln!(meta, "shape=({}, {}, {})", snapshot.len(), height, width)?;
    writeln!(meta, "dtype=uint8")?;
    writeln!(meta, "timestamps_sec=")?;
    let timestamps: Vec<String> = snapshot
        .iter()
        .map(|e| format!("{:.6}", e.timestamp))
        .collect();
    write!(meta, "{}", timestamps.join("\n"))?;
    meta.flush()?;

    info!(
        "Exported {} frames ({}x{}) to {}",
        snapshot.len(),
        width,
        height,
        out_dir.display()
    );
    Ok(paths)
}

/// Run [`write_raw_dump`] on the blocking pool so capture is never stalled
pub fn spawn_raw_dump(snapshot: Snapshot, out_dir: PathBuf) -> JoinHandle<Result<RawDumpPaths>> {
    tokio::task::spawn_blocking(move || write_raw_dump(&snapshot, &out_dir))
}

/// Load a dump written by [`write_raw_dump`]
pub fn read_raw_dump(dir: &Path) -> Result<Snapshot> {
    let meta_path = dir.join(META_FILE_NAME);
    let meta = fs::read_to_string(&meta_path)
        .wrap_err_with(|| format!("Failed to read {}", meta_path.display()))?;
    let (count, height, width, timestamps) = parse_meta(&meta)?;

    let raw_path = dir.join(RAW_FILE_NAME);
    let blob = fs::read(&raw_path)
        .wrap_err_with(|| format!("Failed to read {}", raw_path.display()))?;
    let frame_len = height
        .checked_mul(width)
        .ok_or_else(|| eyre!("Frame size {}x{} overflows", width, height))?;
    let expected = count
        .checked_mul(frame_len)
        .ok_or_else(|| eyre!("Dump size of {} frames of {}x{} overflows", count, width, height))?;
    if blob.len() != expected {
        return Err(eyre!(
            "Raw dump holds {} bytes, metadata declares {} frames of {}x{}",
            blob.len(),
            count,
            width,
            height
        ));
    }

    let blob = Bytes::from(blob);
    let entries = timestamps
        .into_iter()
        .enumerate()
        .map(|(i, timestamp)| {
            Ok(TimedFrame {
                frame: Frame::new(blob.slice(i * frame_len..(i + 1) * frame_len), width, height)?,
                timestamp,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Snapshot::from_entries(entries))
}

fn parse_meta(meta: &str) -> Result<(usize, usize, usize, Vec<f64>)> {
    let mut lines = meta.lines();

    let shape = lines
        .next()
        .and_then(|l| l.strip_prefix("shape=("))
        .and_then(|l| l.strip_suffix(')'))
        .ok_or_else(|| eyre!("Missing shape line"))?;
    let dims = shape
        .split(',')
        .map(|d| d.trim().parse::<usize>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .wrap_err("Malformed shape")?;
    let &[count, height, width] = dims.as_slice() else {
        return Err(eyre!("Expected a 3-dimensional shape, got {:?}", dims));
    };
    if count == 0 || height == 0 || width == 0 {
        return Err(eyre!("Empty dump shape ({}, {}, {})", count, height, width));
    }

    match lines.next() {
        Some("dtype=uint8") => {}
        other => return Err(eyre!("Unsupported dtype line: {:?}", other)),
    }
    if lines.next() != Some("timestamps_sec=") {
        return Err(eyre!("Missing timestamps header"));
    }

    let timestamps = lines
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.trim().parse::<f64>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .wrap_err("Malformed timestamp")?;
    if let Some(bad) = timestamps.iter().find(|t| !t.is_finite()) {
        return Err(eyre!("Non-finite timestamp {}", bad));
    }
    if timestamps.len() != count {
        return Err(eyre!(
            "Metadata declares {} frames but lists {} timestamps",
            count,
            timestamps.len()
        ));
    }

    Ok((count, height, width, timestamps))
}
