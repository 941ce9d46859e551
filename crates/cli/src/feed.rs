//! Replays an Annex B elementary stream file into the server at a fixed
//! frame rate, standing in for a live encoder.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use rtsp::media::extract_nal_units;
use rtsp::{AccessUnit, Codec, Server};

/// Split an Annex B stream into access units.
///
/// A new access unit begins at a delimiter/parameter-set/SEI NAL that
/// follows picture data, or at a slice that starts a new picture.
pub fn split_access_units(codec: Codec, data: &[u8]) -> Vec<Vec<Vec<u8>>> {
    let mut units = Vec::new();
    let mut current: Vec<Vec<u8>> = Vec::new();
    let mut has_picture = false;

    for nal in extract_nal_units(data) {
        if nal.is_empty() {
            continue;
        }
        let kind = classify(codec, &nal);
        let starts_unit = match kind {
            NalKind::Prefix | NalKind::FirstSlice => has_picture,
            NalKind::Slice | NalKind::Other => false,
        };
        if starts_unit {
            units.push(std::mem::take(&mut current));
            has_picture = false;
        }
        if matches!(kind, NalKind::FirstSlice | NalKind::Slice) {
            has_picture = true;
        }
        current.push(nal);
    }
    if !current.is_empty() {
        units.push(current);
    }
    units
}

enum NalKind {
    /// AUD, parameter sets, SEI: may only precede the first slice.
    Prefix,
    FirstSlice,
    Slice,
    Other,
}

fn classify(codec: Codec, nal: &[u8]) -> NalKind {
    match codec {
        Codec::H265 => {
            let nal_type = (nal[0] >> 1) & 0x3f;
            match nal_type {
                0..=31 => {
                    // first_slice_segment_in_pic_flag
                    if nal.get(2).is_some_and(|b| b & 0x80 != 0) {
                        NalKind::FirstSlice
                    } else {
                        NalKind::Slice
                    }
                }
                32..=35 | 39 => NalKind::Prefix,
                _ => NalKind::Other,
            }
        }
        _ => {
            let nal_type = nal[0] & 0x1f;
            match nal_type {
                1..=5 => {
                    // first_mb_in_slice == 0 is coded as a single '1' bit.
                    if nal.get(1).is_some_and(|b| b & 0x80 != 0) {
                        NalKind::FirstSlice
                    } else {
                        NalKind::Slice
                    }
                }
                6..=9 => NalKind::Prefix,
                _ => NalKind::Other,
            }
        }
    }
}

/// Load `path` and push its access units until `running` clears.
pub fn run(
    server: Arc<Server>,
    path: &Path,
    codec: Codec,
    fps: u32,
    repeat: bool,
    running: Arc<AtomicBool>,
) -> std::io::Result<thread::JoinHandle<()>> {
    let data = std::fs::read(path)?;
    let units = split_access_units(codec, &data);
    tracing::info!(path = %path.display(), access_units = units.len(), fps, "loaded stream file");

    let frame_duration = Duration::from_secs(1) / fps.max(1);
    thread::Builder::new().name("feed".into()).spawn(move || {
        let started = Instant::now();
        let mut index: u32 = 0;
        'outer: loop {
            for nal_units in &units {
                if !running.load(Ordering::SeqCst) {
                    break 'outer;
                }
                let pts = frame_duration * index;
                if let Some(wait) = pts.checked_sub(started.elapsed()) {
                    thread::sleep(wait);
                }
                let access_unit = AccessUnit::new(codec, nal_units.clone(), pts);
                match server.push_frame(access_unit) {
                    Ok(sessions) => tracing::trace!(index, sessions, "frame pushed"),
                    Err(e) => {
                        tracing::warn!(error = %e, "push failed, stopping feed");
                        break 'outer;
                    }
                }
                index += 1;
            }
            if !repeat || units.is_empty() {
                break;
            }
        }
        tracing::info!(frames = index, "feed finished");
    })
}
