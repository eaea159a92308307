// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Grouping of decoded capture text into per-frame line groups.

use crate::error::TraceError;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Raw lines per frame number, in capture order.
pub type RawFrames = BTreeMap<u64, Vec<String>>;

/// Frame number from a `Frame <n>: ...` group header.
fn frame_header(line: &str) -> Option<u64> {
    let rest = line.strip_prefix("Frame ")?;
    let (number, _) = rest.split_once(':')?;
    number.trim().parse().ok()
}

/// Split a tshark verbose dump into frame groups.
///
/// A line starting `Frame <n>:` opens group `n`; every following line up to
/// the next header belongs to it. Lines before the first header are ignored.
pub fn group_frame_lines<R: BufRead>(mut reader: R) -> Result<RawFrames, TraceError> {
    let mut frames = RawFrames::new();
    let mut current: Option<u64> = None;
    let mut buf = Vec::new();

    // payload dumps may carry non-UTF-8 bytes
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end();

        if let Some(frame_no) = frame_header(line) {
            current = Some(frame_no);
        }
        if let Some(frame_no) = current {
            frames.entry(frame_no).or_default().push(line.to_string());
        }
    }

    Ok(frames)
}

/// Read and group a decoded capture file.
pub fn read_frames(path: &Path) -> Result<RawFrames, TraceError> {
    let file = File::open(path).map_err(|source| TraceError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let frames = group_frame_lines(BufReader::new(file))?;
    tracing::debug!("Read {} frame groups from {}", frames.len(), path.display());
    Ok(frames)
}
