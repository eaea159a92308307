// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! IPv4 fragmentation tracking.
//!
//! Only the first fragment and the reassembling frame of a datagram are of
//! interest: the reassembly delay between them is reported as a statistic.

use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Identifies one fragmented datagram.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FragmentKey {
    pub identification: String,
    pub src_ip: String,
    pub dst_ip: String,
}

impl FragmentKey {
    pub fn new(identification: &str, src_ip: &str, dst_ip: &str) -> Self {
        Self {
            identification: identification.to_string(),
            src_ip: src_ip.to_string(),
            dst_ip: dst_ip.to_string(),
        }
    }
}

impl fmt::Display for FragmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.identification, self.src_ip, self.dst_ip)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FragmentEntry {
    pub first_frame: u64,
    /// Reference time of the first fragment.
    pub first_time: f64,
    /// Frame that carried the last fragment and completed reassembly.
    pub completing_frame: Option<u64>,
}

/// A second completing fragment mapped onto an already resolved key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("IP fragmentation collision for {key}: completed by frame {previous}, then by frame {frame_no}")]
pub struct FragmentationCollision {
    pub key: FragmentKey,
    pub previous: u64,
    pub frame_no: u64,
}

#[derive(Debug, Default)]
pub struct FragmentTable {
    entries: BTreeMap<FragmentKey, FragmentEntry>,
}

impl FragmentTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the first fragment of a datagram. Later fragments for a key
    /// already present are ignored.
    pub fn record_first(&mut self, key: FragmentKey, frame_no: u64, time: f64) {
        self.entries.entry(key).or_insert(FragmentEntry {
            first_frame: frame_no,
            first_time: time,
            completing_frame: None,
        });
    }

    /// Record the frame that completed reassembly.
    ///
    /// Unknown keys (first fragment not captured) are ignored. On collision
    /// the latest completing frame is kept and the collision returned.
    pub fn record_completion(
        &mut self,
        key: &FragmentKey,
        frame_no: u64,
    ) -> Result<(), FragmentationCollision> {
        let Some(entry) = self.entries.get_mut(key) else {
            return Ok(());
        };
        let previous = entry.completing_frame.replace(frame_no);
        match previous {
            Some(previous) => Err(FragmentationCollision {
                key: key.clone(),
                previous,
                frame_no,
            }),
            None => Ok(()),
        }
    }

    pub fn get(&self, key: &FragmentKey) -> Option<&FragmentEntry> {
        self.entries.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FragmentKey, &FragmentEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
