// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types shared across the analysis pipeline.

use crate::net::NetInfo;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level errors. Only input access is fatal; everything else in the
/// pipeline is reported as a diagnostic and processing continues.
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unable to open input file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Two pieces of evidence disagree on a field that should be invariant.
///
/// The existing value is always kept; callers log the conflict.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MergeConflict {
    #[error("contradictory network data for IP {ip}: existing {existing}, update {update}")]
    NetInfo {
        ip: String,
        existing: NetInfo,
        update: NetInfo,
    },

    #[error("contradictory domain id: existing {existing}, update {update}")]
    DomainId { existing: u16, update: u16 },

    #[error("contradictory reliability: existing {existing}, update {update}")]
    Reliability { existing: bool, update: bool },
}
