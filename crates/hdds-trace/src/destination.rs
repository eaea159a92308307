// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! INFO_DST destination scoping (RTPS 2.3 Sec.8.3.7.7).
//!
//! An INFO_DST changes the implicit destination participant for every
//! following submessage of the same frame until another INFO_DST overrides it.

use crate::frame::Frame;
use crate::guid::GuidPrefix;

/// Prefix of the last INFO_DST positioned strictly before `sm_order`.
///
/// Returns `None` when no INFO_DST precedes the submessage, i.e. it was sent
/// without an explicit destination participant.
pub fn resolve_destination(frame: &Frame, sm_order: usize) -> Option<GuidPrefix> {
    // info_dsts are pushed in submessage order
    let idx = frame.info_dsts.partition_point(|dst| dst.sm_order < sm_order);
    idx.checked_sub(1).map(|i| frame.info_dsts[i].guid_prefix)
}
