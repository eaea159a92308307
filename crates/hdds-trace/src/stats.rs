// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Capture statistics: discovery times, IP fragment reconstruction and
//! endpoint counts.
//!
//! Every figure honours an optional domain filter (`None` = all domains),
//! except fragmentation, which is not attributable to a domain.

use crate::conversations::ConversationMap;
use crate::endpoints::{EndpointInfo, EndpointMap};
use crate::frame::{Frame, FrameStore};
use crate::guid::Guid;
use serde::Serialize;
use std::collections::BTreeSet;

/// min / lower median / mean / max over a series of samples.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Summary {
    pub count: usize,
    pub min: f64,
    pub median: f64,
    pub mean: f64,
    pub max: f64,
    /// What produced the maximum sample.
    pub max_label: Option<String>,
}

impl Summary {
    /// Summarize `(value, label)` samples. Among equal maxima the last one
    /// supplied wins the label. An empty series yields all zeros.
    pub fn from_samples(mut samples: Vec<(f64, String)>) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        samples.sort_by(|a, b| a.0.total_cmp(&b.0));

        let count = samples.len();
        let total: f64 = samples.iter().map(|(value, _)| value).sum();
        let (max, max_label) = samples[count - 1].clone();
        Self {
            count,
            min: samples[0].0,
            median: samples[(count - 1) / 2].0,
            mean: total / count as f64,
            max,
            max_label: Some(max_label),
        }
    }
}

/// Time between both endpoints being known and their first exchange.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveryTime {
    pub writer: Guid,
    pub reader: Guid,
    pub seconds: f64,
    /// Writer is an application endpoint rather than a built-in one.
    pub user_data: bool,
    pub first_evidence_time: f64,
}

fn in_domain(filter: Option<u16>, domain_id: Option<u16>) -> bool {
    filter.map_or(true, |wanted| domain_id == Some(wanted))
}

/// Discovery time of every conversation in the filtered domain, in
/// (writer, reader) order.
///
/// `conversation first evidence - max(writer first evidence, reader first evidence)`
pub fn discovery_times(
    endpoints: &EndpointMap,
    conversations: &ConversationMap,
    domain: Option<u16>,
) -> Vec<DiscoveryTime> {
    conversations
        .iter()
        .filter(|conv| in_domain(domain, Some(conv.domain_id)))
        .filter_map(|conv| {
            let writer = endpoints.get(&conv.writer)?;
            let reader = endpoints.get(&conv.reader)?;
            let known_since = writer.first_evidence_time.max(reader.first_evidence_time);
            Some(DiscoveryTime {
                writer: conv.writer,
                reader: conv.reader,
                seconds: conv.first_evidence_time - known_since,
                user_data: !conv.writer.is_builtin(),
                first_evidence_time: conv.first_evidence_time,
            })
        })
        .collect()
}

/// IP fragment reconstruction times, across all domains.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FragmentStats {
    /// First fragments whose datagram was never completed (or whose
    /// completing frame did not decode).
    pub unrecovered: usize,
    /// Seconds from first fragment to completing frame; labelled with the
    /// completing frame number.
    pub reconstruction: Summary,
}

impl FragmentStats {
    pub fn collect(store: &FrameStore) -> Self {
        let mut unrecovered = 0;
        let mut samples = Vec::new();

        for (_, entry) in store.fragments.iter() {
            match entry.completing_frame.and_then(|frame_no| store.get(frame_no)) {
                Some(frame) => samples.push((
                    frame.reference_time - entry.first_time,
                    frame.frame_no.to_string(),
                )),
                None => unrecovered += 1,
            }
        }

        Self {
            unrecovered,
            reconstruction: Summary::from_samples(samples),
        }
    }
}

/// Participants and user-data endpoints announced in the capture, from the
/// first DATA of each frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Announced {
    pub participants: BTreeSet<Guid>,
    pub userdata_endpoints: BTreeSet<Guid>,
    /// Reference time a participant was last seen for the first time.
    pub last_new_participant_time: f64,
    pub last_new_userdata_endpoint_time: f64,
}

impl Announced {
    pub fn collect(store: &FrameStore, domain: Option<u16>) -> Self {
        let mut announced = Self::default();

        for frame in store.iter() {
            if !in_domain(domain, Some(frame.domain_id)) {
                continue;
            }
            announced.observe(frame);
        }
        announced
    }

    fn observe(&mut self, frame: &Frame) {
        let Some(data) = frame.datas.first() else {
            return;
        };
        if let Some(participant) = &data.participant {
            if self.participants.insert(participant.guid) {
                self.last_new_participant_time = frame.reference_time;
            }
        }
        if let Some(endpoint) = &data.endpoint {
            if self.userdata_endpoints.insert(endpoint.guid) {
                self.last_new_userdata_endpoint_time = frame.reference_time;
            }
        }
    }
}

/// Everything the summary report prints.
#[derive(Debug, Clone, Serialize)]
pub struct TraceStats {
    pub domain: Option<u16>,
    pub announced: Announced,
    /// Endpoints in the filtered domain.
    pub total_endpoints: usize,
    pub total_conversations: usize,
    /// Reliable endpoints that never took part in a conversation.
    pub undiscovered: Vec<Guid>,
    pub fragmentation: FragmentStats,
    pub discovery: Summary,
    pub user_discovery: Summary,
    pub last_new_conversation_time: f64,
}

impl TraceStats {
    pub fn collect(
        store: &FrameStore,
        endpoints: &EndpointMap,
        conversations: &ConversationMap,
        domain: Option<u16>,
    ) -> Self {
        let times = discovery_times(endpoints, conversations, domain);
        let label = |t: &DiscoveryTime| (t.seconds, format!("{} >> {}", t.writer, t.reader));

        let last_new_conversation_time = times
            .iter()
            .map(|t| t.first_evidence_time)
            .fold(0.0, f64::max);

        let considered: Vec<&EndpointInfo> = endpoints
            .iter()
            .filter(|info| in_domain(domain, info.domain_id))
            .collect();

        Self {
            domain,
            announced: Announced::collect(store, domain),
            total_endpoints: considered.len(),
            total_conversations: times.len(),
            undiscovered: undiscovered(&considered, conversations, domain),
            fragmentation: FragmentStats::collect(store),
            discovery: Summary::from_samples(times.iter().map(label).collect()),
            user_discovery: Summary::from_samples(
                times.iter().filter(|t| t.user_data).map(label).collect(),
            ),
            last_new_conversation_time,
        }
    }

    /// Last new conversation minus last new participant.
    pub fn conversation_after_participant(&self) -> f64 {
        self.last_new_conversation_time - self.announced.last_new_participant_time
    }

    /// Last new conversation minus last new user-data endpoint.
    pub fn conversation_after_userdata_endpoint(&self) -> f64 {
        self.last_new_conversation_time - self.announced.last_new_userdata_endpoint_time
    }
}

/// Endpoints known to be reliable with no conversation in the filtered
/// domain. Endpoints of unknown reliability are not reported.
fn undiscovered(
    considered: &[&EndpointInfo],
    conversations: &ConversationMap,
    domain: Option<u16>,
) -> Vec<Guid> {
    let talking: BTreeSet<Guid> = conversations
        .iter()
        .filter(|conv| in_domain(domain, Some(conv.domain_id)))
        .flat_map(|conv| [conv.writer, conv.reader])
        .collect();

    considered
        .iter()
        .filter(|info| info.reliable.is_true() && !talking.contains(&info.guid))
        .map(|info| info.guid)
        .collect()
}
