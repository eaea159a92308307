// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Text reports over an [`Analysis`].

use crate::conversations::{parse_conversation_key, ConversationKeyError};
use crate::endpoints::EndpointMap;
use crate::evidence::{Traffic, TrafficEvidence};
use crate::frame::{
    AckNackSubmessage, DataSubmessage, Frame, FrameStore, GapSubmessage, HeartbeatSubmessage,
};
use crate::guid::{EntityId, Guid};
use crate::ingest::RawFrames;
use crate::stats::{DiscoveryTime, Summary, TraceStats};
use crate::Analysis;
use std::collections::BTreeSet;
use std::fmt;
use std::io::{self, Write};
use thiserror::Error;

/// Shown in place of a destination prefix no INFO_DST resolved.
const UNRESOLVED_PREFIX: &str = "????????????????????????";

/// Report selection.
#[derive(Debug, Clone, Default)]
pub struct ReportConfig {
    /// Only report this domain (None = all domains).
    pub domain: Option<u16>,
    pub show_participants: bool,
    pub show_endpoints: bool,
    pub show_conversations: bool,
    pub show_undiscovered: bool,
    pub show_discovery_times: bool,
    /// `"<writer guid>,<reader guid>"` keys to dump frame by frame.
    pub conversation_frames: Vec<String>,
}

impl ReportConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn domain(mut self, domain: Option<u16>) -> Self {
        self.domain = domain;
        self
    }

    pub fn show_participants(mut self, show: bool) -> Self {
        self.show_participants = show;
        self
    }

    pub fn show_endpoints(mut self, show: bool) -> Self {
        self.show_endpoints = show;
        self
    }

    pub fn show_conversations(mut self, show: bool) -> Self {
        self.show_conversations = show;
        self
    }

    pub fn show_undiscovered(mut self, show: bool) -> Self {
        self.show_undiscovered = show;
        self
    }

    pub fn show_discovery_times(mut self, show: bool) -> Self {
        self.show_discovery_times = show;
        self
    }

    pub fn conversation_frames(mut self, key: impl Into<String>) -> Self {
        self.conversation_frames.push(key.into());
        self
    }
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error(transparent)]
    Key(#[from] ConversationKeyError),

    #[error("unable to find {0} in endpoint map")]
    UnknownEndpoint(Guid),

    #[error("no conversation between {writer} and {reader}")]
    UnknownConversation { writer: Guid, reader: Guid },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// One piece of conversation evidence, ready to print.
#[derive(Debug, Clone, Copy)]
pub enum Evidence<'a> {
    Data(&'a Frame, &'a DataSubmessage),
    Gap(&'a Frame, &'a GapSubmessage),
    Heartbeat(&'a Frame, &'a HeartbeatSubmessage),
    AckNack(&'a Frame, &'a AckNackSubmessage),
}

impl<'a> Evidence<'a> {
    /// Resolve `traffic` against `store`, ordered by frame number.
    pub fn collect(store: &'a FrameStore, traffic: &'a TrafficEvidence) -> Vec<Self> {
        let mut out: Vec<Self> = Vec::with_capacity(traffic.len());
        out.extend(store.resolve_all(&traffic.datas).map(|(_, f, d)| Evidence::Data(f, d)));
        out.extend(store.resolve_all(&traffic.gaps).map(|(_, f, g)| Evidence::Gap(f, g)));
        out.extend(
            store
                .resolve_all(&traffic.heartbeats)
                .map(|(_, f, h)| Evidence::Heartbeat(f, h)),
        );
        out.extend(
            store
                .resolve_all(&traffic.acknacks)
                .map(|(_, f, a)| Evidence::AckNack(f, a)),
        );
        out.sort_by_key(|e| e.frame().frame_no);
        out
    }

    pub fn frame(&self) -> &'a Frame {
        match *self {
            Evidence::Data(frame, _)
            | Evidence::Gap(frame, _)
            | Evidence::Heartbeat(frame, _)
            | Evidence::AckNack(frame, _) => frame,
        }
    }
}

/// `letters[len-1-i]` when bit `i` is set, `-` otherwise.
pub fn flag_string(flags: u16, letters: &str) -> String {
    let n = letters.len().min(16);
    letters
        .chars()
        .enumerate()
        .map(|(pos, letter)| {
            let bit = letters.len() - pos - 1;
            if bit < n && flags & (1 << bit) == 0 {
                '-'
            } else {
                letter
            }
        })
        .collect()
}

fn data_label(data: &DataSubmessage) -> String {
    let mut label = String::from("Data");
    if data.flags & 0x08 != 0 {
        let state = match (data.unregistered, data.disposed) {
            (true, true) => "UD",
            (true, false) => "U",
            (false, true) => "D",
            (false, false) => "_",
        };
        label.push_str(&format!("[{}]", state));
    }
    if data.participant.is_some() {
        label.push_str("(p)");
    } else if data.endpoint.is_some() {
        if data.writer_id == EntityId::SEDP_PUBLICATIONS_WRITER {
            label.push_str("(w)");
        } else {
            label.push_str("(r)");
        }
    }
    label
}

fn sent_to<T: Traffic>(frame: &Frame, sm: &T) -> String {
    let prefix = frame
        .destination_at(sm.sm_order())
        .map_or_else(|| UNRESOLVED_PREFIX.to_string(), |p| p.to_string());
    format!("{}{} @ {}:{}", prefix, sm.addressed_id(), frame.dst_ip, frame.dst_port)
}

fn write_line_head<T: Traffic>(
    f: &mut fmt::Formatter<'_>,
    label: &str,
    frame: &Frame,
    sm: &T,
) -> fmt::Result {
    let pad = 10usize.saturating_sub(label.len());
    write!(
        f,
        " - {} in frame{:pad$} {:>6} at time {:>7.3} sent to {}",
        label,
        "",
        frame.frame_no,
        frame.reference_time,
        sent_to(frame, sm),
        pad = pad
    )
}

impl fmt::Display for Evidence<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Evidence::Data(frame, data) => {
                write_line_head(f, &data_label(data), frame, data)?;
                write!(
                    f,
                    " :: flags = {}, length = {}, seq_num = {}",
                    flag_string(data.flags, "KDQE"),
                    frame.udp_length,
                    data.writer_seq_num
                )?;
                if let Some(participant) = &data.participant {
                    write!(f, ", participant_guid = {}", participant.guid)?;
                }
                if let Some(endpoint) = &data.endpoint {
                    write!(f, ", endpoint_guid = {}", endpoint.guid)?;
                }
                Ok(())
            }
            Evidence::Gap(frame, gap) => {
                write_line_head(f, "Gap", frame, gap)?;
                write!(
                    f,
                    " :: flags = ---{}, start = {}, base = {}, bitmap = {}",
                    flag_string(gap.flags, "E"),
                    gap.gap_start,
                    gap.bitmap_base,
                    gap.bitmap
                )
            }
            Evidence::Heartbeat(frame, heartbeat) => {
                write_line_head(f, "Heartbeat", frame, heartbeat)?;
                write!(
                    f,
                    " :: flags = -{}, first = {}, last = {}",
                    flag_string(heartbeat.flags, "LFE"),
                    heartbeat.first_seq_num,
                    heartbeat.last_seq_num
                )
            }
            Evidence::AckNack(frame, acknack) => {
                write_line_head(f, "Acknack", frame, acknack)?;
                write!(
                    f,
                    " :: flags = --{}, base = {}, bitmap = {}",
                    flag_string(acknack.flags, "FE"),
                    acknack.bitmap_base,
                    acknack.bitmap
                )
            }
        }
    }
}

pub fn write_endpoints<W: Write>(
    out: &mut W,
    endpoints: &EndpointMap,
    domain: Option<u16>,
) -> io::Result<()> {
    writeln!(out, "Endpoint Info:")?;
    for info in endpoints
        .iter()
        .filter(|info| domain.is_none() || info.domain_id == domain)
    {
        writeln!(out, "{}", info)?;
    }
    Ok(())
}

pub fn write_participants<W: Write>(out: &mut W, stats: &TraceStats) -> io::Result<()> {
    writeln!(out, "Participant guids:")?;
    for guid in &stats.announced.participants {
        writeln!(out, "{}", guid)?;
    }
    Ok(())
}

pub fn write_conversations<W: Write>(out: &mut W, times: &[DiscoveryTime]) -> io::Result<()> {
    writeln!(out, "Conversations Info:")?;
    for t in times {
        writeln!(
            out,
            "Conversation found: {} >> {} @ {:.3}",
            t.writer, t.reader, t.first_evidence_time
        )?;
    }
    Ok(())
}

pub fn write_undiscovered<W: Write>(out: &mut W, stats: &TraceStats) -> io::Result<()> {
    writeln!(
        out,
        "Implicit and/or explicit reliable endpoints without evidence of a conversation:"
    )?;
    for guid in &stats.undiscovered {
        writeln!(out, "{}", guid)?;
    }
    Ok(())
}

pub fn write_discovery_times<W: Write>(out: &mut W, times: &[DiscoveryTime]) -> io::Result<()> {
    writeln!(out, "discovery times:")?;
    for t in times {
        writeln!(out, "{} <-> {} took {:.6} seconds", t.writer, t.reader, t.seconds)?;
    }
    Ok(())
}

fn write_summary_block<W: Write>(
    out: &mut W,
    summary: &Summary,
    max_label: impl Fn(&str) -> String,
) -> io::Result<()> {
    writeln!(out, "   - Min:    {:8.6}", summary.min)?;
    writeln!(out, "   - Median: {:8.6}", summary.median)?;
    writeln!(out, "   - Mean:   {:8.6}", summary.mean)?;
    write!(out, "   - Max:    {:8.6}", summary.max)?;
    if let Some(label) = &summary.max_label {
        write!(out, " ({})", max_label(label))?;
    }
    writeln!(out)
}

pub fn write_summary<W: Write>(out: &mut W, stats: &TraceStats) -> io::Result<()> {
    writeln!(
        out,
        "Unique Participant Count: {}",
        stats.announced.participants.len()
    )?;
    writeln!(
        out,
        "Userdata Endpoint Count: {}",
        stats.announced.userdata_endpoints.len()
    )?;
    writeln!(out, "Total Endpoint Count: {}", stats.total_endpoints)?;

    writeln!(out, "IP Fragmentation Stats (all domains):")?;
    writeln!(
        out,
        " - Unrecovered fragments: {}",
        stats.fragmentation.unrecovered
    )?;
    writeln!(out, " - Individual Reconstruction Times:")?;
    write_summary_block(out, &stats.fragmentation.reconstruction, |frame| {
        format!("recovered frame {}", frame)
    })?;

    writeln!(out, "Discovery Stats:")?;
    writeln!(out, " - Total Conversations: {}", stats.total_conversations)?;
    writeln!(
        out,
        " - Reliable endpoints without evidence of conversation: {}",
        stats.undiscovered.len()
    )?;
    writeln!(out, " - Individual Discovery Times:")?;
    write_summary_block(out, &stats.discovery, str::to_string)?;
    writeln!(out, " - Individual Discovery Times (User Data Endpoints):")?;
    write_summary_block(out, &stats.user_discovery, str::to_string)?;
    writeln!(out, " - Global Discovery Stats:")?;
    writeln!(
        out,
        "   - Last New Conversation - Last New Participant = {:.6}",
        stats.conversation_after_participant()
    )?;
    writeln!(
        out,
        "   - Last New Conversation - Last New Userdata Endpoint = {:.6}",
        stats.conversation_after_userdata_endpoint()
    )
}

/// Evidence and raw decoded lines of one conversation.
pub fn write_conversation_frames<W: Write>(
    out: &mut W,
    analysis: &Analysis,
    raw: &RawFrames,
    key: &str,
) -> Result<(), ReportError> {
    let (writer, reader) = parse_conversation_key(key)?;
    let writer_info = analysis
        .endpoints
        .get(&writer)
        .ok_or(ReportError::UnknownEndpoint(writer))?;
    let reader_info = analysis
        .endpoints
        .get(&reader)
        .ok_or(ReportError::UnknownEndpoint(reader))?;
    let conversation = analysis
        .conversations
        .get(&writer, &reader)
        .ok_or(ReportError::UnknownConversation { writer, reader })?;

    writeln!(out, "Frame summary for conversation {} >> {}:", writer, reader)?;
    writeln!(
        out,
        " - First evidence of writer at frame {} at time {:.3}",
        writer_info.first_evidence_frame, writer_info.first_evidence_time
    )?;
    writeln!(
        out,
        " - First evidence of reader at frame {} at time {:.3}",
        reader_info.first_evidence_frame, reader_info.first_evidence_time
    )?;
    writeln!(
        out,
        " - First evidence of conversation in frame {} at time {:.3}",
        conversation.first_evidence_frame, conversation.first_evidence_time
    )?;

    let evidence = Evidence::collect(&analysis.store, &conversation.traffic);
    let mut frames = BTreeSet::from([conversation.first_evidence_frame]);
    for item in &evidence {
        frames.insert(item.frame().frame_no);
        writeln!(out, "{}", item)?;
    }
    for frame_no in frames {
        for line in raw.get(&frame_no).into_iter().flatten() {
            writeln!(out, "{}", line)?;
        }
    }
    Ok(())
}

/// Everything `config` selects, then the summary statistics.
pub fn write_report<W: Write>(
    out: &mut W,
    analysis: &Analysis,
    raw: &RawFrames,
    config: &ReportConfig,
) -> io::Result<TraceStats> {
    let stats = analysis.stats(config.domain);
    let times = analysis.discovery_times(config.domain);

    if config.show_endpoints {
        write_endpoints(out, &analysis.endpoints, config.domain)?;
    }
    if config.show_participants {
        write_participants(out, &stats)?;
    }
    if config.show_conversations {
        write_conversations(out, &times)?;
    }
    for key in &config.conversation_frames {
        match write_conversation_frames(out, analysis, raw, key) {
            Ok(()) => {}
            Err(ReportError::Io(err)) => return Err(err),
            Err(err) => tracing::warn!("Cannot show conversation {}: {}", key, err),
        }
    }
    write_summary(out, &stats)?;
    if config.show_undiscovered {
        write_undiscovered(out, &stats)?;
    }
    if config.show_discovery_times {
        write_discovery_times(out, &times)?;
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::test_support::*;
    use crate::frame::EndpointAnnouncement;

    fn render(evidence: Evidence<'_>) -> String {
        evidence.to_string()
    }

    #[test]
    fn test_flag_string() {
        assert_eq!(flag_string(0x05, "KDQE"), "-D-E");
        assert_eq!(flag_string(0x0f, "KDQE"), "KDQE");
        assert_eq!(flag_string(0x00, "E"), "-");
        assert_eq!(flag_string(0x03, "LFE"), "-FE");
    }

    #[test]
    fn test_data_line() {
        let mut f = frame(21, prefix('a'));
        f.info_dsts.push(info_dst(0, prefix('b')));
        let d = data(1, "00000102", "00000107");

        assert_eq!(
            render(Evidence::Data(&f, &d)),
            " - Data in frame           21 at time   2.100 sent to \
             bbbbbbbbbbbbbbbbbbbbbbbb00000107 @ 239.255.0.1:7400 \
             :: flags = -D-E, length = 100, seq_num = 1"
        );
    }

    #[test]
    fn test_data_label_variants() {
        let mut d = data(0, "000003c2", "000003c7");
        d.flags = 0x09;
        d.unregistered = true;
        d.disposed = true;
        d.endpoint = Some(EndpointAnnouncement::default());
        assert_eq!(data_label(&d), "Data[UD](w)");

        d.writer_id = EntityId::SEDP_SUBSCRIPTIONS_WRITER;
        d.flags = 0x05;
        assert_eq!(data_label(&d), "Data(r)");
    }

    #[test]
    fn test_unresolved_destination() {
        let f = frame(3, prefix('a'));
        let heartbeat = HeartbeatSubmessage {
            sm_order: 0,
            flags: 0x03,
            writer_id: eid("00000102"),
            reader_id: eid("00000000"),
            first_seq_num: 1,
            last_seq_num: 9,
        };
        let line = render(Evidence::Heartbeat(&f, &heartbeat));
        assert!(line.starts_with(" - Heartbeat in frame       3 at time   0.300"));
        assert!(line.contains("sent to ????????????????????????00000000 @"));
        assert!(line.ends_with(":: flags = --FE, first = 1, last = 9"));
    }

    #[test]
    fn test_acknack_addresses_writer() {
        let mut f = frame(30, prefix('b'));
        f.info_dsts.push(info_dst(0, prefix('a')));
        let acknack = AckNackSubmessage {
            sm_order: 1,
            flags: 0x02,
            writer_id: eid("00000102"),
            reader_id: eid("00000107"),
            bitmap_base: 5,
            bitmap: "0".into(),
        };
        let line = render(Evidence::AckNack(&f, &acknack));
        assert!(line.starts_with(" - Acknack in frame        30"));
        assert!(line.contains("aaaaaaaaaaaaaaaaaaaaaaaa00000102 @"));
        assert!(line.ends_with(":: flags = --F-, base = 5, bitmap = 0"));
    }

    #[test]
    fn test_summary_block() {
        let summary = Summary::from_samples(vec![(0.5, "w >> r".into())]);
        let mut out = Vec::new();
        write_summary_block(&mut out, &summary, str::to_string).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("   - Median: 0.500000\n"));
        assert!(text.ends_with("   - Max:    0.500000 (w >> r)\n"));
    }

    #[test]
    fn test_config_builder() {
        let config = ReportConfig::new()
            .domain(Some(2))
            .show_endpoints(true)
            .conversation_frames("a,b")
            .conversation_frames("c,d");
        assert_eq!(config.domain, Some(2));
        assert!(config.show_endpoints);
        assert!(!config.show_participants);
        assert_eq!(config.conversation_frames.len(), 2);
    }
}
