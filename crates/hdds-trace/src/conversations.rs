// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Writer/reader conversation assembly.
//!
//! A conversation is opened the first time a submessage is seen travelling
//! between a known writer and a known reader. On creation it is seeded with
//! the discovery and unaddressed traffic evidence of both endpoints that is
//! relevant to that pair (see [`relevant_evidence`]).

use crate::endpoints::{EndpointInfo, EndpointMap};
use crate::evidence::{Traffic, TrafficEvidence};
use crate::frame::{
    AckNackSubmessage, DataRef, DataSubmessage, EvidenceRef, Frame, FrameStore,
    GapSubmessage, HeartbeatSubmessage,
};
use crate::guid::{EntityId, Guid, GuidParseError};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, warn};

/// Evidence of traffic between one writer and one reader.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationInfo {
    pub writer: Guid,
    pub reader: Guid,
    /// RTPS domain of the frame that opened the conversation.
    pub domain_id: u16,
    pub first_evidence_frame: u64,
    pub first_evidence_time: f64,
    pub traffic: TrafficEvidence,
}

impl ConversationInfo {
    fn open(
        store: &FrameStore,
        endpoints: &EndpointMap,
        writer: &EndpointInfo,
        reader: &EndpointInfo,
        frame: &Frame,
    ) -> Self {
        Self {
            writer: writer.guid,
            reader: reader.guid,
            domain_id: frame.domain_id,
            first_evidence_frame: frame.frame_no,
            first_evidence_time: frame.reference_time,
            traffic: relevant_evidence(store, endpoints, writer, reader),
        }
    }
}

/// Submessages in `evidence` that were addressed to `target`.
///
/// A submessage qualifies when it is at or after `min_frame`, its INFO_DST
/// (if any) names `target`, its addressed id is `target`'s or the wildcard,
/// and its frame went to one of `target`'s known destinations. MAC and port
/// only have to match when `target` records them.
fn addressed_to<'a, T: Traffic + 'a>(
    store: &'a FrameStore,
    evidence: &'a [EvidenceRef<T>],
    min_frame: u64,
    target: &'a EndpointInfo,
) -> impl Iterator<Item = EvidenceRef<T>> + 'a {
    store
        .resolve_all(evidence)
        .filter(move |(_, frame, sm)| {
            let addressed = sm.addressed_id();
            if let Some(dst_prefix) = frame.destination_at(sm.sm_order()) {
                if Guid::new(dst_prefix, addressed) != target.guid {
                    return false;
                }
            }
            frame.frame_no >= min_frame
                && (addressed.is_unknown() || addressed == target.guid.entity_id)
                && target.reachable_at(frame)
        })
        .map(|(evidence, _, _)| evidence)
}

/// Evidence of `writer` and `reader` relevant to their conversation.
///
/// - SPDP announcements of either participant;
/// - SEDP announcements of either endpoint, sent to the counterpart's
///   publications/subscriptions reader;
/// - unaddressed writer traffic that reached the reader, and unaddressed
///   reader ACKNACKs that reached the writer.
pub fn relevant_evidence(
    store: &FrameStore,
    endpoints: &EndpointMap,
    writer: &EndpointInfo,
    reader: &EndpointInfo,
) -> TrafficEvidence {
    let first_frame = writer.first_evidence_frame.min(reader.first_evidence_frame);
    let mut out = TrafficEvidence::default();

    let spdp = writer
        .spdp_announcements
        .iter()
        .chain(&reader.spdp_announcements)
        .copied();
    out.extend(spdp.filter(|evidence| {
        store.resolve(*evidence).is_some_and(|(frame, data)| {
            frame.frame_no >= first_frame
                && data.participant.as_ref().is_some_and(|p| {
                    p.guid.prefix == writer.guid.prefix || p.guid.prefix == reader.guid.prefix
                })
        })
    }));

    let mut sedp: Vec<DataRef> = Vec::new();
    let halves = [
        (writer, reader.guid.sibling(EntityId::SEDP_PUBLICATIONS_READER)),
        (reader, writer.guid.sibling(EntityId::SEDP_SUBSCRIPTIONS_READER)),
    ];
    for (announced, builtin_reader) in halves {
        match endpoints.get(&builtin_reader) {
            Some(target) => sedp.extend(addressed_to(
                store,
                &announced.sedp_announcements,
                first_frame,
                target,
            )),
            None => debug!(
                "No SEDP evidence for {}: {} not discovered",
                announced.guid, builtin_reader
            ),
        }
    }
    out.extend(sedp.into_iter().filter(|evidence| {
        store.resolve(*evidence).is_some_and(|(frame, data)| {
            frame.frame_no >= first_frame
                && data
                    .endpoint
                    .as_ref()
                    .is_some_and(|e| e.guid == writer.guid || e.guid == reader.guid)
        })
    }));

    let min_frame = reader.first_evidence_frame;
    out.extend(addressed_to(store, writer.traffic.list::<DataSubmessage>(), min_frame, reader));
    out.extend(addressed_to(store, writer.traffic.list::<GapSubmessage>(), min_frame, reader));
    out.extend(addressed_to(
        store,
        writer.traffic.list::<HeartbeatSubmessage>(),
        min_frame,
        reader,
    ));
    out.extend(addressed_to(
        store,
        reader.traffic.list::<AckNackSubmessage>(),
        writer.first_evidence_frame,
        writer,
    ));

    out
}

/// `writer -> reader -> conversation`.
#[derive(Debug, Default)]
pub struct ConversationMap {
    conversations: BTreeMap<Guid, BTreeMap<Guid, ConversationInfo>>,
}

impl ConversationMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assemble conversations from every addressed submessage.
    pub fn build(store: &FrameStore, endpoints: &EndpointMap) -> Self {
        let mut map = Self::new();

        for frame in store.iter() {
            for (index, data) in frame.datas.iter().enumerate() {
                if frame.destination_at(data.sm_order).is_some() {
                    map.observe(store, endpoints, frame, data, DataRef::new(frame.frame_no, index));
                } else {
                    map.observe_registered_writers(store, endpoints, frame, data);
                }
            }
            for (index, gap) in frame.gaps.iter().enumerate() {
                map.observe(store, endpoints, frame, gap, EvidenceRef::new(frame.frame_no, index));
            }
            for (index, heartbeat) in frame.heartbeats.iter().enumerate() {
                map.observe(
                    store,
                    endpoints,
                    frame,
                    heartbeat,
                    EvidenceRef::new(frame.frame_no, index),
                );
            }
            for (index, acknack) in frame.acknacks.iter().enumerate() {
                map.observe(store, endpoints, frame, acknack, EvidenceRef::new(frame.frame_no, index));
            }
        }

        debug!("Assembled {} conversations", map.len());
        map
    }

    pub fn get(&self, writer: &Guid, reader: &Guid) -> Option<&ConversationInfo> {
        self.conversations.get(writer)?.get(reader)
    }

    /// Conversations ordered by (writer, reader).
    pub fn iter(&self) -> impl Iterator<Item = &ConversationInfo> {
        self.conversations.values().flat_map(BTreeMap::values)
    }

    pub fn len(&self) -> usize {
        self.conversations.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    /// Locate the conversation, opening it if both endpoints are known.
    fn entry(
        &mut self,
        store: &FrameStore,
        endpoints: &EndpointMap,
        writer: Guid,
        reader: Guid,
        frame: &Frame,
    ) -> Option<&mut ConversationInfo> {
        let Some(writer_info) = endpoints.get(&writer) else {
            warn!("Frame {}: writer {} missing from endpoint map", frame.frame_no, writer);
            return None;
        };
        let Some(reader_info) = endpoints.get(&reader) else {
            warn!("Frame {}: reader {} missing from endpoint map", frame.frame_no, reader);
            return None;
        };

        let conversation = self
            .conversations
            .entry(writer)
            .or_default()
            .entry(reader)
            .or_insert_with(|| {
                ConversationInfo::open(store, endpoints, writer_info, reader_info, frame)
            });
        Some(conversation)
    }

    fn observe<T: Traffic>(
        &mut self,
        store: &FrameStore,
        endpoints: &EndpointMap,
        frame: &Frame,
        sm: &T,
        evidence: EvidenceRef<T>,
    ) {
        let Some(dst_prefix) = frame.destination_at(sm.sm_order()) else {
            return;
        };
        if sm.sender_id().is_unknown() || sm.addressed_id().is_unknown() {
            debug!(
                "Frame {}: {} with wildcard entity id is not attributed",
                frame.frame_no,
                T::KIND
            );
            return;
        }

        let sender = frame.local_guid(sm.sender_id());
        let addressee = Guid::new(dst_prefix, sm.addressed_id());
        let (writer, reader) = if T::FROM_READER {
            (addressee, sender)
        } else {
            (sender, addressee)
        };

        if let Some(conversation) = self.entry(store, endpoints, writer, reader, frame) {
            conversation.traffic.push(evidence);
        }
    }

    /// A reader announcement listing its matched writers implies those
    /// conversations even if their traffic was never captured.
    fn observe_registered_writers(
        &mut self,
        store: &FrameStore,
        endpoints: &EndpointMap,
        frame: &Frame,
        data: &DataSubmessage,
    ) {
        if data.writer_id != EntityId::SEDP_SUBSCRIPTIONS_WRITER {
            return;
        }
        let Some(endpoint) = &data.endpoint else {
            return;
        };
        for writer in &endpoint.registered_writers {
            // repeated announcements leave an existing conversation untouched
            self.entry(store, endpoints, *writer, endpoint.guid, frame);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConversationKeyError {
    #[error("expected \"<writer guid>,<reader guid>\" (32 hex characters each), got {0:?}")]
    Shape(String),

    #[error("invalid GUID in conversation key: {0}")]
    Guid(#[from] GuidParseError),

    #[error("not a conversation, needs one writer and one reader: {0}")]
    NotWriterReader(String),
}

/// Parse `"<guid>,<guid>"` (either order) into `(writer, reader)`.
pub fn parse_conversation_key(key: &str) -> Result<(Guid, Guid), ConversationKeyError> {
    let key = key.trim();
    let (first, second) = key
        .split_once(',')
        .filter(|(a, b)| a.len() == 32 && b.len() == 32)
        .ok_or_else(|| ConversationKeyError::Shape(key.to_string()))?;
    let first: Guid = first.parse()?;
    let second: Guid = second.parse()?;

    match (first.entity_id, second.entity_id) {
        (a, b) if a.is_writer() && b.is_reader() => Ok((first, second)),
        (a, b) if a.is_reader() && b.is_writer() => Ok((second, first)),
        _ => Err(ConversationKeyError::NotWriterReader(key.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::test_support::*;
    use crate::frame::{EndpointAnnouncement, Locator, ParticipantAnnouncement};

    fn guid(c: char, entity: &str) -> Guid {
        Guid::new(prefix(c), eid(entity))
    }

    fn analyse(frames: Vec<Frame>) -> (FrameStore, EndpointMap, ConversationMap) {
        let mut store = FrameStore::new();
        for f in frames {
            store.insert(f);
        }
        let endpoints = EndpointMap::build(&store);
        let conversations = ConversationMap::build(&store, &endpoints);
        (store, endpoints, conversations)
    }

    fn spdp(frame_no: u64, c: char, ip: &str) -> Frame {
        let mut f = frame(frame_no, prefix(c));
        let mut d = data(0, "000100c2", "000100c7");
        d.participant = Some(ParticipantAnnouncement {
            guid: guid(c, "000001c1"),
            metatraffic_unicast: vec![Locator {
                ip: ip.into(),
                port: "7411".into(),
            }],
            metatraffic_multicast: vec![],
            builtin_endpoints: 0x3f,
        });
        f.datas.push(d);
        f
    }

    #[test]
    fn test_addressed_data_opens_conversation() {
        let mut f = frame(21, prefix('a'));
        f.info_dsts.push(info_dst(0, prefix('b')));
        f.datas.push(data(1, "00000102", "00000107"));
        let (_, _, conversations) = analyse(vec![f]);

        let conv = conversations
            .get(&guid('a', "00000102"), &guid('b', "00000107"))
            .unwrap();
        assert_eq!(conv.first_evidence_frame, 21);
        assert_eq!(conv.domain_id, 0);
        assert_eq!(conv.traffic.datas, vec![DataRef::new(21, 0)]);
        assert_eq!(conversations.len(), 1);
    }

    #[test]
    fn test_acknack_keyed_writer_first() {
        let mut f = frame(30, prefix('b'));
        f.info_dsts.push(info_dst(0, prefix('a')));
        f.acknacks.push(AckNackSubmessage {
            sm_order: 1,
            flags: 0x03,
            writer_id: eid("000003c2"),
            reader_id: eid("dddddddd"),
            bitmap_base: 1,
            bitmap: String::new(),
        });
        let (_, _, conversations) = analyse(vec![f]);

        let conv = conversations
            .get(&guid('a', "000003c2"), &guid('b', "dddddddd"))
            .unwrap();
        assert_eq!(conv.traffic.acknacks.len(), 1);
    }

    #[test]
    fn test_wildcard_not_attributed() {
        let mut f = frame(5, prefix('a'));
        f.info_dsts.push(info_dst(0, prefix('b')));
        f.datas.push(data(1, "00000102", "00000000"));
        let (_, _, conversations) = analyse(vec![f]);
        assert!(conversations.is_empty());
    }

    #[test]
    fn test_later_evidence_appends() {
        let mut f1 = frame(21, prefix('a'));
        f1.info_dsts.push(info_dst(0, prefix('b')));
        f1.datas.push(data(1, "00000102", "00000107"));
        let mut f2 = frame(22, prefix('a'));
        f2.info_dsts.push(info_dst(0, prefix('b')));
        f2.heartbeats.push(HeartbeatSubmessage {
            sm_order: 1,
            flags: 0x03,
            writer_id: eid("00000102"),
            reader_id: eid("00000107"),
            first_seq_num: 1,
            last_seq_num: 4,
        });
        let (_, _, conversations) = analyse(vec![f1, f2]);

        let conv = conversations
            .get(&guid('a', "00000102"), &guid('b', "00000107"))
            .unwrap();
        assert_eq!(conv.first_evidence_frame, 21);
        assert_eq!(conv.traffic.heartbeats.len(), 1);
    }

    #[test]
    fn test_relevant_evidence_precedes_opening_submessage() {
        let mut reader_seen = frame(20, prefix('a'));
        reader_seen.info_dsts.push(info_dst(0, prefix('b')));
        reader_seen.datas.push(data(1, "00000102", "00000107"));

        // the knowledge base is complete before any conversation opens
        let mut multicast = frame(21, prefix('a'));
        multicast.datas.push(data(0, "00000102", "00000000"));

        let (_, _, conversations) = analyse(vec![reader_seen, multicast]);
        let conv = conversations
            .get(&guid('a', "00000102"), &guid('b', "00000107"))
            .unwrap();
        assert_eq!(conv.first_evidence_frame, 20);
        assert_eq!(
            conv.traffic.datas,
            vec![DataRef::new(21, 0), DataRef::new(20, 0)]
        );
    }

    #[test]
    fn test_relevance_filter_matches_destination() {
        let mut store = FrameStore::new();

        let mut reader_seen = frame(20, prefix('a'));
        reader_seen.info_dsts.push(info_dst(0, prefix('b')));
        reader_seen.datas.push(data(1, "00000102", "00000107"));

        let mut multicast = frame(21, prefix('a'));
        multicast.datas.push(data(0, "00000102", "00000000"));

        let mut elsewhere = frame(22, prefix('a'));
        elsewhere.dst_ip = "239.255.0.2".into();
        elsewhere.datas.push(data(0, "00000102", "00000000"));

        let mut other_port = frame(23, prefix('a'));
        other_port.dst_port = "7401".into();
        other_port.datas.push(data(0, "00000102", "00000000"));

        for f in [reader_seen, multicast, elsewhere, other_port] {
            store.insert(f);
        }
        let endpoints = EndpointMap::build(&store);
        let writer = endpoints.get(&guid('a', "00000102")).unwrap();
        let reader = endpoints.get(&guid('b', "00000107")).unwrap();

        let evidence = relevant_evidence(&store, &endpoints, writer, reader);
        assert_eq!(evidence.datas, vec![DataRef::new(21, 0)]);
    }

    #[test]
    fn test_spdp_announcements_of_both_participants() {
        let mut sedp = frame(20, prefix('a'));
        sedp.info_dsts.push(info_dst(0, prefix('b')));
        sedp.datas.push(data(1, "000003c2", "000003c7"));

        let (store, endpoints, conversations) = analyse(vec![
            spdp(10, 'a', "10.0.0.1"),
            spdp(11, 'b', "10.0.0.3"),
            spdp(12, 'c', "10.0.0.5"),
            sedp,
        ]);

        let writer = guid('a', "000003c2");
        let reader = guid('b', "000003c7");
        let conv = conversations.get(&writer, &reader).unwrap();
        assert_eq!(
            conv.traffic.datas,
            vec![DataRef::new(10, 0), DataRef::new(11, 0), DataRef::new(20, 0)]
        );

        // older announcements and those of other participants are dropped
        let mut late_writer = endpoints.get(&writer).unwrap().clone();
        late_writer.first_evidence_frame = 11;
        late_writer.spdp_announcements.push(DataRef::new(12, 0));
        let mut late_reader = endpoints.get(&reader).unwrap().clone();
        late_reader.first_evidence_frame = 11;

        let evidence = relevant_evidence(&store, &endpoints, &late_writer, &late_reader);
        assert_eq!(evidence.datas, vec![DataRef::new(11, 0)]);
    }

    #[test]
    fn test_sedp_announcement_relevance() {
        let mut sedp = frame(20, prefix('a'));
        sedp.dst_ip = "10.0.0.3".into();
        sedp.dst_port = "7411".into();
        sedp.info_dsts.push(info_dst(0, prefix('b')));
        let mut announcement = data(1, "000003c2", "000003c7");
        announcement.endpoint = Some(EndpointAnnouncement {
            guid: guid('a', "00000102"),
            reliable: true,
            ..EndpointAnnouncement::default()
        });
        sedp.datas.push(announcement);

        let mut user = frame(21, prefix('a'));
        user.info_dsts.push(info_dst(0, prefix('b')));
        user.datas.push(data(1, "00000102", "00000107"));

        let (_, _, conversations) =
            analyse(vec![spdp(10, 'a', "10.0.0.1"), spdp(11, 'b', "10.0.0.3"), sedp, user]);

        let conv = conversations
            .get(&guid('a', "00000102"), &guid('b', "00000107"))
            .unwrap();
        assert_eq!(
            conv.traffic.datas,
            vec![DataRef::new(20, 0), DataRef::new(21, 0)]
        );
    }

    #[test]
    fn test_registered_writers_open_conversation() {
        let mut f = frame(40, prefix('b'));
        let mut announcement = data(0, "000004c2", "000004c7");
        announcement.endpoint = Some(EndpointAnnouncement {
            guid: guid('b', "00000107"),
            registered_writers: vec![guid('a', "00000102")],
            ..EndpointAnnouncement::default()
        });
        f.datas.push(announcement.clone());
        let mut repeat = frame(41, prefix('b'));
        repeat.datas.push(announcement);

        let (_, _, conversations) = analyse(vec![f, repeat]);
        let conv = conversations
            .get(&guid('a', "00000102"), &guid('b', "00000107"))
            .unwrap();
        assert_eq!(conv.first_evidence_frame, 40);
        assert!(conv.traffic.is_empty());
    }

    #[test]
    fn test_parse_conversation_key() {
        let w = "aaaaaaaaaaaaaaaaaaaaaaaa00000102";
        let r = "bbbbbbbbbbbbbbbbbbbbbbbb00000107";

        let (writer, reader) = parse_conversation_key(&format!("{w},{r}")).unwrap();
        assert_eq!((writer.to_string(), reader.to_string()), (w.into(), r.into()));
        let (writer, reader) = parse_conversation_key(&format!("{r},{w}")).unwrap();
        assert_eq!((writer.to_string(), reader.to_string()), (w.into(), r.into()));

        assert!(matches!(
            parse_conversation_key(w),
            Err(ConversationKeyError::Shape(_))
        ));
        assert!(matches!(
            parse_conversation_key(&format!("{w},{w}")),
            Err(ConversationKeyError::NotWriterReader(_))
        ));
        assert!(matches!(
            parse_conversation_key(&format!("{w},zzzzzzzzzzzzzzzzzzzzzzzz00000107")),
            Err(ConversationKeyError::Guid(_))
        ));
    }
}
