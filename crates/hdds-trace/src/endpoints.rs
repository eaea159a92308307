// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Endpoint knowledge base.
//!
//! Walks the decoded frames and accumulates everything known about each
//! participant, writer and reader GUID: where it sends from, where it can be
//! reached, which domain it lives in, whether it is reliable, and which
//! submessages are evidence of it.
//!
//! Knowledge arrives piecemeal and out of order, so entries are never
//! replaced, only merged (see [`EndpointInfo::merge`]).

use crate::error::MergeConflict;
use crate::evidence::{Traffic, TrafficEvidence};
use crate::frame::{DataRef, DataSubmessage, EvidenceRef, Frame, FrameStore};
use crate::guid::{EntityId, Guid, BUILTIN_ENDPOINTS};
use crate::net::{self, DisplayMap, NetInfo, NetInfoMap};
use crate::tristate::Tristate;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

/// Port of domain 0 in the RTPS well-known port mapping (PB).
const PORT_BASE: u16 = 7400;
/// Port span reserved per domain (DG).
const DOMAIN_GAIN: u16 = 250;

/// Domain id implied by a discovery destination port, if it follows the
/// well-known port mapping.
pub fn domain_from_port(port: &str) -> Option<u16> {
    let port: u16 = port.trim().parse().ok()?;
    (port >= PORT_BASE).then(|| (port - PORT_BASE) / DOMAIN_GAIN)
}

/// Accumulated knowledge about one GUID.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointInfo {
    pub guid: Guid,
    pub src_net: NetInfo,
    /// Known destination addresses, keyed by IP.
    pub dst_nets: NetInfoMap,
    pub domain_id: Option<u16>,
    pub first_evidence_frame: u64,
    pub first_evidence_time: f64,
    pub reliable: Tristate,
    /// SPDP announcements that listed this endpoint as built-in.
    pub spdp_announcements: Vec<DataRef>,
    /// SEDP announcements of this endpoint (or of a reader it is matched to).
    pub sedp_announcements: Vec<DataRef>,
    /// Traffic sent by this endpoint without a resolvable addressee.
    pub traffic: TrafficEvidence,
}

impl EndpointInfo {
    /// Minimal entry first seen in `frame`.
    pub fn new(guid: Guid, frame: &Frame) -> Self {
        Self {
            guid,
            src_net: NetInfo::default(),
            dst_nets: NetInfoMap::new(),
            domain_id: None,
            first_evidence_frame: frame.frame_no,
            first_evidence_time: frame.reference_time,
            reliable: Tristate::Unknown,
            spdp_announcements: Vec::new(),
            sedp_announcements: Vec::new(),
            traffic: TrafficEvidence::default(),
        }
    }

    fn with_domain(mut self, domain_id: Option<u16>) -> Self {
        self.domain_id = domain_id;
        self
    }

    fn with_reliable(mut self, reliable: Tristate) -> Self {
        self.reliable = reliable;
        self
    }

    fn with_src_net(mut self, src_net: NetInfo) -> Self {
        self.src_net = src_net;
        self
    }

    fn with_dst_nets<'a>(mut self, nets: impl IntoIterator<Item = &'a NetInfo>) -> Self {
        for info in nets {
            if let Err(conflict) = net::create_or_merge(&mut self.dst_nets, info) {
                warn!("Announcement for {} lists {}", self.guid, conflict);
            }
        }
        self
    }

    /// Merge `update` into `self`.
    ///
    /// Unknown fields are filled, evidence lists are concatenated and the
    /// first-evidence position is kept. Contradicting values keep the
    /// existing one and are returned as conflicts.
    pub fn merge(&mut self, update: &EndpointInfo) -> Vec<MergeConflict> {
        let mut conflicts = Vec::new();

        if let Err(conflict) = self.src_net.merge(&update.src_net) {
            conflicts.push(conflict);
        }
        for info in update.dst_nets.values() {
            if let Err(conflict) = net::create_or_merge(&mut self.dst_nets, info) {
                conflicts.push(conflict);
            }
        }

        match (self.domain_id, update.domain_id) {
            (None, update) => self.domain_id = update,
            (Some(existing), Some(update)) if existing != update => {
                conflicts.push(MergeConflict::DomainId { existing, update });
            }
            _ => {}
        }

        if let Err(conflict) = self.reliable.merge(update.reliable) {
            conflicts.push(conflict);
        }

        self.spdp_announcements
            .extend_from_slice(&update.spdp_announcements);
        self.sedp_announcements
            .extend_from_slice(&update.sedp_announcements);
        self.traffic.append(&update.traffic);

        conflicts
    }

    /// Whether the endpoint has a destination entry matching the frame's
    /// destination. MAC and port only have to match if recorded.
    pub fn reachable_at(&self, frame: &Frame) -> bool {
        let Some(known) = self.dst_nets.get(&frame.dst_ip) else {
            return false;
        };
        let mac_ok = known
            .mac
            .as_deref()
            .map_or(true, |mac| Some(mac) == frame.dst_mac.as_deref());
        let port_ok = known
            .port
            .as_deref()
            .map_or(true, |port| port == frame.dst_port);
        mac_ok && port_ok
    }
}

impl fmt::Display for EndpointInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "( {}, {}, {}, ",
            self.guid,
            self.src_net,
            DisplayMap(&self.dst_nets)
        )?;
        match self.domain_id {
            Some(domain) => write!(f, "{}", domain)?,
            None => f.write_str("?")?,
        }
        write!(
            f,
            ", {}, {:.3}, {} )",
            self.first_evidence_frame, self.first_evidence_time, self.reliable
        )
    }
}

/// All known endpoints, ordered by GUID.
#[derive(Debug, Default)]
pub struct EndpointMap {
    endpoints: BTreeMap<Guid, EndpointInfo>,
}

impl EndpointMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the knowledge base from a frame store: the participant pass
    /// first (domain ids), then the endpoint pass.
    pub fn build(store: &FrameStore) -> Self {
        let mut map = Self::new();
        map.gather_participants(store);
        map.gather_endpoints(store);
        debug!("Endpoint knowledge base holds {} GUIDs", map.len());
        map
    }

    pub fn get(&self, guid: &Guid) -> Option<&EndpointInfo> {
        self.endpoints.get(guid)
    }

    pub fn contains(&self, guid: &Guid) -> bool {
        self.endpoints.contains_key(guid)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EndpointInfo> {
        self.endpoints.values()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Insert `info`, or merge it into the existing entry for its GUID.
    /// Conflicts are logged; the existing values stay.
    pub fn create_or_merge(&mut self, info: EndpointInfo) {
        match self.endpoints.get_mut(&info.guid) {
            Some(existing) => {
                for conflict in existing.merge(&info) {
                    warn!("Contradictory endpoint data for {}: {}", info.guid, conflict);
                }
            }
            None => {
                self.endpoints.insert(info.guid, info);
            }
        }
    }

    /// Participant writers, with the domain implied by the SPDP destination
    /// port.
    pub fn gather_participants(&mut self, store: &FrameStore) {
        for frame in store.iter() {
            for data in &frame.datas {
                if data.writer_id != EntityId::SPDP_WRITER {
                    continue;
                }
                let info = EndpointInfo::new(frame.local_guid(data.writer_id), frame)
                    .with_src_net(frame.src_net())
                    .with_domain(domain_from_port(&frame.dst_port))
                    .with_reliable(Tristate::False);
                self.create_or_merge(info);
            }
        }
    }

    /// Discovery announcements and observed traffic.
    pub fn gather_endpoints(&mut self, store: &FrameStore) {
        for frame in store.iter() {
            let domain = self
                .get(&frame.local_guid(EntityId::SPDP_WRITER))
                .and_then(|participant| participant.domain_id);

            for (index, data) in frame.datas.iter().enumerate() {
                let evidence = DataRef::new(frame.frame_no, index);
                self.record_participant_announcement(frame, data, evidence);
                self.record_endpoint_announcement(frame, data, evidence, domain);
                self.record_traffic(frame, data, evidence, domain, Tristate::Unknown, true);
            }
            for (index, gap) in frame.gaps.iter().enumerate() {
                // A durable writer may resend GAPs to every locator, so the
                // frame's destination is only trusted with a single INFO_DST.
                let trust_dst = frame.info_dsts.len() == 1;
                let evidence = EvidenceRef::new(frame.frame_no, index);
                self.record_traffic(frame, gap, evidence, domain, Tristate::Unknown, trust_dst);
            }
            for (index, heartbeat) in frame.heartbeats.iter().enumerate() {
                let evidence = EvidenceRef::new(frame.frame_no, index);
                self.record_traffic(frame, heartbeat, evidence, domain, Tristate::Unknown, true);
            }
            for (index, acknack) in frame.acknacks.iter().enumerate() {
                // only reliable readers acknowledge
                let evidence = EvidenceRef::new(frame.frame_no, index);
                self.record_traffic(frame, acknack, evidence, domain, Tristate::True, true);
            }
        }
    }

    /// SPDP: synthesize every built-in endpoint the participant announces.
    fn record_participant_announcement(
        &mut self,
        frame: &Frame,
        data: &DataSubmessage,
        evidence: DataRef,
    ) {
        let Some(participant) = &data.participant else {
            return;
        };
        let locators: Vec<NetInfo> = participant
            .metatraffic_unicast
            .iter()
            .chain(&participant.metatraffic_multicast)
            .map(|locator| locator.net_info())
            .collect();

        for builtin in BUILTIN_ENDPOINTS
            .iter()
            .filter(|b| participant.builtin_endpoints & b.set_bit != 0)
        {
            let mut info = EndpointInfo::new(participant.guid.sibling(builtin.entity_id), frame)
                .with_dst_nets(&locators)
                .with_reliable(builtin.reliable.into());
            info.spdp_announcements.push(evidence);
            self.create_or_merge(info);
        }
    }

    /// SEDP: the announced endpoint, plus writers already matched to an
    /// announced reader.
    fn record_endpoint_announcement(
        &mut self,
        frame: &Frame,
        data: &DataSubmessage,
        evidence: DataRef,
        domain: Option<u16>,
    ) {
        let Some(endpoint) = &data.endpoint else {
            return;
        };
        let locators: Vec<NetInfo> = endpoint
            .unicast
            .iter()
            .chain(&endpoint.multicast)
            .map(|locator| locator.net_info())
            .collect();

        let mut info = EndpointInfo::new(endpoint.guid, frame)
            .with_dst_nets(&locators)
            .with_domain(domain)
            .with_reliable(endpoint.reliable.into());
        info.sedp_announcements.push(evidence);
        self.create_or_merge(info);

        if data.writer_id == EntityId::SEDP_SUBSCRIPTIONS_WRITER {
            for writer in &endpoint.registered_writers {
                let mut info = EndpointInfo::new(*writer, frame).with_domain(domain);
                info.sedp_announcements.push(evidence);
                self.create_or_merge(info);
            }
        }
    }

    /// File one submessage. With a resolvable destination and a specific
    /// addressed id, it proves the addressee exists; otherwise it is kept as
    /// unaddressed evidence on the sender.
    fn record_traffic<T: Traffic>(
        &mut self,
        frame: &Frame,
        sm: &T,
        evidence: EvidenceRef<T>,
        domain: Option<u16>,
        reliable: Tristate,
        trust_dst: bool,
    ) {
        let mut sender = EndpointInfo::new(frame.local_guid(sm.sender_id()), frame)
            .with_src_net(frame.src_net())
            .with_domain(domain)
            .with_reliable(reliable);

        match frame.destination_at(sm.sm_order()) {
            Some(dst_prefix) if !sm.addressed_id().is_unknown() => {
                let mut addressee = EndpointInfo::new(Guid::new(dst_prefix, sm.addressed_id()), frame)
                    .with_domain(domain)
                    .with_reliable(reliable);
                if trust_dst {
                    addressee = addressee.with_dst_nets([&frame.dst_net()]);
                }
                self.create_or_merge(addressee);
            }
            _ => sender.traffic.push(evidence),
        }

        self.create_or_merge(sender);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::test_support::*;
    use crate::frame::{AckNackSubmessage, GapSubmessage, Locator, ParticipantAnnouncement};

    fn guid(c: char, entity: &str) -> Guid {
        Guid::new(prefix(c), eid(entity))
    }

    fn store(frames: Vec<Frame>) -> FrameStore {
        let mut store = FrameStore::new();
        for f in frames {
            store.insert(f);
        }
        store
    }

    fn spdp_frame(frame_no: u64, c: char, builtins: u32) -> Frame {
        let mut f = frame(frame_no, prefix(c));
        let mut d = data(0, "000100c2", "000100c7");
        d.participant = Some(ParticipantAnnouncement {
            guid: guid(c, "000001c1"),
            metatraffic_unicast: vec![Locator {
                ip: "10.0.0.1".into(),
                port: "7411".into(),
            }],
            metatraffic_multicast: vec![],
            builtin_endpoints: builtins,
        });
        f.datas.push(d);
        f
    }

    #[test]
    fn test_domain_from_port() {
        assert_eq!(domain_from_port("7400"), Some(0));
        assert_eq!(domain_from_port("7650"), Some(1));
        assert_eq!(domain_from_port("7911"), Some(2));
        assert_eq!(domain_from_port("7399"), None);
        assert_eq!(domain_from_port("not-a-port"), None);
    }

    #[test]
    fn test_participant_pass_domain() {
        let mut f = spdp_frame(10, 'a', 0);
        f.dst_port = "7650".into();
        let map = EndpointMap::build(&store(vec![f]));

        let participant = map.get(&guid('a', "000100c2")).unwrap();
        assert_eq!(participant.domain_id, Some(1));
        assert_eq!(participant.reliable, Tristate::False);
        assert_eq!(participant.first_evidence_frame, 10);
        assert_eq!(participant.src_net.ip.as_deref(), Some("10.0.0.1"));
    }

    #[test]
    fn test_spdp_synthesizes_builtins() {
        // publications writer + reader
        let map = EndpointMap::build(&store(vec![spdp_frame(10, 'a', 0x0c)]));

        assert!(map.contains(&guid('a', "000100c2")));
        assert!(!map.contains(&guid('a', "000100c7")));
        assert!(!map.contains(&guid('a', "000004c2")));
        for entity in ["000003c2", "000003c7"] {
            let info = map.get(&guid('a', entity)).unwrap();
            assert_eq!(info.reliable, Tristate::True);
            assert_eq!(info.spdp_announcements, vec![DataRef::new(10, 0)]);
            assert_eq!(info.dst_nets["10.0.0.1"].port.as_deref(), Some("7411"));
        }
    }

    #[test]
    fn test_merge_keeps_first_evidence_and_domain() {
        let f1 = frame(1, prefix('a'));
        let f2 = frame(2, prefix('a'));
        let mut existing = EndpointInfo::new(guid('a', "00000102"), &f1).with_domain(Some(0));
        let update = EndpointInfo::new(guid('a', "00000102"), &f2).with_domain(Some(3));

        let conflicts = existing.merge(&update);
        assert_eq!(
            conflicts,
            vec![MergeConflict::DomainId {
                existing: 0,
                update: 3
            }]
        );
        assert_eq!(existing.domain_id, Some(0));
        assert_eq!(existing.first_evidence_frame, 1);
    }

    #[test]
    fn test_merge_same_net_twice_is_clean() {
        let f = frame(1, prefix('a'));
        let mut existing = EndpointInfo::new(guid('a', "00000102"), &f).with_src_net(f.src_net());
        let update = existing.clone();
        assert!(existing.merge(&update).is_empty());
        assert!(existing.merge(&update).is_empty());
    }

    #[test]
    fn test_addressed_data_creates_reader() {
        let mut f = frame(21, prefix('a'));
        f.dst_ip = "10.0.0.9".into();
        f.dst_port = "7413".into();
        f.info_dsts.push(info_dst(0, prefix('b')));
        f.datas.push(data(1, "00000102", "00000107"));
        let map = EndpointMap::build(&store(vec![f]));

        let reader = map.get(&guid('b', "00000107")).unwrap();
        assert_eq!(reader.dst_nets["10.0.0.9"].port.as_deref(), Some("7413"));
        assert_eq!(reader.first_evidence_frame, 21);

        let writer = map.get(&guid('a', "00000102")).unwrap();
        assert!(writer.traffic.datas.is_empty());
        assert_eq!(writer.src_net.port.as_deref(), Some("50000"));
    }

    #[test]
    fn test_multicast_data_filed_on_writer() {
        let mut f = frame(5, prefix('a'));
        f.datas.push(data(0, "00000102", "00000000"));
        let map = EndpointMap::build(&store(vec![f]));

        let writer = map.get(&guid('a', "00000102")).unwrap();
        assert_eq!(writer.traffic.datas, vec![DataRef::new(5, 0)]);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_acknack_marks_both_reliable() {
        let mut f = frame(30, prefix('b'));
        f.info_dsts.push(info_dst(0, prefix('a')));
        f.acknacks.push(AckNackSubmessage {
            sm_order: 1,
            flags: 0x03,
            writer_id: eid("000003c2"),
            reader_id: eid("00000107"),
            bitmap_base: 1,
            bitmap: String::new(),
        });
        let map = EndpointMap::build(&store(vec![f]));

        assert_eq!(map.get(&guid('b', "00000107")).unwrap().reliable, Tristate::True);
        let writer = map.get(&guid('a', "000003c2")).unwrap();
        assert_eq!(writer.reliable, Tristate::True);
        assert!(writer.dst_nets.contains_key("239.255.0.1"));
    }

    // Known approximation: a GAP's network destination is only trusted when
    // the frame carries exactly one INFO_DST.
    #[test]
    fn test_gap_destination_needs_single_info_dst() {
        let gap = |sm_order| GapSubmessage {
            sm_order,
            flags: 0x01,
            writer_id: eid("00000102"),
            reader_id: eid("00000107"),
            gap_start: 1,
            bitmap_base: 2,
            bitmap: String::new(),
        };

        let mut single = frame(1, prefix('a'));
        single.info_dsts.push(info_dst(0, prefix('b')));
        single.gaps.push(gap(1));

        let mut multi = frame(2, prefix('a'));
        multi.info_dsts.push(info_dst(0, prefix('c')));
        multi.info_dsts.push(info_dst(2, prefix('d')));
        multi.gaps.push(gap(1));

        let map = EndpointMap::build(&store(vec![single, multi]));
        assert_eq!(map.get(&guid('b', "00000107")).unwrap().dst_nets.len(), 1);
        let reader = map.get(&guid('c', "00000107")).unwrap();
        assert!(reader.dst_nets.is_empty());
    }

    #[test]
    fn test_domain_propagates_from_participant() {
        let spdp = spdp_frame(1, 'a', 0);
        let mut traffic = frame(2, prefix('a'));
        traffic.dst_port = "9000".into();
        traffic.datas.push(data(0, "00000102", "00000000"));
        let map = EndpointMap::build(&store(vec![spdp, traffic]));

        assert_eq!(map.get(&guid('a', "00000102")).unwrap().domain_id, Some(0));
    }
}
