// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Decoded frame records and the frame store.
//!
//! Frames are created once by the decoder and never mutated afterwards.
//! Everything derived from them (endpoint and conversation evidence) refers
//! back into the store through [`EvidenceRef`] index pairs.

use crate::destination::resolve_destination;
use crate::fragment::FragmentTable;
use crate::guid::{EntityId, Guid, GuidPrefix};
use crate::net::NetInfo;
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

/// INFO_DST: sets the destination participant for following submessages.
#[derive(Debug, Clone, PartialEq)]
pub struct InfoDst {
    pub sm_order: usize,
    pub flags: u16,
    pub guid_prefix: GuidPrefix,
}

/// UDP locator announced in discovery data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    pub ip: String,
    pub port: String,
}

impl Locator {
    pub fn net_info(&self) -> NetInfo {
        NetInfo::locator(&self.ip, &self.port)
    }
}

/// SPDP payload carried by a DATA submessage.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParticipantAnnouncement {
    pub guid: Guid,
    pub metatraffic_unicast: Vec<Locator>,
    pub metatraffic_multicast: Vec<Locator>,
    /// `BuiltinEndpointSet_t` bitmask.
    pub builtin_endpoints: u32,
}

/// SEDP payload carried by a DATA submessage.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EndpointAnnouncement {
    pub guid: Guid,
    pub unicast: Vec<Locator>,
    pub multicast: Vec<Locator>,
    /// Vendor parameter 0xb002: writers matched to an announced reader.
    pub registered_writers: Vec<Guid>,
    pub reliable: bool,
}

/// DATA submessage. Depending on which announcement is present this is a
/// plain sample, an SPDP participant announcement or an SEDP endpoint
/// announcement.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSubmessage {
    pub sm_order: usize,
    pub flags: u16,
    pub writer_id: EntityId,
    pub reader_id: EntityId,
    pub writer_seq_num: u64,
    pub unregistered: bool,
    pub disposed: bool,
    pub participant: Option<ParticipantAnnouncement>,
    pub endpoint: Option<EndpointAnnouncement>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GapSubmessage {
    pub sm_order: usize,
    pub flags: u16,
    pub writer_id: EntityId,
    pub reader_id: EntityId,
    pub gap_start: u64,
    pub bitmap_base: u64,
    pub bitmap: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeartbeatSubmessage {
    pub sm_order: usize,
    pub flags: u16,
    pub writer_id: EntityId,
    pub reader_id: EntityId,
    pub first_seq_num: u64,
    pub last_seq_num: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AckNackSubmessage {
    pub sm_order: usize,
    pub flags: u16,
    pub writer_id: EntityId,
    pub reader_id: EntityId,
    pub bitmap_base: u64,
    pub bitmap: String,
}

/// Common view over the submessages that name a writer/reader pair.
pub trait Submessage: Sized {
    /// Human-readable kind ("DATA", "GAP", ...).
    const KIND: &'static str;

    fn sm_order(&self) -> usize;

    /// The frame's list of submessages of this kind.
    fn in_frame(frame: &Frame) -> &[Self];
}

macro_rules! impl_submessage {
    ($ty:ty, $kind:literal, $field:ident) => {
        impl Submessage for $ty {
            const KIND: &'static str = $kind;

            fn sm_order(&self) -> usize {
                self.sm_order
            }

            fn in_frame(frame: &Frame) -> &[Self] {
                &frame.$field
            }
        }
    };
}

impl_submessage!(DataSubmessage, "DATA", datas);
impl_submessage!(GapSubmessage, "GAP", gaps);
impl_submessage!(HeartbeatSubmessage, "HEARTBEAT", heartbeats);
impl_submessage!(AckNackSubmessage, "ACKNACK", acknacks);

/// One decoded network frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub frame_no: u64,
    pub epoch_time: f64,
    /// Seconds since the capture's reference frame.
    pub reference_time: f64,
    pub src_mac: Option<String>,
    pub dst_mac: Option<String>,
    pub src_ip: String,
    pub dst_ip: String,
    pub src_port: String,
    pub dst_port: String,
    pub udp_length: u64,
    pub domain_id: u16,
    pub guid_prefix: GuidPrefix,
    pub info_dsts: Vec<InfoDst>,
    pub datas: Vec<DataSubmessage>,
    pub gaps: Vec<GapSubmessage>,
    pub heartbeats: Vec<HeartbeatSubmessage>,
    pub acknacks: Vec<AckNackSubmessage>,
}

impl Frame {
    /// Source addressing as seen on the wire.
    pub fn src_net(&self) -> NetInfo {
        NetInfo {
            mac: self.src_mac.clone(),
            ip: Some(self.src_ip.clone()),
            port: Some(self.src_port.clone()),
        }
    }

    /// Destination addressing as seen on the wire.
    pub fn dst_net(&self) -> NetInfo {
        NetInfo {
            mac: self.dst_mac.clone(),
            ip: Some(self.dst_ip.clone()),
            port: Some(self.dst_port.clone()),
        }
    }

    /// Destination prefix governing the submessage at `sm_order`.
    pub fn destination_at(&self, sm_order: usize) -> Option<GuidPrefix> {
        resolve_destination(self, sm_order)
    }

    /// GUID of a local entity of the sending participant.
    pub fn local_guid(&self, entity_id: EntityId) -> Guid {
        Guid::new(self.guid_prefix, entity_id)
    }
}

/// Reference to the `index`-th submessage of kind `T` in frame `frame_no`.
pub struct EvidenceRef<T> {
    pub frame_no: u64,
    pub index: usize,
    _kind: PhantomData<fn() -> T>,
}

impl<T> EvidenceRef<T> {
    pub fn new(frame_no: u64, index: usize) -> Self {
        Self {
            frame_no,
            index,
            _kind: PhantomData,
        }
    }
}

impl<T> Clone for EvidenceRef<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for EvidenceRef<T> {}

impl<T> PartialEq for EvidenceRef<T> {
    fn eq(&self, other: &Self) -> bool {
        self.frame_no == other.frame_no && self.index == other.index
    }
}

impl<T> Eq for EvidenceRef<T> {}

impl<T: Submessage> fmt::Debug for EvidenceRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}#{}", T::KIND, self.frame_no, self.index)
    }
}

pub type DataRef = EvidenceRef<DataSubmessage>;
pub type GapRef = EvidenceRef<GapSubmessage>;
pub type HeartbeatRef = EvidenceRef<HeartbeatSubmessage>;
pub type AckNackRef = EvidenceRef<AckNackSubmessage>;

/// Decoded frames ordered by frame number, plus IP fragmentation tracking.
#[derive(Debug, Default)]
pub struct FrameStore {
    frames: BTreeMap<u64, Frame>,
    pub fragments: FragmentTable,
}

impl FrameStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a frame, replacing any earlier frame with the same number.
    pub fn insert(&mut self, frame: Frame) {
        self.frames.insert(frame.frame_no, frame);
    }

    pub fn get(&self, frame_no: u64) -> Option<&Frame> {
        self.frames.get(&frame_no)
    }

    /// Frames in frame-number order.
    pub fn iter(&self) -> impl Iterator<Item = &Frame> {
        self.frames.values()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Look up the frame and submessage an evidence reference points at.
    pub fn resolve<T: Submessage>(&self, evidence: EvidenceRef<T>) -> Option<(&Frame, &T)> {
        let frame = self.frames.get(&evidence.frame_no)?;
        let sm = T::in_frame(frame).get(evidence.index)?;
        Some((frame, sm))
    }

    /// Iterate resolved evidence, silently skipping dangling references.
    pub fn resolve_all<'a, T: Submessage + 'a>(
        &'a self,
        evidence: &'a [EvidenceRef<T>],
    ) -> impl Iterator<Item = (EvidenceRef<T>, &'a Frame, &'a T)> + 'a {
        evidence
            .iter()
            .filter_map(move |r| self.resolve(*r).map(|(f, s)| (*r, f, s)))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn prefix(c: char) -> GuidPrefix {
        std::iter::repeat(c).take(24).collect::<String>().parse().unwrap()
    }

    pub fn eid(s: &str) -> EntityId {
        s.parse().unwrap()
    }

    pub fn frame(frame_no: u64, prefix: GuidPrefix) -> Frame {
        Frame {
            frame_no,
            epoch_time: 1_700_000_000.0 + frame_no as f64,
            reference_time: frame_no as f64 / 10.0,
            src_mac: Some("00:11:22:33:44:55".into()),
            dst_mac: Some("01:00:5e:7f:00:01".into()),
            src_ip: "10.0.0.1".into(),
            dst_ip: "239.255.0.1".into(),
            src_port: "50000".into(),
            dst_port: "7400".into(),
            udp_length: 100,
            domain_id: 0,
            guid_prefix: prefix,
            info_dsts: Vec::new(),
            datas: Vec::new(),
            gaps: Vec::new(),
            heartbeats: Vec::new(),
            acknacks: Vec::new(),
        }
    }

    pub fn data(sm_order: usize, writer: &str, reader: &str) -> DataSubmessage {
        DataSubmessage {
            sm_order,
            flags: 0x05,
            writer_id: eid(writer),
            reader_id: eid(reader),
            writer_seq_num: 1,
            unregistered: false,
            disposed: false,
            participant: None,
            endpoint: None,
        }
    }

    pub fn info_dst(sm_order: usize, guid_prefix: GuidPrefix) -> InfoDst {
        InfoDst {
            sm_order,
            flags: 0x01,
            guid_prefix,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_resolve_evidence() {
        let mut store = FrameStore::new();
        let mut f = frame(7, prefix('a'));
        f.datas.push(data(0, "00000102", "00000000"));
        store.insert(f);

        let (frame, sm) = store.resolve(DataRef::new(7, 0)).unwrap();
        assert_eq!(frame.frame_no, 7);
        assert_eq!(sm.writer_id, eid("00000102"));

        assert!(store.resolve(DataRef::new(7, 1)).is_none());
        assert!(store.resolve(GapRef::new(7, 0)).is_none());
        assert!(store.resolve(DataRef::new(8, 0)).is_none());
    }

    #[test]
    fn test_frames_iterate_in_order() {
        let mut store = FrameStore::new();
        store.insert(frame(30, prefix('a')));
        store.insert(frame(10, prefix('a')));
        store.insert(frame(20, prefix('a')));
        let order: Vec<u64> = store.iter().map(|f| f.frame_no).collect();
        assert_eq!(order, vec![10, 20, 30]);
    }

    #[test]
    fn test_evidence_ref_debug() {
        let r = HeartbeatRef::new(12, 3);
        assert_eq!(format!("{:?}", r), "HEARTBEAT@12#3");
    }
}
