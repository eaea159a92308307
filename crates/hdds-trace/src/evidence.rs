// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Traffic evidence lists shared by endpoints and conversations.

use crate::frame::{
    AckNackRef, AckNackSubmessage, DataRef, DataSubmessage, EvidenceRef, GapRef, GapSubmessage,
    HeartbeatRef, HeartbeatSubmessage, Submessage,
};
use crate::guid::EntityId;

/// Observed DATA/GAP/HEARTBEAT/ACKNACK submessages, in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrafficEvidence {
    pub datas: Vec<DataRef>,
    pub gaps: Vec<GapRef>,
    pub heartbeats: Vec<HeartbeatRef>,
    pub acknacks: Vec<AckNackRef>,
}

impl TrafficEvidence {
    pub fn push<T: Traffic>(&mut self, evidence: EvidenceRef<T>) {
        T::list_mut(self).push(evidence);
    }

    pub fn extend<T: Traffic>(&mut self, evidence: impl IntoIterator<Item = EvidenceRef<T>>) {
        T::list_mut(self).extend(evidence);
    }

    pub fn list<T: Traffic>(&self) -> &[EvidenceRef<T>] {
        T::list(self)
    }

    /// Concatenate `other` onto `self`, preserving order.
    pub fn append(&mut self, other: &TrafficEvidence) {
        self.datas.extend_from_slice(&other.datas);
        self.gaps.extend_from_slice(&other.gaps);
        self.heartbeats.extend_from_slice(&other.heartbeats);
        self.acknacks.extend_from_slice(&other.acknacks);
    }

    pub fn len(&self) -> usize {
        self.datas.len() + self.gaps.len() + self.heartbeats.len() + self.acknacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A submessage that travels between a sending and an addressed endpoint.
pub trait Traffic: Submessage {
    /// Sent by the reader side of the writer/reader pair.
    const FROM_READER: bool;

    /// Entity id local to the frame's sending participant.
    fn sender_id(&self) -> EntityId;

    /// Entity id on the destination participant (possibly the wildcard).
    fn addressed_id(&self) -> EntityId;

    fn list(evidence: &TrafficEvidence) -> &[EvidenceRef<Self>];

    fn list_mut(evidence: &mut TrafficEvidence) -> &mut Vec<EvidenceRef<Self>>;
}

macro_rules! impl_traffic {
    ($ty:ty, $field:ident, from_reader = $from_reader:literal, sender = $sender:ident, addressed = $addressed:ident) => {
        impl Traffic for $ty {
            const FROM_READER: bool = $from_reader;

            fn sender_id(&self) -> EntityId {
                self.$sender
            }

            fn addressed_id(&self) -> EntityId {
                self.$addressed
            }

            fn list(evidence: &TrafficEvidence) -> &[EvidenceRef<Self>] {
                &evidence.$field
            }

            fn list_mut(evidence: &mut TrafficEvidence) -> &mut Vec<EvidenceRef<Self>> {
                &mut evidence.$field
            }
        }
    };
}

impl_traffic!(DataSubmessage, datas, from_reader = false, sender = writer_id, addressed = reader_id);
impl_traffic!(GapSubmessage, gaps, from_reader = false, sender = writer_id, addressed = reader_id);
impl_traffic!(HeartbeatSubmessage, heartbeats, from_reader = false, sender = writer_id, addressed = reader_id);
impl_traffic!(AckNackSubmessage, acknacks, from_reader = true, sender = reader_id, addressed = writer_id);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::test_support::*;

    #[test]
    fn test_push_routes_by_kind() {
        let mut evidence = TrafficEvidence::default();
        evidence.push(DataRef::new(1, 0));
        evidence.push(AckNackRef::new(2, 0));
        evidence.push(AckNackRef::new(3, 1));

        assert_eq!(evidence.list::<DataSubmessage>(), &[DataRef::new(1, 0)]);
        assert_eq!(evidence.acknacks.len(), 2);
        assert_eq!(evidence.len(), 3);
    }

    #[test]
    fn test_append_preserves_order_and_duplicates() {
        let mut a = TrafficEvidence::default();
        a.push(GapRef::new(1, 0));
        let mut b = TrafficEvidence::default();
        b.push(GapRef::new(1, 0));
        b.push(GapRef::new(4, 2));

        a.append(&b);
        assert_eq!(
            a.gaps,
            vec![GapRef::new(1, 0), GapRef::new(1, 0), GapRef::new(4, 2)]
        );
    }

    #[test]
    fn test_acknack_direction() {
        let data = data(0, "00000102", "00000107");
        assert_eq!(data.sender_id(), eid("00000102"));
        assert_eq!(data.addressed_id(), eid("00000107"));

        let acknack = AckNackSubmessage {
            sm_order: 0,
            flags: 0x03,
            writer_id: eid("00000102"),
            reader_id: eid("00000107"),
            bitmap_base: 1,
            bitmap: String::new(),
        };
        assert_eq!(acknack.sender_id(), eid("00000107"));
        assert_eq!(acknack.addressed_id(), eid("00000102"));
    }
}
