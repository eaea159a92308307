// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! HDDS Trace
//!
//! Offline analysis of RTPS traffic captured on the wire. Works on the
//! verbose text decode of a packet capture (`tshark -V`) and reconstructs:
//! - every participant, writer and reader seen in discovery or traffic
//! - which writer talked to which reader, and when
//! - discovery latency and IP fragment reassembly statistics
//!
//! # Quick Start
//!
//! ```bash
//! tshark -r capture.pcapng -V -Y rtps > capture.txt
//!
//! # Summary statistics for domain 0
//! hdds-trace --file capture.txt --domain 0
//!
//! # Dump one conversation frame by frame
//! hdds-trace --file capture.txt \
//!     --show-conversation-frames <writer guid>,<reader guid>
//! ```
//!
//! # Pipeline
//!
//! | Stage | Input | Output |
//! |-------|-------|--------|
//! | [`ingest`] | text | per-frame line groups |
//! | [`decode`] | line groups | [`FrameStore`] |
//! | [`endpoints`] | frames | [`EndpointMap`] |
//! | [`conversations`] | frames + endpoints | [`ConversationMap`] |

pub mod conversations;
pub mod decode;
pub mod destination;
pub mod endpoints;
pub mod error;
pub mod evidence;
pub mod fragment;
pub mod frame;
pub mod guid;
pub mod ingest;
pub mod net;
pub mod report;
pub mod stats;
pub mod tristate;

pub use conversations::{parse_conversation_key, ConversationInfo, ConversationMap};
pub use decode::{decode_frame, decode_frames, DecodeError};
pub use endpoints::{EndpointInfo, EndpointMap};
pub use error::{MergeConflict, TraceError};
pub use frame::{Frame, FrameStore};
pub use guid::{EntityId, Guid, GuidPrefix};
pub use ingest::{read_frames, RawFrames};
pub use report::{ReportConfig, ReportError};
pub use stats::{DiscoveryTime, TraceStats};
pub use tristate::Tristate;

/// The three products of a capture analysis.
#[derive(Debug)]
pub struct Analysis {
    pub store: FrameStore,
    pub endpoints: EndpointMap,
    pub conversations: ConversationMap,
}

impl Analysis {
    /// Decode `raw`, build the endpoint knowledge base, then assemble
    /// conversations.
    pub fn from_raw(raw: &RawFrames) -> Self {
        let store = decode_frames(raw);
        let endpoints = EndpointMap::build(&store);
        let conversations = ConversationMap::build(&store, &endpoints);
        tracing::info!(
            "Analysed {} frames: {} endpoints, {} conversations",
            store.len(),
            endpoints.len(),
            conversations.len()
        );
        Self {
            store,
            endpoints,
            conversations,
        }
    }

    pub fn discovery_times(&self, domain: Option<u16>) -> Vec<DiscoveryTime> {
        stats::discovery_times(&self.endpoints, &self.conversations, domain)
    }

    pub fn stats(&self, domain: Option<u16>) -> TraceStats {
        TraceStats::collect(&self.store, &self.endpoints, &self.conversations, domain)
    }
}
