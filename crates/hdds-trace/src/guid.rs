// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RTPS GUID types as they appear in decoded captures.
//!
//! A GUID is a 12-byte participant prefix followed by a 4-byte entity id.
//! Decoders print both halves as hex; we parse them into fixed-size arrays so
//! that every stored GUID renders back as exactly 32 lowercase hex characters.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error returned when hex text is not a valid prefix, entity id or GUID.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GuidParseError {
    #[error("expected {expected} hex characters, got {actual}")]
    Length { expected: usize, actual: usize },

    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),
}

fn decode_fixed<const N: usize>(s: &str) -> Result<[u8; N], GuidParseError> {
    let s = s.trim();
    if s.len() != N * 2 {
        return Err(GuidParseError::Length {
            expected: N * 2,
            actual: s.len(),
        });
    }
    let mut out = [0u8; N];
    hex::decode_to_slice(s, &mut out)?;
    Ok(out)
}

/// 12-byte participant GUID prefix.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub struct GuidPrefix(pub [u8; 12]);

impl FromStr for GuidPrefix {
    type Err = GuidParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_fixed(s).map(Self)
    }
}

impl fmt::Display for GuidPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for GuidPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GuidPrefix({})", self)
    }
}

/// 4-byte entity id (entity key + entity kind).
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub struct EntityId(pub [u8; 4]);

impl EntityId {
    /// ENTITYID_UNKNOWN, used as a wildcard reader/writer on multicast traffic.
    pub const UNKNOWN: Self = Self([0x00, 0x00, 0x00, 0x00]);

    /// SPDP built-in participant writer (0x000100C2).
    pub const SPDP_WRITER: Self = Self([0x00, 0x01, 0x00, 0xC2]);
    /// SPDP built-in participant reader (0x000100C7).
    pub const SPDP_READER: Self = Self([0x00, 0x01, 0x00, 0xC7]);
    /// SEDP publications writer (0x000003C2).
    pub const SEDP_PUBLICATIONS_WRITER: Self = Self([0x00, 0x00, 0x03, 0xC2]);
    /// SEDP publications reader (0x000003C7).
    pub const SEDP_PUBLICATIONS_READER: Self = Self([0x00, 0x00, 0x03, 0xC7]);
    /// SEDP subscriptions writer (0x000004C2).
    pub const SEDP_SUBSCRIPTIONS_WRITER: Self = Self([0x00, 0x00, 0x04, 0xC2]);
    /// SEDP subscriptions reader (0x000004C7).
    pub const SEDP_SUBSCRIPTIONS_READER: Self = Self([0x00, 0x00, 0x04, 0xC7]);
    /// Participant message (liveliness) writer (0x000200C2).
    pub const P2P_PARTICIPANT_MESSAGE_WRITER: Self = Self([0x00, 0x02, 0x00, 0xC2]);
    /// Participant message (liveliness) reader (0x000200C7).
    pub const P2P_PARTICIPANT_MESSAGE_READER: Self = Self([0x00, 0x02, 0x00, 0xC7]);

    /// Check for the all-zero wildcard id.
    pub fn is_unknown(&self) -> bool {
        *self == Self::UNKNOWN
    }

    /// Entity kind ends in the writer marker (`..2`).
    pub fn is_writer(&self) -> bool {
        self.0[3] & 0x0F == 0x02
    }

    /// Entity kind ends in the reader marker (`..7`).
    pub fn is_reader(&self) -> bool {
        self.0[3] & 0x0F == 0x07
    }

    /// Whether this id is one of the well-known discovery endpoints.
    pub fn is_builtin(&self) -> bool {
        BUILTIN_ENDPOINTS.iter().any(|b| b.entity_id == *self)
    }
}

impl FromStr for EntityId {
    type Err = GuidParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_fixed(s).map(Self)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self)
    }
}

/// RTPS GUID (prefix + entity id).
///
/// # Display Format
/// 32 lowercase hex characters: "aaaaaaaaaaaaaaaaaaaaaaaa000100c2"
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub struct Guid {
    pub prefix: GuidPrefix,
    pub entity_id: EntityId,
}

impl Guid {
    /// Create GUID from separate prefix and entity ID
    pub fn new(prefix: GuidPrefix, entity_id: EntityId) -> Self {
        Self { prefix, entity_id }
    }

    /// Whether the entity id part is a built-in discovery endpoint.
    pub fn is_builtin(&self) -> bool {
        self.entity_id.is_builtin()
    }

    /// Same participant, different entity.
    pub fn sibling(&self, entity_id: EntityId) -> Self {
        Self::new(self.prefix, entity_id)
    }
}

impl FromStr for Guid {
    type Err = GuidParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes: [u8; 16] = decode_fixed(s)?;
        let mut prefix = [0u8; 12];
        let mut entity_id = [0u8; 4];
        prefix.copy_from_slice(&bytes[0..12]);
        entity_id.copy_from_slice(&bytes[12..16]);
        Ok(Self::new(GuidPrefix(prefix), EntityId(entity_id)))
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.prefix, self.entity_id)
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guid({})", self)
    }
}

impl serde::Serialize for Guid {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One row of the built-in endpoint catalogue.
#[derive(Debug, Clone, Copy)]
pub struct BuiltinEndpoint {
    /// Well-known entity id.
    pub entity_id: EntityId,
    /// Bit in the SPDP `BuiltinEndpointSet_t` mask announcing this endpoint.
    pub set_bit: u32,
    /// Whether the endpoint uses reliable delivery.
    pub reliable: bool,
}

// RTPS v2.3 Table 9.12. Bits 6..=9 (participant proxy/state) have no
// well-known entity id and cannot be synthesized.
pub const BUILTIN_ENDPOINTS: [BuiltinEndpoint; 8] = [
    BuiltinEndpoint {
        entity_id: EntityId::SPDP_WRITER,
        set_bit: 1 << 0,
        reliable: false,
    },
    BuiltinEndpoint {
        entity_id: EntityId::SPDP_READER,
        set_bit: 1 << 1,
        reliable: false,
    },
    BuiltinEndpoint {
        entity_id: EntityId::SEDP_PUBLICATIONS_WRITER,
        set_bit: 1 << 2,
        reliable: true,
    },
    BuiltinEndpoint {
        entity_id: EntityId::SEDP_PUBLICATIONS_READER,
        set_bit: 1 << 3,
        reliable: true,
    },
    BuiltinEndpoint {
        entity_id: EntityId::SEDP_SUBSCRIPTIONS_WRITER,
        set_bit: 1 << 4,
        reliable: true,
    },
    BuiltinEndpoint {
        entity_id: EntityId::SEDP_SUBSCRIPTIONS_READER,
        set_bit: 1 << 5,
        reliable: true,
    },
    BuiltinEndpoint {
        entity_id: EntityId::P2P_PARTICIPANT_MESSAGE_WRITER,
        set_bit: 1 << 10,
        reliable: true,
    },
    BuiltinEndpoint {
        entity_id: EntityId::P2P_PARTICIPANT_MESSAGE_READER,
        set_bit: 1 << 11,
        reliable: true,
    },
];
