// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Three-valued flag for facts learned piecemeal from traffic.

use crate::error::MergeConflict;
use serde::Serialize;
use std::fmt;

/// A boolean that may not have been observed yet.
///
/// There is no conversion to `bool`; callers handle `Unknown` explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Tristate {
    #[default]
    Unknown,
    True,
    False,
}

impl Tristate {
    /// The concrete value, if one has been observed.
    pub fn known(self) -> Option<bool> {
        match self {
            Self::Unknown => None,
            Self::True => Some(true),
            Self::False => Some(false),
        }
    }

    /// Explicitly known to be true.
    pub fn is_true(self) -> bool {
        self == Self::True
    }

    /// Adopt `other` if we are still unknown. Two different concrete values
    /// conflict and leave `self` untouched.
    pub fn merge(&mut self, other: Self) -> Result<(), MergeConflict> {
        match (self.known(), other.known()) {
            (None, _) => {
                *self = other;
                Ok(())
            }
            (Some(existing), Some(update)) if existing != update => {
                Err(MergeConflict::Reliability { existing, update })
            }
            _ => Ok(()),
        }
    }
}

impl From<bool> for Tristate {
    fn from(value: bool) -> Self {
        if value {
            Self::True
        } else {
            Self::False
        }
    }
}

impl fmt::Display for Tristate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => f.write_str("?"),
            Self::True => f.write_str("true"),
            Self::False => f.write_str("false"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_adopts_concrete() {
        let mut t = Tristate::Unknown;
        t.merge(Tristate::True).unwrap();
        assert_eq!(t, Tristate::True);
    }

    #[test]
    fn test_concrete_ignores_unknown() {
        let mut t = Tristate::False;
        t.merge(Tristate::Unknown).unwrap();
        assert_eq!(t, Tristate::False);
    }

    #[test]
    fn test_conflict_keeps_existing() {
        let mut t = Tristate::True;
        let err = t.merge(Tristate::False).unwrap_err();
        assert_eq!(
            err,
            MergeConflict::Reliability {
                existing: true,
                update: false
            }
        );
        assert_eq!(t, Tristate::True);
    }

    #[test]
    fn test_same_value_is_idempotent() {
        let mut t = Tristate::from(true);
        t.merge(Tristate::True).unwrap();
        t.merge(Tristate::True).unwrap();
        assert!(t.is_true());
        assert_eq!(Tristate::Unknown.known(), None);
    }
}
