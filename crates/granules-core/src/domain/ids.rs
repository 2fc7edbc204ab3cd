//! Domain identifiers (strongly-typed, sequence-based IDs).
//!
//! Every identifier in granules is a positive sequence number rendered with
//! a kind prefix: tasks are `T-1, T-2, ...`, workers are `W-1, W-2, ...`.
//! The store (for tasks) and the scheduler (for workers) own the counters,
//! so the numbers are strictly increasing in allocation order and are never
//! reused.
//!
//! ## Phantom Type pattern
//! `Id<T>` provides one implementation (parse, display, serde, ordering)
//! while the zero-sized marker `T` keeps `GranuleId` and `WorkerId` from
//! being mixed up at compile time.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;

use thiserror::Error;

/// Marker trait for each ID kind.
pub trait IdMarker: Send + Sync + 'static {
    /// Display prefix, including the dash (e.g. `"T-"`).
    fn prefix() -> &'static str;
}

/// Generic sequence ID.
///
/// Ordering follows the sequence number, so a `BTreeMap<GranuleId, _>`
/// iterates in creation order (`T-2` before `T-10`).
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id<T: IdMarker> {
    seq: u64,
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    /// Build an ID from its sequence number (1-based).
    pub fn new(seq: u64) -> Self {
        Self {
            seq,
            _marker: PhantomData,
        }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.seq)
    }
}

/// Error returned when a string is not a well-formed ID of the expected kind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid id {value:?}: expected {prefix}<n> with n >= 1")]
pub struct ParseIdError {
    value: String,
    prefix: &'static str,
}

impl<T: IdMarker> FromStr for Id<T> {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseIdError {
            value: s.to_string(),
            prefix: T::prefix(),
        };
        let digits = s.strip_prefix(T::prefix()).ok_or_else(err)?;
        // u64::from_str accepts a leading '+', which would make "T-+1" == "T-1".
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(err());
        }
        match digits.parse::<u64>() {
            Ok(seq) if seq >= 1 => Ok(Self::new(seq)),
            _ => Err(err()),
        }
    }
}

// IDs travel as their display form ("T-3") in snapshots and tool payloads.
impl<T: IdMarker> Serialize for Id<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de, T: IdMarker> Deserialize<'de> for Id<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ========================================
// Marker types
// ========================================

/// Marker for task (granule) IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Granule {}

impl IdMarker for Granule {
    fn prefix() -> &'static str {
        "T-"
    }
}

/// Marker for worker (owner) IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Worker {}

impl IdMarker for Worker {
    fn prefix() -> &'static str {
        "W-"
    }
}

/// Identifier of a task record.
pub type GranuleId = Id<Granule>;

/// Identifier of a worker, i.e. the owner of a claim.
pub type WorkerId = Id<Worker>;

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn display_uses_kind_prefix() {
        assert_eq!(GranuleId::new(1).to_string(), "T-1");
        assert_eq!(WorkerId::new(12).to_string(), "W-12");
    }

    #[test]
    fn ordering_is_numeric_not_lexicographic() {
        assert!(GranuleId::new(2) < GranuleId::new(10));
    }

    #[test]
    fn parse_accepts_own_prefix() {
        let id: GranuleId = "T-42".parse().unwrap();
        assert_eq!(id.seq(), 42);
    }

    #[rstest]
    #[case::wrong_prefix("W-1")]
    #[case::zero("T-0")]
    #[case::empty("T-")]
    #[case::signed("T-+1")]
    #[case::garbage("T-abc")]
    #[case::no_prefix("7")]
    fn parse_rejects_malformed(#[case] raw: &str) {
        assert!(raw.parse::<GranuleId>().is_err());
    }

    #[test]
    fn serde_uses_display_form() {
        let json = serde_json::to_string(&WorkerId::new(3)).unwrap();
        assert_eq!(json, "\"W-3\"");

        let back: WorkerId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, WorkerId::new(3));

        assert!(serde_json::from_str::<WorkerId>("\"T-3\"").is_err());
    }
}
