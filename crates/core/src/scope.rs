//! Identifiers for participants, factions, regions and command scopes.
//!
//! Owners are the human participants (keyed by their identity string), factions
//! are the in-world parties owners play as. Regions are independently ticking
//! sub-areas of the world. All of them are plain values so that state can refer
//! to one another by id instead of by pointer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a participant, e.g. the username they joined with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    /// Wrap an identity string.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Borrow the identity string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OwnerId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Stable load id of a faction (for example `Faction_12`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FactionId(String);

impl FactionId {
    /// Wrap a faction load id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Faction id derived from a unique numeric id drawn from an [`crate::IdBlock`].
    pub fn from_unique(id: i32) -> Self {
        Self(format!("Faction_{id}"))
    }

    /// Borrow the load id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FactionId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Identifier of an independently ticking region.
///
/// Region ids are non-negative; `-1` is reserved on the wire for the global scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegionId(pub i32);

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "region#{}", self.0)
    }
}

/// The granularity a command queue and id block apply to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Scope {
    /// World-wide.
    Global,
    /// A single region.
    Region(RegionId),
}

impl Scope {
    /// Region addressed by this scope, if any.
    pub fn region(self) -> Option<RegionId> {
        match self {
            Scope::Global => None,
            Scope::Region(id) => Some(id),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Global => f.write_str("global"),
            Scope::Region(id) => id.fmt(f),
        }
    }
}
