#![warn(missing_docs)]
//! Core primitives shared across the workspace.

pub mod bytes;
pub mod command;
pub mod ids;
pub mod scope;

use serde::{Deserialize, Serialize};

// Re-export commonly used types
pub use bytes::{ByteReader, ByteWriter, DecodeError};
pub use command::{Command, CommandKind, WIRE_GLOBAL_REGION};
pub use ids::{IdAllocator, IdBlock, IdError};
pub use scope::{FactionId, OwnerId, RegionId, Scope};

/// Discrete simulation tick. Every replica agrees on what happens at each tick.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct SimTick(pub u64);

impl SimTick {
    /// First tick in any deterministic timeline.
    pub const ZERO: Self = Self(0);

    /// Advance by `delta` ticks.
    pub fn advance(self, delta: u64) -> Self {
        Self(self.0 + delta)
    }

    /// Ticks remaining until `horizon`, zero when already at or past it.
    pub fn ticks_until(self, horizon: SimTick) -> u64 {
        horizon.0.saturating_sub(self.0)
    }

    /// Convert from the signed 32-bit wire representation.
    ///
    /// Negative values are not valid ticks and yield `None`.
    pub fn from_wire(value: i32) -> Option<Self> {
        u64::try_from(value).ok().map(Self)
    }

    /// Convert to the signed 32-bit wire representation.
    ///
    /// Returns `None` once a timeline outgrows the wire format.
    pub fn to_wire(self) -> Option<i32> {
        i32::try_from(self.0).ok()
    }
}

impl std::fmt::Display for SimTick {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
