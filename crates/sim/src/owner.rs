//! Owner context: which faction's private state a region currently exposes.
//!
//! Handlers that act on behalf of a faction push that faction onto the region's
//! context stack, do their work against the now-active bundle, and pop to restore
//! whatever was active before. [`OwnerScope`] pairs the two so the pop happens on
//! every exit path.

use crate::region::Region;
use colonysync_core::FactionId;
use std::ops::{Deref, DerefMut};
use tracing::{error, trace};

/// Who an action is performed for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Party {
    /// A player faction; eligible for context switching.
    Player(FactionId),
    /// Wildlife, raiders, unowned things. Pushing one changes nothing.
    NonPlayer,
}

impl Party {
    /// Faction of an eligible party.
    pub fn faction(&self) -> Option<&FactionId> {
        match self {
            Party::Player(id) => Some(id),
            Party::NonPlayer => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Frame {
    /// Pushed for an ineligible party; popping it restores nothing.
    Sentinel,
    /// Active faction to restore on pop.
    Restore(Option<FactionId>),
}

/// Stack of previously active factions.
#[derive(Debug, Clone, Default)]
pub struct OwnerContextStack {
    frames: Vec<Frame>,
}

impl OwnerContextStack {
    /// Current nesting depth.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Whether no push is outstanding.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl Region {
    /// Make `party`'s bundle active, remembering what was active before.
    ///
    /// Ineligible parties push a sentinel and leave the region untouched. Player
    /// factions without a bundle here get one bootstrapped.
    pub fn push(&mut self, party: Party) {
        match party {
            Party::NonPlayer => {
                self.context.frames.push(Frame::Sentinel);
            }
            Party::Player(faction) => {
                self.context.frames.push(Frame::Restore(self.active.clone()));
                self.ensure_bundle(&faction);
                trace!(region = %self.id, %faction, depth = self.context.depth(), "push owner");
                self.active = Some(faction);
            }
        }
    }

    /// Undo the most recent [`Region::push`]. Returns the faction made active
    /// again, if the frame restored one.
    pub fn pop(&mut self) -> Option<FactionId> {
        match self.context.frames.pop() {
            Some(Frame::Restore(previous)) => {
                self.active = previous.clone();
                previous
            }
            Some(Frame::Sentinel) => None,
            None => {
                error!(region = %self.id, "owner context popped with nothing pushed");
                None
            }
        }
    }

    /// Push `party` for the lifetime of the returned guard.
    pub fn with_owner(&mut self, party: Party) -> OwnerScope<'_> {
        self.push(party);
        OwnerScope { region: self }
    }

    /// Depth of the owner context stack.
    pub fn context_depth(&self) -> usize {
        self.context.depth()
    }
}

/// Guard that pops the owner context when dropped.
pub struct OwnerScope<'a> {
    region: &'a mut Region,
}

impl Deref for OwnerScope<'_> {
    type Target = Region;

    fn deref(&self) -> &Region {
        self.region
    }
}

impl DerefMut for OwnerScope<'_> {
    fn deref_mut(&mut self) -> &mut Region {
        self.region
    }
}

impl Drop for OwnerScope<'_> {
    fn drop(&mut self) {
        self.region.pop();
    }
}
