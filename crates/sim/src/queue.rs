//! Per-scope command queues.
//!
//! The network side only ever enqueues; the simulation thread drains. Each scope
//! (the world, each region) has its own FIFO, and a command executes in the step
//! that processes its target tick on that scope's clock.

use colonysync_core::{Command, RegionId, Scope, SimTick};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use thiserror::Error;
use tracing::{error, warn};

/// Queue inconsistencies.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// The head command targets a tick the clock has already passed.
    #[error("stale {kind} command in {scope}: target tick {target} but clock is at {current}")]
    Stale {
        /// Scope of the queue.
        scope: Scope,
        /// Kind of the discarded command.
        kind: colonysync_core::CommandKind,
        /// Tick the command was scheduled for.
        target: SimTick,
        /// Tick being processed when the command was found.
        current: SimTick,
    },
}

/// Thread-safe FIFO of commands awaiting their target tick.
///
/// Cloning yields another handle to the same queue.
#[derive(Debug, Clone)]
pub struct ScopeQueue {
    scope: Scope,
    inner: Arc<Mutex<VecDeque<Command>>>,
}

impl ScopeQueue {
    /// Empty queue for `scope`.
    pub fn new(scope: Scope) -> Self {
        Self {
            scope,
            inner: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Command>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Scope this queue serves.
    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Append a command. Never reorders, never coalesces.
    pub fn enqueue(&self, command: Command) {
        self.lock().push_back(command);
    }

    /// Number of pending commands.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Target tick of the head command.
    pub fn peek_tick(&self) -> Option<SimTick> {
        self.lock().front().map(Command::target_tick)
    }

    /// Whether the head command is due at or before `tick`.
    pub fn has_due(&self, tick: SimTick) -> bool {
        self.peek_tick().is_some_and(|target| target <= tick)
    }

    /// Pop the head if it targets exactly `tick`.
    ///
    /// A head behind `tick` is removed and reported as [`QueueError::Stale`] so the
    /// caller can keep draining past it.
    pub fn pop_due(&self, tick: SimTick) -> Result<Option<Command>, QueueError> {
        let mut queue = self.lock();
        let Some(target) = queue.front().map(Command::target_tick) else {
            return Ok(None);
        };
        if target > tick {
            return Ok(None);
        }
        let Some(command) = queue.pop_front() else {
            return Ok(None);
        };
        if target < tick {
            let err = QueueError::Stale {
                scope: self.scope,
                kind: command.kind(),
                target,
                current: tick,
            };
            error!(%err, "discarding command scheduled in the past");
            return Err(err);
        }
        Ok(Some(command))
    }

    /// Pop commands from the head for as long as `pred` accepts them.
    pub fn drain_all_while(&self, mut pred: impl FnMut(&Command) -> bool) -> Vec<Command> {
        let mut queue = self.lock();
        let mut drained = Vec::new();
        while queue.front().is_some_and(&mut pred) {
            if let Some(command) = queue.pop_front() {
                drained.push(command);
            }
        }
        drained
    }

    /// Every command due at exactly `tick`, in enqueue order. Stale heads are
    /// logged and dropped.
    pub fn drain_due(&self, tick: SimTick) -> Vec<Command> {
        let mut due = Vec::new();
        loop {
            match self.pop_due(tick) {
                Ok(Some(command)) => due.push(command),
                Ok(None) => break,
                Err(_) => continue,
            }
        }
        due
    }
}

/// Routes incoming commands to the queue of their scope.
///
/// Cheap to clone; the network thread holds one handle, the simulation another.
#[derive(Debug, Clone)]
pub struct CommandLog {
    global: ScopeQueue,
    regions: Arc<RwLock<BTreeMap<RegionId, ScopeQueue>>>,
}

impl Default for CommandLog {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandLog {
    /// Log with only the global queue.
    pub fn new() -> Self {
        Self {
            global: ScopeQueue::new(Scope::Global),
            regions: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// The world-scoped queue.
    pub fn global(&self) -> &ScopeQueue {
        &self.global
    }

    /// Queue of a registered region.
    pub fn region(&self, id: RegionId) -> Option<ScopeQueue> {
        self.regions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// Start accepting commands for `queue`'s region.
    pub fn register_region(&self, queue: ScopeQueue) {
        if let Scope::Region(id) = queue.scope() {
            self.regions
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(id, queue);
        }
    }

    /// Stop accepting commands for a region.
    pub fn unregister_region(&self, id: RegionId) -> Option<ScopeQueue> {
        self.regions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
    }

    /// Append `command` to its scope's queue.
    ///
    /// Commands for a region this replica does not have are dropped; returns
    /// whether the command was queued.
    pub fn enqueue(&self, command: Command) -> bool {
        match command.scope() {
            Scope::Global => {
                self.global.enqueue(command);
                true
            }
            Scope::Region(id) => match self.region(id) {
                Some(queue) => {
                    queue.enqueue(command);
                    true
                }
                None => {
                    warn!(region = %id, kind = %command.kind(), "dropping command for unknown region");
                    false
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colonysync_core::CommandKind;

    fn cmd(tick: u64, tag: u8) -> Command {
        Command::global(CommandKind::WorldTimeSpeed, SimTick(tick), vec![tag])
    }

    #[test]
    fn pop_due_takes_only_exact_tick() {
        let queue = ScopeQueue::new(Scope::Global);
        queue.enqueue(cmd(5, 0));
        queue.enqueue(cmd(5, 1));
        queue.enqueue(cmd(7, 2));

        assert_eq!(queue.pop_due(SimTick(4)), Ok(None));
        let due = queue.drain_due(SimTick(5));
        assert_eq!(
            due.iter().map(|c| c.payload()[0]).collect::<Vec<_>>(),
            vec![0, 1]
        );
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.peek_tick(), Some(SimTick(7)));
    }

    #[test]
    fn stale_head_is_reported_and_removed() {
        let queue = ScopeQueue::new(Scope::Global);
        queue.enqueue(cmd(3, 0));
        queue.enqueue(cmd(5, 1));

        assert!(matches!(
            queue.pop_due(SimTick(5)),
            Err(QueueError::Stale {
                target: SimTick(3),
                ..
            })
        ));
        assert_eq!(queue.pop_due(SimTick(5)).unwrap().unwrap().payload(), &[1]);
    }

    #[test]
    fn drain_all_while_stops_at_first_rejection() {
        let queue = ScopeQueue::new(Scope::Global);
        for (tick, tag) in [(1, 0), (1, 1), (2, 2), (1, 3)] {
            queue.enqueue(cmd(tick, tag));
        }
        let drained = queue.drain_all_while(|c| c.target_tick() <= SimTick(1));
        assert_eq!(drained.len(), 2);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn log_drops_commands_for_unknown_regions() {
        let log = CommandLog::new();
        let region = Command::region(CommandKind::Forbid, SimTick(1), RegionId(4), vec![]);
        assert!(!log.enqueue(region.clone()));

        log.register_region(ScopeQueue::new(Scope::Region(RegionId(4))));
        assert!(log.enqueue(region));
        assert_eq!(log.region(RegionId(4)).map(|q| q.len()), Some(1));
        assert!(log.global().is_empty());
    }

    #[test]
    fn cloned_handles_share_the_queue() {
        let log = CommandLog::new();
        let net_side = log.clone();
        let handle = std::thread::spawn(move || {
            for tick in 0..10 {
                net_side.enqueue(cmd(tick, tick as u8));
            }
        });
        handle.join().unwrap();
        assert_eq!(log.global().len(), 10);
    }
}
