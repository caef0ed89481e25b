//! Actions handed from other threads to the simulation thread.

use std::sync::mpsc::{self, Receiver, Sender};

/// Work to run against the session context on the simulation thread.
pub type DeferredAction<C> = Box<dyn FnOnce(&mut C) + Send>;

/// Cloneable producer end; safe to move to network or UI threads.
pub struct DeferredSender<C> {
    tx: Sender<DeferredAction<C>>,
}

impl<C> Clone for DeferredSender<C> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<C> DeferredSender<C> {
    /// Queue `action`. Returns false once the queue is gone.
    pub fn push<F>(&self, action: F) -> bool
    where
        F: FnOnce(&mut C) + Send + 'static,
    {
        self.tx.send(Box::new(action)).is_ok()
    }
}

/// FIFO of deferred actions, drained once per frame.
pub struct DeferredQueue<C> {
    tx: Sender<DeferredAction<C>>,
    rx: Receiver<DeferredAction<C>>,
}

impl<C> Default for DeferredQueue<C> {
    fn default() -> Self {
        let (tx, rx) = mpsc::channel();
        Self { tx, rx }
    }
}

impl<C> DeferredQueue<C> {
    /// Empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// A producer for this queue.
    pub fn sender(&self) -> DeferredSender<C> {
        DeferredSender {
            tx: self.tx.clone(),
        }
    }

    /// Run everything queued so far, in push order.
    ///
    /// Actions pushed while draining wait for the next call.
    pub fn run_pending(&self, context: &mut C) -> usize {
        let pending: Vec<_> = self.rx.try_iter().collect();
        let count = pending.len();
        for action in pending {
            action(context);
        }
        count
    }
}
