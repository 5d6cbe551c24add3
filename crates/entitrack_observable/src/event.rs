//! Change notifications raised by an observable set.
//!
//! Every membership-changing operation emits, in order:
//! 1. [`SetChange::CountChanging`] carrying the count before the change
//! 2. [`SetChange::CountChanged`] carrying the count after the change
//! 3. [`SetChange::Collection`] describing what was added and removed
//!
//! The first is sent before the set mutates and the other two after it.
//! Delivery goes through an `mpsc` queue, so a subscriber reads all three
//! once the operation has returned; the order within the queue is what
//! marks the "about to change" point.
//!
//! Operations that leave membership untouched emit nothing.

use parking_lot::RwLock;
use std::sync::mpsc::{self, Receiver, Sender};

/// Kind of membership change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetChangeAction {
    /// A single item was added.
    Add,
    /// A single item was removed.
    Remove,
    /// A batch operation added and/or removed items.
    Replace,
}

/// A notification emitted by an observable set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetChange<T> {
    /// The member count is about to change.
    CountChanging {
        /// Count before the change.
        count: usize,
    },
    /// The member count has changed.
    CountChanged {
        /// Count after the change.
        count: usize,
    },
    /// Structured record of the change.
    Collection {
        /// Kind of change.
        action: SetChangeAction,
        /// Items that became members.
        added: Vec<T>,
        /// Items that stopped being members.
        removed: Vec<T>,
    },
}

impl<T> SetChange<T> {
    /// Returns the added items if this is a collection record.
    pub fn added(&self) -> &[T] {
        match self {
            SetChange::Collection { added, .. } => added,
            _ => &[],
        }
    }

    /// Returns the removed items if this is a collection record.
    pub fn removed(&self) -> &[T] {
        match self {
            SetChange::Collection { removed, .. } => removed,
            _ => &[],
        }
    }
}

/// Distributes set notifications to subscribers.
///
/// Subscribers receive an `mpsc` receiver; dropped receivers are pruned on
/// the next emission.
pub struct SetChangeFeed<T> {
    subscribers: RwLock<Vec<Sender<SetChange<T>>>>,
}

impl<T: Clone> SetChangeFeed<T> {
    /// Creates a feed with no subscribers.
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Subscribes to future notifications.
    pub fn subscribe(&self) -> Receiver<SetChange<T>> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Returns true if at least one subscriber may be listening.
    pub fn has_subscribers(&self) -> bool {
        !self.subscribers.read().is_empty()
    }

    /// Returns the number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Emits one notification to every live subscriber.
    pub fn emit(&self, change: SetChange<T>) {
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(change.clone()).is_ok());
    }

    /// Announces a membership change. Called before the set mutates.
    pub(crate) fn emit_count_changing(&self, count: usize) {
        if self.has_subscribers() {
            self.emit(SetChange::CountChanging { count });
        }
    }

    /// Reports a completed membership change.
    pub(crate) fn emit_changed(
        &self,
        new_count: usize,
        action: SetChangeAction,
        added: Vec<T>,
        removed: Vec<T>,
    ) {
        if !self.has_subscribers() {
            return;
        }
        self.emit(SetChange::CountChanged { count: new_count });
        self.emit(SetChange::Collection {
            action,
            added,
            removed,
        });
    }
}

impl<T: Clone> Default for SetChangeFeed<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for SetChangeFeed<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SetChangeFeed")
            .field("subscribers", &self.subscribers.read().len())
            .finish()
    }
}
