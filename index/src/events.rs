//! # Change Notifications
//!
//! Progress displays want to react when the tip moves or the remote chain
//! grows, without polling. The index raises one [`PropertyChange`] per
//! observable field whose value actually changed, delivered synchronously to
//! every registered [`ChainObserver`].
//!
//! ## Delivery Rules
//!
//! - Callbacks run on the thread performing the mutation, while the store's
//!   lock is still held, after every field the mutation touches has been
//!   written and the status snapshot published.
//! - Observers are called in registration order.
//! - Writing a value equal to the current one raises nothing.
//! - An observer must not call back into the same [`HashChain`], not even an
//!   accessor. The lock is not reentrant and the call will deadlock. Every
//!   change carries its new value so there is no reason to read it back.
//!
//! [`HashChain`]: crate::chain::HashChain

use std::fmt;
use std::sync::Arc;

use crate::hash::BlockHash;

/// The observable scalar fields of the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainProperty {
    TipHeight,
    TipHash,
    ServerTipHeight,
    HashesLeft,
    HashCount,
}

impl fmt::Display for ChainProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::TipHeight => "tip_height",
            Self::TipHash => "tip_hash",
            Self::ServerTipHeight => "server_tip_height",
            Self::HashesLeft => "hashes_left",
            Self::HashCount => "hash_count",
        };
        f.write_str(name)
    }
}

/// A field changed; the payload is its new value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyChange {
    TipHeight(u64),
    TipHash(BlockHash),
    ServerTipHeight(u64),
    HashesLeft(u64),
    HashCount(usize),
}

impl PropertyChange {
    /// Which field this change belongs to.
    pub fn property(&self) -> ChainProperty {
        match self {
            Self::TipHeight(_) => ChainProperty::TipHeight,
            Self::TipHash(_) => ChainProperty::TipHash,
            Self::ServerTipHeight(_) => ChainProperty::ServerTipHeight,
            Self::HashesLeft(_) => ChainProperty::HashesLeft,
            Self::HashCount(_) => ChainProperty::HashCount,
        }
    }
}

/// Receives field-level change notifications from a [`HashChain`].
///
/// Implementations run inside the store's critical section. Keep them short
/// and never call back into the store that invoked them.
///
/// [`HashChain`]: crate::chain::HashChain
pub trait ChainObserver: Send + Sync {
    fn on_property_changed(&self, change: &PropertyChange);
}

impl<F> ChainObserver for F
where
    F: Fn(&PropertyChange) + Send + Sync,
{
    fn on_property_changed(&self, change: &PropertyChange) {
        self(change)
    }
}

/// Handle returned by `subscribe`, used to unsubscribe later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// Registered observers in subscription order.
///
/// Not synchronized on its own; the store keeps it behind the same lock as
/// the fields it reports on.
#[derive(Default)]
pub(crate) struct ObserverSet {
    next_id: u64,
    observers: Vec<(SubscriptionId, Arc<dyn ChainObserver>)>,
}

impl ObserverSet {
    pub(crate) fn insert(&mut self, observer: Arc<dyn ChainObserver>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.observers.push((id, observer));
        id
    }

    pub(crate) fn remove(&mut self, id: SubscriptionId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(existing, _)| *existing != id);
        self.observers.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.observers.len()
    }

    pub(crate) fn notify(&self, change: &PropertyChange) {
        for (_, observer) in &self.observers {
            observer.on_property_changed(change);
        }
    }
}

impl fmt::Debug for ObserverSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverSet")
            .field("observers", &self.observers.len())
            .finish()
    }
}
