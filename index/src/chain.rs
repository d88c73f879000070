//! # Chain Index Store
//!
//! `HashChain` is the shared, mutable picture of the chain a light client
//! has synced so far: an ordered `height → hash` map plus five scalars
//! derived from it and from the remote server's reported height.
//!
//! ## Tip Semantics
//!
//! The tip is whatever the last mutation said it is. `add_or_replace` moves
//! the tip to its own arguments, even when that height is below the highest
//! key in the map. Reorg handlers rely on this: they rewind with
//! `remove_last` and replay the competing branch from its fork point, and the
//! tip follows each replayed header. Only `remove_last` derives the tip from
//! the map.
//!
//! ## Emptying the Index
//!
//! When `remove_last` takes out the final entry there is no entry left to
//! become the tip. The tip height and hash keep their previous values, the
//! hash count drops to zero, and a warning is logged. Callers that need to
//! know should check `is_empty()`.
//!
//! ## Locking
//!
//! One `parking_lot::Mutex` guards the map, the scalars and the observer
//! list. Every method holds it for its full duration and releases it through
//! the guard's `Drop`, so an early return or a panicking observer cannot leak
//! it. `parking_lot` does not poison, so the store stays usable after such a
//! panic.
//!
//! A mutation writes every field and publishes its snapshot before any
//! observer runs. An observer that panics therefore never leaves the scalars
//! out of step with the map.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use crate::events::{ChainObserver, ObserverSet, PropertyChange, SubscriptionId};
use crate::hash::BlockHash;
use crate::status::ChainStatus;

// ---------------------------------------------------------------------------
// ChainState
// ---------------------------------------------------------------------------

/// Everything behind the lock.
#[derive(Debug, Default)]
struct ChainState {
    chain: BTreeMap<u64, BlockHash>,
    tip_height: u64,
    tip_hash: BlockHash,
    server_tip_height: u64,
    hashes_left: u64,
    hash_count: usize,
    observers: ObserverSet,
    /// Changes written by the current mutation, delivered once every field
    /// is consistent.
    pending: Vec<PropertyChange>,
}

/// Writes `value` into `slot` and queues a change if it differs from what
/// was there.
fn assign<T: Copy + PartialEq>(
    slot: &mut T,
    value: T,
    pending: &mut Vec<PropertyChange>,
    change: fn(T) -> PropertyChange,
) {
    if *slot != value {
        *slot = value;
        pending.push(change(value));
    }
}

impl ChainState {
    fn set_tip(&mut self, height: u64, hash: BlockHash) {
        assign(&mut self.tip_height, height, &mut self.pending, PropertyChange::TipHeight);
        assign(&mut self.tip_hash, hash, &mut self.pending, PropertyChange::TipHash);
    }

    fn set_server_tip_height(&mut self, height: u64) {
        assign(
            &mut self.server_tip_height,
            height,
            &mut self.pending,
            PropertyChange::ServerTipHeight,
        );
    }

    fn sync_hash_count(&mut self) {
        let count = self.chain.len();
        assign(&mut self.hash_count, count, &mut self.pending, PropertyChange::HashCount);
    }

    fn refresh_hashes_left(&mut self) {
        let left = self.server_tip_height.saturating_sub(self.tip_height);
        assign(&mut self.hashes_left, left, &mut self.pending, PropertyChange::HashesLeft);
    }

    fn snapshot(&self) -> ChainStatus {
        ChainStatus {
            tip_height: self.tip_height,
            tip_hash: self.tip_hash,
            server_tip_height: self.server_tip_height,
            hashes_left: self.hashes_left,
            hash_count: self.hash_count,
        }
    }
}

// ---------------------------------------------------------------------------
// HashChain
// ---------------------------------------------------------------------------

/// Thread-safe `height → hash` index with tip and sync-progress tracking.
///
/// Share it through an `Arc`; every method takes `&self`. Operations are
/// linearizable: each one runs start to finish under a single lock.
pub struct HashChain {
    state: Mutex<ChainState>,
    status_tx: watch::Sender<ChainStatus>,
}

impl Default for HashChain {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HashChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashChain")
            .field("status", &self.status())
            .finish()
    }
}

impl HashChain {
    /// Creates an empty index. All heights and counters start at zero and
    /// the tip hash is [`BlockHash::ZERO`].
    pub fn new() -> Self {
        let (status_tx, _) = watch::channel(ChainStatus::default());
        Self {
            state: Mutex::new(ChainState::default()),
            status_tx,
        }
    }

    // -- Mutations ----------------------------------------------------------

    /// Stores `hash` at `height`, overwriting any existing entry, and makes
    /// the pair the new tip.
    ///
    /// The tip is taken from the arguments, not from the map's highest key.
    /// Returns the hash previously stored at `height`, if there was one.
    pub fn add_or_replace(&self, height: u64, hash: BlockHash) -> Option<BlockHash> {
        let mut state = self.state.lock();
        let previous = state.chain.insert(height, hash);

        match previous {
            Some(old) if old != hash => {
                debug!(height, old = %old, new = %hash, "replaced hash at existing height");
            }
            Some(_) => {}
            None => trace!(height, hash = %hash, "added hash"),
        }

        state.set_tip(height, hash);
        state.sync_hash_count();
        state.refresh_hashes_left();
        self.commit(&mut state);
        previous
    }

    /// Removes the highest entry and moves the tip to the new highest one.
    ///
    /// Returns the removed `(height, hash)`, or `None` if the index was
    /// already empty (in which case nothing changes). Removing the very last
    /// entry leaves the tip fields untouched; see the module docs.
    pub fn remove_last(&self) -> Option<(u64, BlockHash)> {
        let mut state = self.state.lock();
        let (height, hash) = state.chain.pop_last()?;

        match state.chain.last_key_value().map(|(h, v)| (*h, *v)) {
            Some((tip_height, tip_hash)) => {
                debug!(removed = height, tip_height, "removed last hash");
                state.set_tip(tip_height, tip_hash);
            }
            None => {
                warn!(
                    removed = height,
                    tip_height = state.tip_height,
                    "removed the only remaining hash; tip left unchanged"
                );
            }
        }

        state.sync_hash_count();
        state.refresh_hashes_left();
        self.commit(&mut state);
        Some((height, hash))
    }

    /// Records the best height the remote server knows about.
    pub fn update_server_tip_height(&self, height: u64) {
        let mut state = self.state.lock();
        if state.server_tip_height != height {
            debug!(
                previous = state.server_tip_height,
                height, "server tip height updated"
            );
        }
        state.set_server_tip_height(height);
        state.refresh_hashes_left();
        self.commit(&mut state);
    }

    // -- Reads --------------------------------------------------------------

    /// Copies every entry out in ascending height order.
    ///
    /// The returned vector is independent of the index; later mutations do
    /// not affect it.
    pub fn get_chain(&self) -> Vec<(u64, BlockHash)> {
        let state = self.state.lock();
        state.chain.iter().map(|(h, v)| (*h, *v)).collect()
    }

    /// Finds the lowest height whose hash equals `hash`.
    ///
    /// This is a linear scan. Callers doing many reverse lookups should keep
    /// their own `hash → height` map.
    pub fn try_get_height(&self, hash: &BlockHash) -> Option<u64> {
        let state = self.state.lock();
        state
            .chain
            .iter()
            .find(|(_, stored)| *stored == hash)
            .map(|(height, _)| *height)
    }

    /// Hash stored at `height`, if any.
    pub fn hash_at(&self, height: u64) -> Option<BlockHash> {
        self.state.lock().chain.get(&height).copied()
    }

    /// Height of the current tip. Zero until the first header arrives.
    pub fn tip_height(&self) -> u64 {
        self.state.lock().tip_height
    }

    /// Hash paired with [`tip_height`](Self::tip_height).
    pub fn tip_hash(&self) -> BlockHash {
        self.state.lock().tip_hash
    }

    /// Best height the remote server has reported. Zero means unknown.
    pub fn server_tip_height(&self) -> u64 {
        self.state.lock().server_tip_height
    }

    /// Headers still missing before the tip reaches the server tip.
    pub fn hashes_left(&self) -> u64 {
        self.state.lock().hashes_left
    }

    /// Number of entries in the index.
    pub fn hash_count(&self) -> usize {
        self.state.lock().hash_count
    }

    /// `true` when no entries are stored. The tip fields may still hold
    /// the last removed header.
    pub fn is_empty(&self) -> bool {
        self.state.lock().chain.is_empty()
    }

    /// All five scalars, read together.
    pub fn status(&self) -> ChainStatus {
        self.state.lock().snapshot()
    }

    // -- Notifications ------------------------------------------------------

    /// Registers an observer for field-level changes.
    ///
    /// The observer runs inside the store's lock and must not call any
    /// method on this `HashChain`. See [`crate::events`].
    pub fn subscribe<O>(&self, observer: O) -> SubscriptionId
    where
        O: ChainObserver + 'static,
    {
        self.state.lock().observers.insert(Arc::new(observer))
    }

    /// Removes a previously registered observer. Returns `false` if the id
    /// was unknown or already removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.state.lock().observers.remove(id)
    }

    pub fn observer_count(&self) -> usize {
        self.state.lock().observers.len()
    }

    /// Receiver that sees a fresh [`ChainStatus`] after every mutation that
    /// changed at least one scalar.
    ///
    /// Unlike observers, receivers run outside the lock and may freely call
    /// back into the store.
    pub fn watch_status(&self) -> watch::Receiver<ChainStatus> {
        self.status_tx.subscribe()
    }

    /// Ends a mutation: publishes the snapshot to watch receivers, then
    /// hands the queued changes to observers.
    ///
    /// Runs with the lock held and only after every field has been written,
    /// so a panicking observer cannot leave the scalars out of step with the
    /// map.
    fn commit(&self, state: &mut ChainState) {
        let status = state.snapshot();
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });

        let changes = std::mem::take(&mut state.pending);
        for change in &changes {
            state.observers.notify(change);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ChainProperty;

    fn h(byte: u8) -> BlockHash {
        BlockHash::from_bytes([byte; 32])
    }

    /// Subscribes a recorder and returns the shared log it appends to.
    fn record(chain: &HashChain) -> Arc<Mutex<Vec<PropertyChange>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        chain.subscribe(move |change: &PropertyChange| sink.lock().push(*change));
        log
    }

    fn properties(log: &Mutex<Vec<PropertyChange>>) -> Vec<ChainProperty> {
        log.lock().iter().map(PropertyChange::property).collect()
    }

    // -- 1. new_chain_is_empty ----------------------------------------------

    #[test]
    fn new_chain_is_empty() {
        let chain = HashChain::new();
        assert!(chain.is_empty());
        assert_eq!(chain.tip_height(), 0);
        assert_eq!(chain.tip_hash(), BlockHash::ZERO);
        assert_eq!(chain.server_tip_height(), 0);
        assert_eq!(chain.hashes_left(), 0);
        assert_eq!(chain.hash_count(), 0);
        assert!(chain.get_chain().is_empty());
        assert_eq!(chain.status(), ChainStatus::default());
    }

    // -- 2. add_sets_tip_and_count ------------------------------------------

    #[test]
    fn add_sets_tip_and_count() {
        let chain = HashChain::new();
        for height in 0..5u64 {
            assert_eq!(chain.add_or_replace(height, h(height as u8 + 1)), None);
            assert_eq!(chain.tip_height(), height);
            assert_eq!(chain.tip_hash(), h(height as u8 + 1));
            assert_eq!(chain.hash_count(), height as usize + 1);
        }
    }

    // -- 3. replace_overwrites_and_returns_previous -------------------------

    #[test]
    fn replace_overwrites_and_returns_previous() {
        let chain = HashChain::new();
        chain.add_or_replace(0, h(1));
        chain.add_or_replace(1, h(2));

        assert_eq!(chain.add_or_replace(1, h(9)), Some(h(2)));
        assert_eq!(chain.hash_count(), 2);
        assert_eq!(chain.hash_at(1), Some(h(9)));
        assert_eq!(chain.tip_hash(), h(9));
    }

    // -- 4. tip_follows_arguments_not_max_key -------------------------------

    #[test]
    fn tip_follows_arguments_not_max_key() {
        let chain = HashChain::new();
        chain.add_or_replace(0, h(1));
        chain.add_or_replace(1, h(2));
        chain.add_or_replace(2, h(3));

        chain.add_or_replace(1, h(7));

        assert_eq!(chain.tip_height(), 1);
        assert_eq!(chain.tip_hash(), h(7));
        // The map still holds height 2.
        assert_eq!(chain.hash_at(2), Some(h(3)));
        assert_eq!(chain.hash_count(), 3);
    }

    // -- 5. remove_last_scenario --------------------------------------------

    #[test]
    fn remove_last_scenario() {
        let chain = HashChain::new();
        chain.add_or_replace(0, h(0xA));
        chain.add_or_replace(1, h(0xB));
        chain.add_or_replace(2, h(0xC));

        assert_eq!(chain.remove_last(), Some((2, h(0xC))));

        assert_eq!(chain.get_chain(), vec![(0, h(0xA)), (1, h(0xB))]);
        assert_eq!(chain.tip_height(), 1);
        assert_eq!(chain.tip_hash(), h(0xB));
        assert_eq!(chain.hash_count(), 2);

        chain.update_server_tip_height(10);
        assert_eq!(chain.hashes_left(), 9);
    }

    // -- 6. remove_last_on_empty_is_noop ------------------------------------

    #[test]
    fn remove_last_on_empty_is_noop() {
        let chain = HashChain::new();
        let log = record(&chain);

        assert_eq!(chain.remove_last(), None);
        assert_eq!(chain.status(), ChainStatus::default());
        assert!(log.lock().is_empty());
    }

    // -- 7. removing_only_entry_keeps_tip -----------------------------------

    #[test]
    fn removing_only_entry_keeps_tip() {
        let chain = HashChain::new();
        chain.update_server_tip_height(10);
        chain.add_or_replace(4, h(4));
        let log = record(&chain);

        assert_eq!(chain.remove_last(), Some((4, h(4))));

        assert!(chain.is_empty());
        assert_eq!(chain.hash_count(), 0);
        assert_eq!(chain.tip_height(), 4);
        assert_eq!(chain.tip_hash(), h(4));
        assert_eq!(chain.hashes_left(), 6);
        assert_eq!(*log.lock(), vec![PropertyChange::HashCount(0)]);

        // Still usable afterwards.
        chain.add_or_replace(0, h(1));
        assert_eq!(chain.tip_height(), 0);
        assert_eq!(chain.hashes_left(), 10);
    }

    // -- 8. remove_last_uses_max_key_not_tip --------------------------------

    #[test]
    fn remove_last_uses_max_key_not_tip() {
        let chain = HashChain::new();
        chain.add_or_replace(0, h(1));
        chain.add_or_replace(5, h(2));
        chain.add_or_replace(3, h(3)); // tip is now 3, max key is 5

        assert_eq!(chain.remove_last(), Some((5, h(2))));
        assert_eq!(chain.tip_height(), 3);
        assert_eq!(chain.tip_hash(), h(3));
    }

    // -- 9. hashes_left_never_negative --------------------------------------

    #[test]
    fn hashes_left_never_negative() {
        let chain = HashChain::new();
        chain.update_server_tip_height(3);
        for height in 0..6u64 {
            chain.add_or_replace(height, h(height as u8));
            let status = chain.status();
            assert_eq!(
                status.hashes_left,
                status.server_tip_height.saturating_sub(status.tip_height)
            );
        }
        assert_eq!(chain.hashes_left(), 0);

        chain.update_server_tip_height(0);
        assert_eq!(chain.hashes_left(), 0);

        chain.update_server_tip_height(20);
        assert_eq!(chain.hashes_left(), 15);
    }

    // -- 10. get_chain_is_sorted_snapshot -----------------------------------

    #[test]
    fn get_chain_is_sorted_snapshot() {
        let chain = HashChain::new();
        for height in [7u64, 2, 9, 0, 4, 2] {
            chain.add_or_replace(height, h(height as u8));
        }

        let snapshot = chain.get_chain();
        let heights: Vec<u64> = snapshot.iter().map(|(height, _)| *height).collect();
        assert_eq!(heights, vec![0, 2, 4, 7, 9]);

        chain.add_or_replace(10, h(10));
        chain.remove_last();
        chain.remove_last();
        assert_eq!(snapshot.len(), 5);
        assert_eq!(snapshot.last(), Some(&(9, h(9))));
    }

    // -- 11. try_get_height_distinguishes_genesis ---------------------------

    #[test]
    fn try_get_height_distinguishes_genesis() {
        let chain = HashChain::new();
        chain.add_or_replace(0, h(1));

        assert_eq!(chain.try_get_height(&h(1)), Some(0));
        assert_eq!(chain.try_get_height(&h(2)), None);
        assert_eq!(HashChain::new().try_get_height(&BlockHash::ZERO), None);
    }

    // -- 12. try_get_height_returns_lowest_match ----------------------------

    #[test]
    fn try_get_height_returns_lowest_match() {
        let chain = HashChain::new();
        chain.add_or_replace(8, h(5));
        chain.add_or_replace(3, h(5));
        chain.add_or_replace(1, h(6));

        assert_eq!(chain.try_get_height(&h(5)), Some(3));
        assert_eq!(chain.try_get_height(&h(6)), Some(1));
    }

    // -- 13. add_notifies_in_field_order ------------------------------------

    #[test]
    fn add_notifies_in_field_order() {
        let chain = HashChain::new();
        chain.update_server_tip_height(10);
        let log = record(&chain);

        chain.add_or_replace(1, h(1));

        assert_eq!(
            *log.lock(),
            vec![
                PropertyChange::TipHeight(1),
                PropertyChange::TipHash(h(1)),
                PropertyChange::HashCount(1),
                PropertyChange::HashesLeft(9),
            ]
        );
    }

    // -- 14. add_only_notifies_changed_fields -------------------------------

    #[test]
    fn add_only_notifies_changed_fields() {
        let chain = HashChain::new();
        let log = record(&chain);

        // Height 0 equals the initial tip height, so only hash and count move.
        chain.add_or_replace(0, h(1));
        assert_eq!(
            properties(&log),
            vec![ChainProperty::TipHash, ChainProperty::HashCount]
        );
    }

    // -- 15. repeated_add_is_idempotent -------------------------------------

    #[test]
    fn repeated_add_is_idempotent() {
        let chain = HashChain::new();
        chain.update_server_tip_height(5);
        chain.add_or_replace(2, h(2));
        let before = chain.status();
        let log = record(&chain);

        assert_eq!(chain.add_or_replace(2, h(2)), Some(h(2)));

        assert_eq!(chain.status(), before);
        assert_eq!(chain.get_chain(), vec![(2, h(2))]);
        assert!(log.lock().is_empty());
    }

    // -- 16. server_tip_notifications ---------------------------------------

    #[test]
    fn server_tip_notifications() {
        let chain = HashChain::new();
        chain.add_or_replace(4, h(4));
        let log = record(&chain);

        chain.update_server_tip_height(10);
        chain.update_server_tip_height(10);
        chain.update_server_tip_height(3);

        assert_eq!(
            *log.lock(),
            vec![
                PropertyChange::ServerTipHeight(10),
                PropertyChange::HashesLeft(6),
                PropertyChange::ServerTipHeight(3),
                PropertyChange::HashesLeft(0),
            ]
        );
    }

    // -- 17. remove_last_notifications --------------------------------------

    #[test]
    fn remove_last_notifications() {
        let chain = HashChain::new();
        chain.update_server_tip_height(10);
        chain.add_or_replace(0, h(1));
        chain.add_or_replace(1, h(2));
        let log = record(&chain);

        chain.remove_last();

        assert_eq!(
            *log.lock(),
            vec![
                PropertyChange::TipHeight(0),
                PropertyChange::TipHash(h(1)),
                PropertyChange::HashCount(1),
                PropertyChange::HashesLeft(10),
            ]
        );
    }

    // -- 18. unsubscribe_stops_delivery -------------------------------------

    #[test]
    fn unsubscribe_stops_delivery() {
        let chain = HashChain::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let id = chain.subscribe(move |change: &PropertyChange| sink.lock().push(*change));
        assert_eq!(chain.observer_count(), 1);

        chain.add_or_replace(1, h(1));
        let delivered = log.lock().len();
        assert!(chain.unsubscribe(id));
        assert!(!chain.unsubscribe(id));
        chain.add_or_replace(2, h(2));

        assert_eq!(log.lock().len(), delivered);
        assert_eq!(chain.observer_count(), 0);
    }

    // -- 19. observer_panic_leaves_store_consistent --------------------------

    #[test]
    fn observer_panic_leaves_store_consistent() {
        let chain = Arc::new(HashChain::new());
        let id = chain.subscribe(|change: &PropertyChange| {
            if let PropertyChange::TipHeight(7) = change {
                panic!("observer failure");
            }
        });

        let worker = Arc::clone(&chain);
        let result = std::thread::spawn(move || worker.add_or_replace(7, h(7))).join();
        assert!(result.is_err());

        // Every field was written before the observer ran.
        let status = chain.status();
        assert_eq!(status.tip_height, 7);
        assert_eq!(status.tip_hash, h(7));
        assert_eq!(status.hash_count, chain.get_chain().len());
        assert_eq!(chain.watch_status().borrow().clone(), status);

        // The lock was released during unwinding.
        assert!(chain.unsubscribe(id));
        chain.add_or_replace(8, h(8));
        assert_eq!(chain.tip_height(), 8);
    }

    // -- 20. watch_sees_latest_status ---------------------------------------

    #[test]
    fn watch_sees_latest_status() {
        let chain = HashChain::new();
        let mut rx = chain.watch_status();
        assert!(!rx.has_changed().unwrap());

        chain.add_or_replace(0, h(1));
        chain.update_server_tip_height(4);

        assert!(rx.has_changed().unwrap());
        let seen = rx.borrow_and_update().clone();
        assert_eq!(seen, chain.status());
        assert_eq!(seen.hashes_left, 4);

        // No-op writes publish nothing.
        chain.update_server_tip_height(4);
        chain.add_or_replace(0, h(1));
        assert!(!rx.has_changed().unwrap());
    }

    // -- 21. debug_shows_status ---------------------------------------------

    #[test]
    fn debug_shows_status() {
        let chain = HashChain::new();
        chain.add_or_replace(3, h(3));
        let shown = format!("{:?}", chain);
        assert!(shown.contains("HashChain"));
        assert!(shown.contains("tip_height: 3"));
    }
}
