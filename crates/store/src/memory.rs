//! In-memory ordered store with snapshot-isolated transactions.
//!
//! The committed state is a sorted map behind an atomic pointer swap.
//! Transactions capture the current map as their snapshot and buffer writes
//! in a tombstone-aware overlay; commit applies the overlay to the current
//! committed map under a write lock and swaps the pointer. Readers never
//! block writers.
//!
//! Iterators merge the snapshot with the overlay by re-anchoring on the
//! current key at every step, so a scan stays coherent while the same
//! transaction inserts or deletes entries under it.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::ops::Bound;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::comparator::{BytewiseComparator, KeyComparator};
use crate::error::Result;
use crate::traits::{OrderedStore, StoreIterator, StoreRead, StoreTransaction};

/// An encoded key ordered through the store's comparator.
struct ByteKey<C> {
    bytes: Vec<u8>,
    _comparator: PhantomData<fn() -> C>,
}

impl<C> ByteKey<C> {
    fn new(bytes: Vec<u8>) -> Self {
        Self { bytes, _comparator: PhantomData }
    }

    fn from_slice(bytes: &[u8]) -> Self {
        Self::new(bytes.to_vec())
    }
}

impl<C> Clone for ByteKey<C> {
    fn clone(&self) -> Self {
        Self::new(self.bytes.clone())
    }
}

impl<C> fmt::Debug for ByteKey<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ByteKey").field(&self.bytes).finish()
    }
}

impl<C: KeyComparator> PartialEq for ByteKey<C> {
    fn eq(&self, other: &Self) -> bool {
        C::compare(&self.bytes, &other.bytes) == Ordering::Equal
    }
}

impl<C: KeyComparator> Eq for ByteKey<C> {}

impl<C: KeyComparator> PartialOrd for ByteKey<C> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<C: KeyComparator> Ord for ByteKey<C> {
    fn cmp(&self, other: &Self) -> Ordering {
        C::compare(&self.bytes, &other.bytes)
    }
}

type Map<C> = BTreeMap<ByteKey<C>, Arc<[u8]>>;
type Overlay<C> = BTreeMap<ByteKey<C>, Option<Arc<[u8]>>>;

struct StoreShared<C: KeyComparator> {
    /// Current committed state, atomically swapped on commit.
    committed: ArcSwap<Map<C>>,
    /// Serializes commits so overlay application is atomic.
    write_lock: Mutex<()>,
}

/// In-memory ordered store.
///
/// Cloning is cheap and yields another handle to the same store.
pub struct MemoryStore<C: KeyComparator = BytewiseComparator> {
    shared: Arc<StoreShared<C>>,
}

impl<C: KeyComparator> MemoryStore<C> {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(StoreShared {
                committed: ArcSwap::from_pointee(Map::<C>::new()),
                write_lock: Mutex::new(()),
            }),
        }
    }

    /// Number of committed entries.
    pub fn len(&self) -> usize {
        self.shared.committed.load().len()
    }

    /// Whether the committed state is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<C: KeyComparator> Default for MemoryStore<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: KeyComparator> Clone for MemoryStore<C> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

impl<C: KeyComparator> StoreRead for MemoryStore<C> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let map = self.shared.committed.load();
        Ok(map.get(&ByteKey::from_slice(key)).map(|value| value.to_vec()))
    }
}

impl<C: KeyComparator> OrderedStore for MemoryStore<C> {
    type Transaction = MemoryTransaction<C>;
    type Iter = MemoryIterator<C>;

    fn begin_transaction(&self) -> MemoryTransaction<C> {
        MemoryTransaction {
            shared: Arc::new(TxnShared {
                snapshot: self.shared.committed.load_full(),
                overlay: Mutex::new(BTreeMap::new()),
                store: Arc::clone(&self.shared),
            }),
        }
    }

    fn iterator(&self) -> MemoryIterator<C> {
        MemoryIterator {
            snapshot: self.shared.committed.load_full(),
            txn: None,
            current: None,
        }
    }
}

struct TxnShared<C: KeyComparator> {
    /// Committed state as of transaction begin.
    snapshot: Arc<Map<C>>,
    /// Buffered writes; `None` is a tombstone.
    overlay: Mutex<Overlay<C>>,
    store: Arc<StoreShared<C>>,
}

/// A transaction over a [`MemoryStore`].
///
/// Reads see the snapshot taken at begin plus this transaction's own writes.
pub struct MemoryTransaction<C: KeyComparator = BytewiseComparator> {
    shared: Arc<TxnShared<C>>,
}

impl<C: KeyComparator> StoreRead for MemoryTransaction<C> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let probe = ByteKey::from_slice(key);
        if let Some(slot) = self.shared.overlay.lock().get(&probe) {
            return Ok(slot.as_ref().map(|value| value.to_vec()));
        }
        Ok(self.shared.snapshot.get(&probe).map(|value| value.to_vec()))
    }
}

impl<C: KeyComparator> StoreTransaction for MemoryTransaction<C> {
    type Iter = MemoryIterator<C>;

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.shared.overlay.lock().insert(ByteKey::from_slice(key), Some(Arc::from(value)));
        Ok(())
    }

    fn remove(&self, key: &[u8]) -> Result<()> {
        self.shared.overlay.lock().insert(ByteKey::from_slice(key), None);
        Ok(())
    }

    fn iterator(&self) -> MemoryIterator<C> {
        MemoryIterator {
            snapshot: Arc::clone(&self.shared.snapshot),
            txn: Some(Arc::clone(&self.shared)),
            current: None,
        }
    }

    fn commit(self) -> Result<()> {
        let shared = self.shared;
        let _guard = shared.store.write_lock.lock();
        let mut next = (**shared.store.committed.load()).clone();
        for (key, slot) in shared.overlay.lock().iter() {
            match slot {
                Some(value) => {
                    next.insert(key.clone(), Arc::clone(value));
                }
                None => {
                    next.remove(key);
                }
            }
        }
        shared.store.committed.store(Arc::new(next));
        Ok(())
    }

    fn rollback(self) {}
}

/// Iterator over a [`MemoryStore`] snapshot, optionally merged with a
/// transaction's buffered writes.
pub struct MemoryIterator<C: KeyComparator = BytewiseComparator> {
    snapshot: Arc<Map<C>>,
    txn: Option<Arc<TxnShared<C>>>,
    current: Option<(Vec<u8>, Arc<[u8]>)>,
}

fn to_key_bound<C: KeyComparator>(bound: Bound<Vec<u8>>) -> Bound<ByteKey<C>> {
    match bound {
        Bound::Included(bytes) => Bound::Included(ByteKey::new(bytes)),
        Bound::Excluded(bytes) => Bound::Excluded(ByteKey::new(bytes)),
        Bound::Unbounded => Bound::Unbounded,
    }
}

impl<C: KeyComparator> MemoryIterator<C> {
    fn snapshot_next(&self, from: &Bound<ByteKey<C>>) -> Option<(Vec<u8>, Arc<[u8]>)> {
        self.snapshot
            .range((from.clone(), Bound::Unbounded))
            .next()
            .map(|(key, value)| (key.bytes.clone(), Arc::clone(value)))
    }

    fn snapshot_prev(&self, to: &Bound<ByteKey<C>>) -> Option<(Vec<u8>, Arc<[u8]>)> {
        self.snapshot
            .range((Bound::Unbounded, to.clone()))
            .next_back()
            .map(|(key, value)| (key.bytes.clone(), Arc::clone(value)))
    }

    fn overlay_next(&self, from: &Bound<ByteKey<C>>) -> Option<(Vec<u8>, Option<Arc<[u8]>>)> {
        let txn = self.txn.as_ref()?;
        let overlay = txn.overlay.lock();
        overlay
            .range((from.clone(), Bound::Unbounded))
            .next()
            .map(|(key, slot)| (key.bytes.clone(), slot.clone()))
    }

    fn overlay_prev(&self, to: &Bound<ByteKey<C>>) -> Option<(Vec<u8>, Option<Arc<[u8]>>)> {
        let txn = self.txn.as_ref()?;
        let overlay = txn.overlay.lock();
        overlay
            .range((Bound::Unbounded, to.clone()))
            .next_back()
            .map(|(key, slot)| (key.bytes.clone(), slot.clone()))
    }

    /// Smallest live entry with key inside `start`, skipping tombstones.
    fn merged_next(&self, start: Bound<Vec<u8>>) -> Option<(Vec<u8>, Arc<[u8]>)> {
        let mut from = to_key_bound(start);
        loop {
            let snap = self.snapshot_next(&from);
            let over = self.overlay_next(&from);
            match (snap, over) {
                (None, None) => return None,
                (Some(entry), None) => return Some(entry),
                (None, Some((key, Some(value)))) => return Some((key, value)),
                (None, Some((key, None))) => from = Bound::Excluded(ByteKey::new(key)),
                (Some((snap_key, snap_value)), Some((over_key, slot))) => {
                    // On a tie the overlay shadows the snapshot.
                    match C::compare(&over_key, &snap_key) {
                        Ordering::Greater => return Some((snap_key, snap_value)),
                        _ => match slot {
                            Some(value) => return Some((over_key, value)),
                            None => from = Bound::Excluded(ByteKey::new(over_key)),
                        },
                    }
                }
            }
        }
    }

    /// Largest live entry with key inside `end`, skipping tombstones.
    fn merged_prev(&self, end: Bound<Vec<u8>>) -> Option<(Vec<u8>, Arc<[u8]>)> {
        let mut to = to_key_bound(end);
        loop {
            let snap = self.snapshot_prev(&to);
            let over = self.overlay_prev(&to);
            match (snap, over) {
                (None, None) => return None,
                (Some(entry), None) => return Some(entry),
                (None, Some((key, Some(value)))) => return Some((key, value)),
                (None, Some((key, None))) => to = Bound::Excluded(ByteKey::new(key)),
                (Some((snap_key, snap_value)), Some((over_key, slot))) => {
                    match C::compare(&over_key, &snap_key) {
                        Ordering::Less => return Some((snap_key, snap_value)),
                        _ => match slot {
                            Some(value) => return Some((over_key, value)),
                            None => to = Bound::Excluded(ByteKey::new(over_key)),
                        },
                    }
                }
            }
        }
    }
}

impl<C: KeyComparator> StoreIterator for MemoryIterator<C> {
    fn seek(&mut self, target: &[u8]) {
        self.current = self.merged_next(Bound::Included(target.to_vec()));
    }

    fn seek_to_last(&mut self) {
        self.current = self.merged_prev(Bound::Unbounded);
    }

    fn next(&mut self) {
        self.current = match self.current.take() {
            Some((key, _)) => self.merged_next(Bound::Excluded(key)),
            None => self.merged_next(Bound::Unbounded),
        };
    }

    fn prev(&mut self) {
        self.current = match self.current.take() {
            Some((key, _)) => self.merged_prev(Bound::Excluded(key)),
            None => self.merged_prev(Bound::Unbounded),
        };
    }

    fn is_valid(&self) -> bool {
        self.current.is_some()
    }

    fn key(&self) -> &[u8] {
        self.current.as_ref().map(|(key, _)| key.as_slice()).unwrap_or(&[])
    }

    fn value(&self) -> &[u8] {
        self.current.as_ref().map(|(_, value)| value.as_ref()).unwrap_or(&[])
    }
}
