//! Collaborator contract: ordered store, transactions, iterators, factory.
//!
//! The object/index layer is generic over these traits so its encoding and
//! cursor logic stays engine-agnostic and testable against the in-memory
//! engine in [`crate::memory`].

use crate::error::Result;

/// Point reads against a store or a transaction.
pub trait StoreRead {
    /// Looks up a key. An absent key is `Ok(None)`, never an error.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;
}

/// A positioned iterator over the keyspace.
///
/// `key`/`value` return empty slices while the iterator is unpositioned;
/// callers check [`StoreIterator::is_valid`] first. Stepping an unpositioned
/// iterator enters the keyspace from the corresponding end: `next` lands on
/// the first entry, `prev` on the last. Reverse scans that run off the front
/// rely on this to switch direction without re-seeking.
pub trait StoreIterator {
    /// Positions at the first entry with key >= `target`.
    fn seek(&mut self, target: &[u8]);

    /// Positions at the last entry in the keyspace.
    fn seek_to_last(&mut self);

    /// Steps to the next entry in ascending order.
    fn next(&mut self);

    /// Steps to the previous entry in descending order.
    fn prev(&mut self);

    /// Whether the iterator is positioned on an entry.
    fn is_valid(&self) -> bool;

    /// Key at the current position.
    fn key(&self) -> &[u8];

    /// Value at the current position.
    fn value(&self) -> &[u8];
}

/// A transaction with read-your-writes semantics over a snapshot.
///
/// Mutation goes through `&self`: iterators opened from the same transaction
/// observe writes and deletes performed mid-scan, which the object/index
/// layer relies on when it repairs stale index entries during iteration.
pub trait StoreTransaction: StoreRead {
    /// Iterator type produced by [`StoreTransaction::iterator`].
    type Iter: StoreIterator;

    /// Buffers a write.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Buffers a delete.
    fn remove(&self, key: &[u8]) -> Result<()>;

    /// Opens an iterator over the snapshot merged with buffered writes.
    fn iterator(&self) -> Self::Iter;

    /// Atomically applies all buffered writes.
    fn commit(self) -> Result<()>;

    /// Discards all buffered writes.
    fn rollback(self);
}

/// An ordered byte-keyed store.
pub trait OrderedStore: StoreRead {
    /// Transaction type produced by [`OrderedStore::begin_transaction`].
    type Transaction: StoreTransaction;

    /// Iterator type over committed state.
    type Iter: StoreIterator;

    /// Begins a transaction snapshotting the current committed state.
    fn begin_transaction(&self) -> Self::Transaction;

    /// Opens a read-only iterator over committed state.
    fn iterator(&self) -> Self::Iter;
}

/// Opens and destroys named stores.
///
/// The destroy-then-reopen recovery path of the object/index layer drives
/// this seam.
pub trait StoreFactory {
    /// Store type this factory produces.
    type Store: OrderedStore;

    /// Opens (or creates) the named store.
    fn open(&self, name: &str) -> Result<Self::Store>;

    /// Destroys the named store and all of its data.
    fn destroy(&self, name: &str) -> Result<()>;
}
