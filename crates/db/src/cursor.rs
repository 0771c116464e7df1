//! Bounded, directional cursors over the record and index keyspaces.
//!
//! One engine drives all four cursor shapes. The shape-specific parts,
//! which keyspace a logical key encodes into and how a raw row decodes,
//! live behind the [`RowCodec`] strategy, so the state machine is written
//! once: seek to the range edge, step, check bounds, load, and apply the
//! duplicate-skipping rules.
//!
//! The one non-obvious rule is reverse iteration with duplicate skipping:
//! each distinct key must yield its first entry in *forward* order. The
//! engine scans backwards tracking the current duplicate run and, once the
//! run's start is crossed (by key change, range edge, or the front of the
//! keyspace), walks forward again to land on the run's canonical first
//! entry.

use std::cmp::Ordering;
use std::marker::PhantomData;
use std::sync::Arc;

use strata_store::{StoreIterator, StoreRead, StoreTransaction};

use crate::key::Key;
use crate::keys::{self, IndexDataKey, ObjectStoreDataKey};
use crate::metadata::RecordIdentifier;
use crate::observe::{ErrorClass, ErrorSite, Observer};

/// Iteration direction and duplicate handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorDirection {
    /// Ascending, every entry.
    Next,
    /// Ascending, first entry of each distinct key.
    NextNoDuplicate,
    /// Descending, every entry.
    Prev,
    /// Descending, yielding the forward-order first entry of each distinct
    /// key.
    PrevNoDuplicate,
}

impl CursorDirection {
    fn forward(self) -> bool {
        matches!(self, Self::Next | Self::NextNoDuplicate)
    }

    fn unique(self) -> bool {
        matches!(self, Self::NextNoDuplicate | Self::PrevNoDuplicate)
    }
}

/// Logical key range with optional open bounds.
#[derive(Debug, Clone, Default)]
pub struct KeyRange {
    /// Lower bound, if any.
    pub lower: Option<Key>,
    /// Upper bound, if any.
    pub upper: Option<Key>,
    /// Whether the lower bound is excluded.
    pub lower_open: bool,
    /// Whether the upper bound is excluded.
    pub upper_open: bool,
}

impl KeyRange {
    /// The unbounded range.
    pub fn all() -> Self {
        Self::default()
    }

    /// Range between two keys with the given openness.
    pub fn bound(lower: Key, upper: Key, lower_open: bool, upper_open: bool) -> Self {
        Self { lower: Some(lower), upper: Some(upper), lower_open, upper_open }
    }

    /// Range from `lower` upwards.
    pub fn lower_bound(lower: Key, open: bool) -> Self {
        Self { lower: Some(lower), upper: None, lower_open: open, upper_open: false }
    }

    /// Range from the bottom up to `upper`.
    pub fn upper_bound(upper: Key, open: bool) -> Self {
        Self { lower: None, upper: Some(upper), lower_open: false, upper_open: open }
    }

    /// Range containing exactly `key`.
    pub fn only(key: Key) -> Self {
        Self::bound(key.clone(), key, false, false)
    }
}

/// Resolved iteration parameters for one cursor.
#[derive(Debug, Clone)]
pub struct CursorOptions {
    pub(crate) database_id: i64,
    pub(crate) object_store_id: i64,
    pub(crate) index_id: i64,
    pub(crate) low_key: Vec<u8>,
    pub(crate) low_open: bool,
    pub(crate) high_key: Vec<u8>,
    pub(crate) high_open: bool,
    pub(crate) forward: bool,
    pub(crate) unique: bool,
}

/// Decoded state of the row under a cursor.
#[derive(Debug, Clone)]
pub struct LoadedRow {
    pub(crate) key: Key,
    pub(crate) primary_key: Key,
    pub(crate) value: Option<Vec<u8>>,
    pub(crate) record: RecordIdentifier,
}

/// Strategy giving the cursor engine its keyspace and row decoding.
///
/// Implemented by the four provided row shapes; the engine never needs to
/// know which keyspace it is iterating.
pub trait RowCodec {
    /// Encodes a logical key into the keyspace this cursor iterates.
    fn encode_key(options: &CursorOptions, key: &Key) -> Vec<u8>;

    /// Decodes the row at `raw_key`/`raw_value`.
    ///
    /// `None` means the row is stale or undecodable and gets skipped; index
    /// shapes also delete stale entries through `txn` as a side effect.
    fn load_row<T: StoreTransaction>(
        txn: &T,
        raw_key: &[u8],
        raw_value: &[u8],
        observer: &dyn Observer,
    ) -> Option<LoadedRow>;
}

fn report_load_error(observer: &dyn Observer) {
    observer.internal_error(ErrorClass::Read, ErrorSite::LoadCurrentRow);
}

fn load_object_store_row(
    raw_key: &[u8],
    raw_value: &[u8],
    with_value: bool,
    observer: &dyn Observer,
) -> Option<LoadedRow> {
    let mut key_slice = raw_key;
    let Some(data_key) = ObjectStoreDataKey::decode(&mut key_slice) else {
        report_load_error(observer);
        return None;
    };

    let mut value_slice = raw_value;
    let Some(version) = keys::decode_var_int(&mut value_slice) else {
        report_load_error(observer);
        return None;
    };

    let user_key = data_key.user_key;
    let record = RecordIdentifier::new(keys::encode_key(&user_key), version);
    Some(LoadedRow {
        primary_key: user_key.clone(),
        key: user_key,
        value: if with_value { Some(value_slice.to_vec()) } else { None },
        record,
    })
}

fn load_index_row<T: StoreTransaction>(
    txn: &T,
    raw_key: &[u8],
    raw_value: &[u8],
    with_value: bool,
    observer: &dyn Observer,
) -> Option<LoadedRow> {
    let mut key_slice = raw_key;
    let Some(index_key) = IndexDataKey::decode(&mut key_slice) else {
        report_load_error(observer);
        return None;
    };

    let mut value_slice = raw_value;
    let Some(index_version) = keys::decode_var_int(&mut value_slice) else {
        report_load_error(observer);
        return None;
    };
    let encoded_primary_key = value_slice.to_vec();
    let mut primary_slice = value_slice;
    let Some(primary_key) = keys::decode_key(&mut primary_slice) else {
        report_load_error(observer);
        return None;
    };

    let primary_data_key = ObjectStoreDataKey::encode_encoded(
        index_key.database_id,
        index_key.object_store_id,
        &encoded_primary_key,
    );
    let record_value = match txn.get(&primary_data_key) {
        Ok(found) => found,
        Err(_) => {
            report_load_error(observer);
            return None;
        }
    };
    let Some(record_value) = record_value else {
        // The record this entry referenced is gone; heal in place.
        tracing::debug!("removing index entry for deleted record");
        let _ = txn.remove(raw_key);
        return None;
    };

    let mut record_slice = record_value.as_slice();
    let Some(record_version) = keys::decode_var_int(&mut record_slice) else {
        report_load_error(observer);
        return None;
    };
    if record_version != index_version {
        // The record was overwritten since this entry was written.
        tracing::debug!("removing stale index entry");
        let _ = txn.remove(raw_key);
        return None;
    }

    Some(LoadedRow {
        key: index_key.user_key,
        primary_key,
        value: if with_value { Some(record_slice.to_vec()) } else { None },
        record: RecordIdentifier::new(encoded_primary_key, index_version),
    })
}

/// Rows of an object store: primary key and value.
#[derive(Debug, Clone, Copy)]
pub struct ObjectStoreRows;

impl RowCodec for ObjectStoreRows {
    fn encode_key(options: &CursorOptions, key: &Key) -> Vec<u8> {
        ObjectStoreDataKey::encode(options.database_id, options.object_store_id, key)
    }

    fn load_row<T: StoreTransaction>(
        _txn: &T,
        raw_key: &[u8],
        raw_value: &[u8],
        observer: &dyn Observer,
    ) -> Option<LoadedRow> {
        load_object_store_row(raw_key, raw_value, true, observer)
    }
}

/// Rows of an object store: primary key only.
#[derive(Debug, Clone, Copy)]
pub struct ObjectStoreKeyRows;

impl RowCodec for ObjectStoreKeyRows {
    fn encode_key(options: &CursorOptions, key: &Key) -> Vec<u8> {
        ObjectStoreDataKey::encode(options.database_id, options.object_store_id, key)
    }

    fn load_row<T: StoreTransaction>(
        _txn: &T,
        raw_key: &[u8],
        raw_value: &[u8],
        observer: &dyn Observer,
    ) -> Option<LoadedRow> {
        load_object_store_row(raw_key, raw_value, false, observer)
    }
}

/// Rows of an index: index key, primary key, and the record's value.
#[derive(Debug, Clone, Copy)]
pub struct IndexRows;

impl RowCodec for IndexRows {
    fn encode_key(options: &CursorOptions, key: &Key) -> Vec<u8> {
        IndexDataKey::encode_user_key(
            options.database_id,
            options.object_store_id,
            options.index_id,
            key,
        )
    }

    fn load_row<T: StoreTransaction>(
        txn: &T,
        raw_key: &[u8],
        raw_value: &[u8],
        observer: &dyn Observer,
    ) -> Option<LoadedRow> {
        load_index_row(txn, raw_key, raw_value, true, observer)
    }
}

/// Rows of an index: index key and primary key only.
#[derive(Debug, Clone, Copy)]
pub struct IndexKeyRows;

impl RowCodec for IndexKeyRows {
    fn encode_key(options: &CursorOptions, key: &Key) -> Vec<u8> {
        IndexDataKey::encode_user_key(
            options.database_id,
            options.object_store_id,
            options.index_id,
            key,
        )
    }

    fn load_row<T: StoreTransaction>(
        txn: &T,
        raw_key: &[u8],
        raw_value: &[u8],
        observer: &dyn Observer,
    ) -> Option<LoadedRow> {
        load_index_row(txn, raw_key, raw_value, false, observer)
    }
}

enum IteratorState {
    Ready,
    Seek,
}

/// A stateful iterator yielding (key, primary key, value) triples over a
/// bounded sub-range of one keyspace.
pub struct Cursor<'t, T: StoreTransaction, R: RowCodec> {
    txn: &'t T,
    iterator: T::Iter,
    options: CursorOptions,
    observer: Arc<dyn Observer>,
    row: Option<LoadedRow>,
    _codec: PhantomData<R>,
}

impl<'t, T: StoreTransaction, R: RowCodec> Cursor<'t, T, R> {
    /// Opens a cursor and positions it on the first row in range.
    /// `None` when the range holds no rows.
    pub(crate) fn open(
        txn: &'t T,
        options: CursorOptions,
        observer: Arc<dyn Observer>,
    ) -> Option<Self> {
        let iterator = txn.iterator();
        let mut cursor =
            Self { txn, iterator, options, observer, row: None, _codec: PhantomData };
        if cursor.first_seek() {
            Some(cursor)
        } else {
            None
        }
    }

    fn first_seek(&mut self) -> bool {
        if self.options.forward {
            self.iterator.seek(&self.options.low_key);
        } else {
            self.iterator.seek(&self.options.high_key);
        }
        self.continue_internal(None, IteratorState::Ready)
    }

    /// Key of the current row, if positioned.
    pub fn key(&self) -> Option<&Key> {
        self.row.as_ref().map(|row| &row.key)
    }

    /// Primary key of the current row, if positioned. Equals [`Self::key`]
    /// for object-store cursors.
    pub fn primary_key(&self) -> Option<&Key> {
        self.row.as_ref().map(|row| &row.primary_key)
    }

    /// Value of the current row. `None` for key-only cursors.
    pub fn value(&self) -> Option<&[u8]> {
        self.row.as_ref().and_then(|row| row.value.as_deref())
    }

    /// Identifier of the record revision under the cursor.
    pub fn record_identifier(&self) -> Option<&RecordIdentifier> {
        self.row.as_ref().map(|row| &row.record)
    }

    /// Advances to the next row, or, given a target, to the first row at
    /// or past it in the iteration direction.
    ///
    /// Returns false once iteration is exhausted; the cursor then stays
    /// exhausted.
    pub fn continue_to(&mut self, target: Option<&Key>) -> bool {
        self.continue_internal(target, IteratorState::Seek)
    }

    /// Steps the cursor `count` times, stopping early on exhaustion.
    pub fn advance(&mut self, mut count: u64) -> bool {
        while count > 0 {
            if !self.continue_to(None) {
                return false;
            }
            count -= 1;
        }
        true
    }

    fn continue_internal(&mut self, target: Option<&Key>, mut state: IteratorState) -> bool {
        let previous_key = self.row.as_ref().map(|row| row.key.clone());

        // Tracks the duplicate run a reverse unique cursor is scanning, so
        // the run's forward-order first entry can be recovered.
        let mut last_duplicate_key: Option<Key> = None;

        let mut first_iteration = true;
        let mut forward = self.options.forward;

        loop {
            match state {
                IteratorState::Seek => match target {
                    Some(key) if first_iteration && forward => {
                        let encoded = R::encode_key(&self.options, key);
                        self.iterator.seek(&encoded);
                        first_iteration = false;
                    }
                    _ => {
                        if forward {
                            self.iterator.next();
                        } else {
                            self.iterator.prev();
                        }
                    }
                },
                IteratorState::Ready => state = IteratorState::Seek,
            }

            if !self.iterator.is_valid() {
                if !forward && last_duplicate_key.is_some() {
                    // Ran off the front mid-run; recover going forward.
                    forward = true;
                    continue;
                }
                self.row = None;
                return false;
            }

            if self.is_past_bounds() {
                if !forward && last_duplicate_key.is_some() {
                    // Crossed the range edge mid-run; recover going forward.
                    forward = true;
                    continue;
                }
                self.row = None;
                return false;
            }

            if !self.have_entered_range() {
                continue;
            }

            // A row that fails to load is stale, not fatal.
            let Some(row) = R::load_row(
                self.txn,
                self.iterator.key(),
                self.iterator.value(),
                self.observer.as_ref(),
            ) else {
                continue;
            };

            if let Some(key) = target {
                if forward {
                    if row.key.compare(key) == Ordering::Less {
                        continue;
                    }
                } else if key.compare(&row.key) == Ordering::Less {
                    continue;
                }
            }

            if self.options.unique {
                if let Some(previous) = &previous_key {
                    if row.key.compare(previous) == Ordering::Equal {
                        // A duplicate of the last yielded key. The forward
                        // recovery walk can never reach back this far.
                        debug_assert!(last_duplicate_key.is_none());
                        continue;
                    }
                }
                if !forward {
                    match &last_duplicate_key {
                        None => {
                            last_duplicate_key = Some(row.key.clone());
                            continue;
                        }
                        Some(last) if last.compare(&row.key) != Ordering::Equal => {
                            // Crossed into the run below; walk forward to the
                            // tracked run's first entry.
                            forward = true;
                            continue;
                        }
                        Some(_) => continue,
                    }
                }
            }

            if let Some(last) = &last_duplicate_key {
                debug_assert!(forward && last.compare(&row.key) == Ordering::Equal);
            }
            self.row = Some(row);
            return true;
        }
    }

    fn is_past_bounds(&self) -> bool {
        let key = self.iterator.key();
        if self.options.forward {
            if self.options.high_open {
                keys::compare(key, &self.options.high_key, true) != Ordering::Less
            } else {
                keys::compare(key, &self.options.high_key, true) == Ordering::Greater
            }
        } else if self.options.low_open {
            keys::compare(key, &self.options.low_key, true) != Ordering::Greater
        } else {
            keys::compare(key, &self.options.low_key, true) == Ordering::Less
        }
    }

    fn have_entered_range(&self) -> bool {
        let key = self.iterator.key();
        if self.options.forward {
            if self.options.low_open {
                keys::compare(key, &self.options.low_key, true) == Ordering::Greater
            } else {
                keys::compare(key, &self.options.low_key, true) != Ordering::Less
            }
        } else if self.options.high_open {
            keys::compare(key, &self.options.high_key, true) == Ordering::Less
        } else {
            keys::compare(key, &self.options.high_key, true) != Ordering::Greater
        }
    }
}

impl<'t, T: StoreTransaction, R: RowCodec> Clone for Cursor<'t, T, R> {
    /// Clones share no iterator state; the clone opens a fresh iterator
    /// under the same transaction and re-seeks it to the current key.
    fn clone(&self) -> Self {
        let mut iterator = self.txn.iterator();
        if self.iterator.is_valid() {
            iterator.seek(self.iterator.key());
        }
        Self {
            txn: self.txn,
            iterator,
            options: self.options.clone(),
            observer: Arc::clone(&self.observer),
            row: self.row.clone(),
            _codec: PhantomData,
        }
    }
}

/// Last key at or below `target` under index-key comparison, or `None` when
/// the keyspace is empty below it. Reverse cursors need a starting key that
/// actually exists; the true bound may not.
pub(crate) fn find_greatest_key_less_than_or_equal<T: StoreTransaction>(
    txn: &T,
    target: &[u8],
) -> Option<Vec<u8>> {
    let mut it = txn.iterator();
    it.seek(target);

    if !it.is_valid() {
        it.seek_to_last();
        if !it.is_valid() {
            return None;
        }
    }

    while keys::compare(it.key(), target, true) == Ordering::Greater {
        it.prev();
        if !it.is_valid() {
            return None;
        }
    }

    loop {
        let found = it.key().to_vec();
        // Several keys can compare equal as index keys; take the last.
        it.next();
        if !it.is_valid() || keys::compare(it.key(), target, true) != Ordering::Equal {
            return Some(found);
        }
    }
}

/// Resolves a logical range over an object store into concrete encoded
/// bounds. `None` when a reverse cursor has no existing key to start from.
pub(crate) fn object_store_cursor_options<T: StoreTransaction>(
    txn: &T,
    database_id: i64,
    object_store_id: i64,
    range: &KeyRange,
    direction: CursorDirection,
) -> Option<CursorOptions> {
    let forward = direction.forward();
    let unique = direction.unique();

    let (low_key, low_open) = match &range.lower {
        Some(lower) => {
            (ObjectStoreDataKey::encode(database_id, object_store_id, lower), range.lower_open)
        }
        None => (
            ObjectStoreDataKey::encode_encoded(database_id, object_store_id, &keys::min_key_bytes()),
            true,
        ),
    };

    let (high_key, high_open) = match &range.upper {
        Some(upper) => {
            let high_key = ObjectStoreDataKey::encode(database_id, object_store_id, upper);
            let mut high_open = range.upper_open;
            if forward {
                (high_key, high_open)
            } else {
                // Reverse cursors must start on a key that exists.
                let found = find_greatest_key_less_than_or_equal(txn, &high_key)?;
                if high_open && keys::compare(&found, &high_key, true) == Ordering::Less {
                    // Landed below an excluded bound; the found key counts.
                    high_open = false;
                }
                (found, high_open)
            }
        }
        None => {
            let high_key = ObjectStoreDataKey::encode_encoded(
                database_id,
                object_store_id,
                &keys::max_key_bytes(),
            );
            if forward {
                (high_key, true)
            } else {
                let found = find_greatest_key_less_than_or_equal(txn, &high_key)?;
                (found, false)
            }
        }
    };

    Some(CursorOptions {
        database_id,
        object_store_id,
        index_id: 0,
        low_key,
        low_open,
        high_key,
        high_open,
        forward,
        unique,
    })
}

/// Resolves a logical range over an index into concrete encoded bounds.
pub(crate) fn index_cursor_options<T: StoreTransaction>(
    txn: &T,
    database_id: i64,
    object_store_id: i64,
    index_id: i64,
    range: &KeyRange,
    direction: CursorDirection,
) -> Option<CursorOptions> {
    let forward = direction.forward();
    let unique = direction.unique();

    let (low_key, low_open) = match &range.lower {
        Some(lower) => (
            IndexDataKey::encode_user_key(database_id, object_store_id, index_id, lower),
            range.lower_open,
        ),
        None => (IndexDataKey::encode_min_key(database_id, object_store_id, index_id), false),
    };

    let (high_key, high_open) = match &range.upper {
        Some(upper) => {
            let high_key =
                IndexDataKey::encode_user_key(database_id, object_store_id, index_id, upper);
            let mut high_open = range.upper_open;
            // The bound names an index key without its primary-key tail;
            // land on the last physical key of that run.
            let found = find_greatest_key_less_than_or_equal(txn, &high_key)?;
            if high_open && keys::compare(&found, &high_key, true) == Ordering::Less {
                high_open = false;
            }
            (found, high_open)
        }
        None => {
            let high_key = IndexDataKey::encode_max_key(database_id, object_store_id, index_id);
            if forward {
                (high_key, false)
            } else {
                let found = find_greatest_key_less_than_or_equal(txn, &high_key)?;
                (found, false)
            }
        }
    };

    Some(CursorOptions {
        database_id,
        object_store_id,
        index_id,
        low_key,
        low_open,
        high_key,
        high_open,
        forward,
        unique,
    })
}
