//! The backing store: schema metadata, record CRUD, indexes, and cursors.
//!
//! Operations translate (database id, object store id, [index id], logical
//! key) tuples into encoded keys and run point or range operations against
//! the ordered store, parameterized by an active [`Transaction`]. Schema
//! metadata and id counters live in reserved keyspace partitions alongside
//! the data they describe.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use strata_store::{
    MemoryStore, OrderedStore, StoreFactory, StoreIterator, StoreRead, StoreTransaction,
};

use crate::cursor::{
    self, Cursor, CursorDirection, IndexKeyRows, IndexRows, KeyRange, ObjectStoreKeyRows,
    ObjectStoreRows,
};
use crate::error::{Error, Result};
use crate::key::{Key, KeyPath};
use crate::keys::{
    self, DataVersionKey, DatabaseMetaDataKey, DatabaseNameKey, ExistsEntryKey, IndexDataKey,
    IndexMetaDataKey, KeyPrefix, KeyspaceComparator, MaxDatabaseIdKey, ObjectStoreDataKey,
    ObjectStoreMetaDataKey, ObjectStoreNamesKey, SchemaVersionKey,
};
use crate::metadata::{DatabaseMetadata, IndexMetadata, ObjectStoreMetadata, RecordIdentifier};
use crate::observe::{ErrorClass, ErrorSite, NoopObserver, Observer};
use crate::txn::Transaction;

/// Key generators start counting here.
pub const KEY_GENERATOR_INITIAL_NUMBER: i64 = 1;

/// Stored placeholder for databases opened without an integer version.
const DEFAULT_INT_VERSION: i64 = 0;

// 0 - initial layout.
// 1 - adds the per-database integer-version row.
// 2 - adds the global data-version row.
const LATEST_SCHEMA_VERSION: i64 = 2;

/// Serialization version of record values written by this build.
const LATEST_DATA_VERSION: i64 = 1;

/// Options for [`BackingStore::open`].
#[derive(Clone, bon::Builder)]
pub struct OpenOptions {
    /// Destroy and reopen the store once if the engine fails to open.
    #[builder(default = true)]
    pub recover_on_failure: bool,
    /// Sink for internal error reports.
    pub observer: Option<Arc<dyn Observer>>,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self { recover_on_failure: true, observer: None }
    }
}

/// Key+value cursor over an object store's records.
pub type ObjectStoreCursor<'t, S> =
    Cursor<'t, <S as OrderedStore>::Transaction, ObjectStoreRows>;
/// Key-only cursor over an object store's records.
pub type ObjectStoreKeyCursor<'t, S> =
    Cursor<'t, <S as OrderedStore>::Transaction, ObjectStoreKeyRows>;
/// Cursor over an index yielding the referenced records' values.
pub type IndexCursor<'t, S> = Cursor<'t, <S as OrderedStore>::Transaction, IndexRows>;
/// Cursor over an index yielding keys and primary keys only.
pub type IndexKeyCursor<'t, S> = Cursor<'t, <S as OrderedStore>::Transaction, IndexKeyRows>;

/// A transactional object/index store over one ordered byte-keyed store.
///
/// Owns the store handle. All schema, record, index, and cursor operations
/// go through here; mutating ones take an active [`Transaction`].
pub struct BackingStore<S: OrderedStore> {
    origin: String,
    store: S,
    observer: Arc<dyn Observer>,
}

impl<S: OrderedStore> std::fmt::Debug for BackingStore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackingStore").field("origin", &self.origin).finish_non_exhaustive()
    }
}

// ============================================================================
// Generic row helpers
// ============================================================================

fn get_int<R: StoreRead>(reader: &R, key: &[u8]) -> Result<Option<i64>> {
    Ok(reader.get(key)?.and_then(|data| keys::decode_int(&data)))
}

fn get_var_int<R: StoreRead>(reader: &R, key: &[u8]) -> Result<Option<i64>> {
    Ok(reader.get(key)?.and_then(|data| {
        let mut slice = data.as_slice();
        let value = keys::decode_var_int(&mut slice)?;
        // Trailing bytes mean the row is not a varint row.
        if slice.is_empty() {
            Some(value)
        } else {
            None
        }
    }))
}

fn get_string<R: StoreRead>(reader: &R, key: &[u8]) -> Result<Option<String>> {
    Ok(reader.get(key)?.and_then(|data| keys::decode_string(&data)))
}

fn put_int<T: StoreTransaction>(txn: &T, key: &[u8], value: i64) -> Result<()> {
    txn.put(key, &keys::encode_int(value))?;
    Ok(())
}

fn put_var_int<T: StoreTransaction>(txn: &T, key: &[u8], value: i64) -> Result<()> {
    txn.put(key, &keys::encode_var_int(value))?;
    Ok(())
}

fn put_bool<T: StoreTransaction>(txn: &T, key: &[u8], value: bool) -> Result<()> {
    txn.put(key, &keys::encode_bool(value))?;
    Ok(())
}

fn put_string<T: StoreTransaction>(txn: &T, key: &[u8], value: &str) -> Result<()> {
    txn.put(key, &keys::encode_string(value))?;
    Ok(())
}

fn put_key_path<T: StoreTransaction>(txn: &T, key: &[u8], value: &KeyPath) -> Result<()> {
    txn.put(key, &keys::encode_key_path(value))?;
    Ok(())
}

fn delete_range<T: StoreTransaction>(txn: &T, begin: &[u8], end: &[u8]) -> Result<()> {
    let mut it = txn.iterator();
    it.seek(begin);
    while it.is_valid() && keys::compare(it.key(), end, false) == Ordering::Less {
        txn.remove(it.key())?;
        it.next();
    }
    Ok(())
}

fn check_object_store_meta<I: StoreIterator>(
    it: &I,
    stop_key: &[u8],
    object_store_id: i64,
    meta_type: u8,
) -> bool {
    if !it.is_valid() || keys::compare(it.key(), stop_key, false) != Ordering::Less {
        return false;
    }
    let mut slice = it.key();
    match ObjectStoreMetaDataKey::decode(&mut slice) {
        Some(meta_key) => {
            meta_key.object_store_id == object_store_id && meta_key.meta_type == meta_type
        }
        None => false,
    }
}

fn check_index_meta<I: StoreIterator>(
    it: &I,
    stop_key: &[u8],
    index_id: i64,
    meta_type: u8,
) -> bool {
    if !it.is_valid() || keys::compare(it.key(), stop_key, false) != Ordering::Less {
        return false;
    }
    let mut slice = it.key();
    match IndexMetaDataKey::decode(&mut slice) {
        Some(meta_key) => meta_key.index_id == index_id && meta_key.meta_type == meta_type,
        None => false,
    }
}

impl<S: OrderedStore> BackingStore<S> {
    /// Opens the named store for `origin`.
    ///
    /// An engine-level open failure is retried once after destroying the
    /// store, when `options.recover_on_failure` allows. A store whose schema
    /// is newer than this build refuses to open and is left untouched.
    pub fn open<F>(factory: &F, name: &str, origin: &str, options: OpenOptions) -> Result<Self>
    where
        F: StoreFactory<Store = S>,
    {
        let observer: Arc<dyn Observer> =
            options.observer.unwrap_or_else(|| Arc::new(NoopObserver));

        let store = match factory.open(name) {
            Ok(store) => store,
            Err(error) if options.recover_on_failure => {
                tracing::warn!(name, %error, "store open failed; destroying and reopening");
                factory.destroy(name)?;
                factory.open(name)?
            }
            Err(error) => return Err(error.into()),
        };

        if !Self::is_schema_known(&store)? {
            tracing::error!(name, "store schema is newer than this build; refusing to open");
            return Err(Error::UnknownSchema);
        }

        let backing = Self { origin: origin.to_string(), store, observer };
        backing.set_up_metadata()?;
        Ok(backing)
    }

    /// Origin this store serves.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Begins a transaction over this backing store.
    pub fn begin_transaction(&self) -> Transaction<S> {
        Transaction::new(self.store.begin_transaction(), Arc::clone(&self.observer))
    }

    fn read_error(&self, site: ErrorSite) -> Error {
        tracing::error!(%site, "backing store read error");
        self.observer.internal_error(ErrorClass::Read, site);
        Error::Read { site }
    }

    fn write_error(&self, site: ErrorSite) -> Error {
        tracing::error!(%site, "backing store write error");
        self.observer.internal_error(ErrorClass::Write, site);
        Error::Write { site }
    }

    fn consistency_error(&self, site: ErrorSite) -> Error {
        tracing::error!(%site, "backing store consistency error");
        self.observer.internal_error(ErrorClass::Consistency, site);
        Error::Consistency { site }
    }

    fn report_consistency(&self, site: ErrorSite) {
        tracing::warn!(%site, "stale metadata row skipped");
        self.observer.internal_error(ErrorClass::Consistency, site);
    }

    // ========================================================================
    // Schema versioning
    // ========================================================================

    fn is_schema_known(store: &S) -> Result<bool> {
        let Some(schema_version) = get_int(store, &SchemaVersionKey::encode())? else {
            return Ok(true);
        };
        if schema_version > LATEST_SCHEMA_VERSION {
            return Ok(false);
        }
        let Some(data_version) = get_int(store, &DataVersionKey::encode())? else {
            return Ok(true);
        };
        Ok(data_version <= LATEST_DATA_VERSION)
    }

    /// Idempotent staged schema upgrade, applied inside one transaction.
    fn set_up_metadata(&self) -> Result<()> {
        let schema_version_key = SchemaVersionKey::encode();
        let data_version_key = DataVersionKey::encode();
        let txn = self.store.begin_transaction();

        match get_int(&txn, &schema_version_key)? {
            None => {
                // Fresh store.
                put_int(&txn, &schema_version_key, LATEST_SCHEMA_VERSION)?;
                put_int(&txn, &data_version_key, LATEST_DATA_VERSION)?;
            }
            Some(current) => {
                let mut version = current;
                if version < 1 {
                    version = 1;
                    put_int(&txn, &schema_version_key, version)?;
                    // Databases written before integer versions get the
                    // placeholder backfilled.
                    let start_key = DatabaseNameKey::encode_min_key_for_origin(&self.origin);
                    let mut it = self.store.iterator();
                    it.seek(&start_key);
                    while it.is_valid() {
                        let mut slice = it.key();
                        let Some(name_key) = DatabaseNameKey::decode(&mut slice) else {
                            break;
                        };
                        if name_key.origin != self.origin {
                            break;
                        }
                        let Some(database_id) = get_int(&txn, it.key())? else {
                            return Err(self.consistency_error(ErrorSite::SetUpMetadata));
                        };
                        put_var_int(
                            &txn,
                            &DatabaseMetaDataKey::encode(
                                database_id,
                                DatabaseMetaDataKey::USER_INT_VERSION,
                            ),
                            DEFAULT_INT_VERSION,
                        )?;
                        it.next();
                    }
                }
                if version < 2 {
                    version = 2;
                    put_int(&txn, &schema_version_key, version)?;
                    put_int(&txn, &data_version_key, LATEST_DATA_VERSION)?;
                }
                debug_assert!(version == LATEST_SCHEMA_VERSION);
            }
        }

        // All new values are written in the current serialization format.
        let Some(data_version) = get_int(&txn, &data_version_key)? else {
            return Err(self.consistency_error(ErrorSite::SetUpMetadata));
        };
        if data_version < LATEST_DATA_VERSION {
            put_int(&txn, &data_version_key, LATEST_DATA_VERSION)?;
        }

        if txn.commit().is_err() {
            return Err(self.write_error(ErrorSite::SetUpMetadata));
        }
        Ok(())
    }

    // ========================================================================
    // Databases
    // ========================================================================

    /// Names of every database belonging to this origin, in name order.
    pub fn get_database_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let start_key = DatabaseNameKey::encode_min_key_for_origin(&self.origin);
        let mut it = self.store.iterator();
        it.seek(&start_key);
        while it.is_valid() {
            let mut slice = it.key();
            let Some(name_key) = DatabaseNameKey::decode(&mut slice) else {
                break;
            };
            if name_key.origin != self.origin {
                break;
            }
            names.push(name_key.name);
            it.next();
        }
        Ok(names)
    }

    /// Loads the metadata of the named database, if it exists.
    pub fn get_database_metadata(&self, name: &str) -> Result<Option<DatabaseMetadata>> {
        let name_key = DatabaseNameKey::encode(&self.origin, name);
        let Some(id) = get_int(&self.store, &name_key)? else {
            return Ok(None);
        };

        let Some(version) = get_string(
            &self.store,
            &DatabaseMetaDataKey::encode(id, DatabaseMetaDataKey::USER_VERSION),
        )?
        else {
            return Err(self.consistency_error(ErrorSite::GetDatabaseMetadata));
        };

        let Some(stored_int_version) = get_var_int(
            &self.store,
            &DatabaseMetaDataKey::encode(id, DatabaseMetaDataKey::USER_INT_VERSION),
        )?
        else {
            return Err(self.consistency_error(ErrorSite::GetDatabaseMetadata));
        };
        let int_version =
            if stored_int_version == DEFAULT_INT_VERSION { None } else { Some(stored_int_version) };

        let max_object_store_id = get_int(
            &self.store,
            &DatabaseMetaDataKey::encode(id, DatabaseMetaDataKey::MAX_OBJECT_STORE_ID),
        )?
        .unwrap_or(0);

        Ok(Some(DatabaseMetadata {
            id,
            name: name.to_string(),
            version,
            int_version,
            max_object_store_id,
        }))
    }

    fn get_new_database_id(&self) -> Result<i64> {
        let txn = self.store.begin_transaction();
        let max_key = MaxDatabaseIdKey::encode();
        let max_database_id = get_int(&txn, &max_key)?.unwrap_or(0);
        let database_id = max_database_id + 1;
        put_int(&txn, &max_key, database_id)?;
        if txn.commit().is_err() {
            return Err(self.write_error(ErrorSite::GetNewDatabaseId));
        }
        Ok(database_id)
    }

    /// Allocates an id and writes the identity rows for a new database.
    /// Runs in its own transaction; returns the new database id.
    pub fn create_database_metadata(
        &self,
        name: &str,
        version: &str,
        int_version: Option<i64>,
    ) -> Result<i64> {
        let id = self.get_new_database_id()?;

        let txn = self.store.begin_transaction();
        put_int(&txn, &DatabaseNameKey::encode(&self.origin, name), id)?;
        put_string(
            &txn,
            &DatabaseMetaDataKey::encode(id, DatabaseMetaDataKey::USER_VERSION),
            version,
        )?;
        put_var_int(
            &txn,
            &DatabaseMetaDataKey::encode(id, DatabaseMetaDataKey::USER_INT_VERSION),
            int_version.unwrap_or(DEFAULT_INT_VERSION),
        )?;
        if txn.commit().is_err() {
            return Err(self.write_error(ErrorSite::CreateDatabaseMetadata));
        }
        Ok(id)
    }

    /// Records the string version of a database.
    pub fn update_database_version(
        &self,
        txn: &Transaction<S>,
        database_id: i64,
        version: &str,
    ) -> Result<()> {
        put_string(
            txn.raw(),
            &DatabaseMetaDataKey::encode(database_id, DatabaseMetaDataKey::USER_VERSION),
            version,
        )
    }

    /// Records the integer version committed by a version change.
    pub fn update_database_int_version(
        &self,
        txn: &Transaction<S>,
        database_id: i64,
        int_version: Option<i64>,
    ) -> Result<()> {
        put_var_int(
            txn.raw(),
            &DatabaseMetaDataKey::encode(database_id, DatabaseMetaDataKey::USER_INT_VERSION),
            int_version.unwrap_or(DEFAULT_INT_VERSION),
        )
    }

    /// Deletes the named database and everything in it. Runs in its own
    /// transaction; deleting a database that does not exist is a no-op.
    pub fn delete_database(&self, name: &str) -> Result<()> {
        let Some(metadata) = self.get_database_metadata(name)? else {
            return Ok(());
        };

        let txn = self.store.begin_transaction();
        // The metadata partition of id N starts every key owned by the
        // database, so [first row of N, first row of N+1) covers it all.
        let start_key =
            DatabaseMetaDataKey::encode(metadata.id, DatabaseMetaDataKey::ORIGIN_NAME);
        let stop_key =
            DatabaseMetaDataKey::encode(metadata.id + 1, DatabaseMetaDataKey::ORIGIN_NAME);
        delete_range(&txn, &start_key, &stop_key)?;
        txn.remove(&DatabaseNameKey::encode(&self.origin, name))?;
        if txn.commit().is_err() {
            return Err(self.write_error(ErrorSite::DeleteDatabase));
        }
        Ok(())
    }

    // ========================================================================
    // Object stores
    // ========================================================================

    /// Loads every object store of a database, keyed by id.
    pub fn get_object_stores(
        &self,
        database_id: i64,
    ) -> Result<BTreeMap<i64, ObjectStoreMetadata>> {
        if !KeyPrefix::valid_database_id(database_id) {
            return Err(Error::InvalidId { database_id, object_store_id: 0, index_id: 0 });
        }
        let start_key =
            ObjectStoreMetaDataKey::encode(database_id, 1, ObjectStoreMetaDataKey::NAME);
        let stop_key = ObjectStoreMetaDataKey::encode_max_for_database(database_id);

        let mut object_stores = BTreeMap::new();
        let mut it = self.store.iterator();
        it.seek(&start_key);
        while it.is_valid() && keys::compare(it.key(), &stop_key, false) == Ordering::Less {
            let mut slice = it.key();
            let meta_key = match ObjectStoreMetaDataKey::decode(&mut slice) {
                Some(meta_key) if meta_key.meta_type == ObjectStoreMetaDataKey::NAME => meta_key,
                _ => {
                    // Possibly stale metadata; skip rather than fail the load.
                    self.report_consistency(ErrorSite::GetObjectStores);
                    it.next();
                    continue;
                }
            };
            let object_store_id = meta_key.object_store_id;
            let Some(name) = keys::decode_string(it.value()) else {
                return Err(self.read_error(ErrorSite::GetObjectStores));
            };

            it.next();
            if !check_object_store_meta(
                &it,
                &stop_key,
                object_store_id,
                ObjectStoreMetaDataKey::KEY_PATH,
            ) {
                self.report_consistency(ErrorSite::GetObjectStores);
                break;
            }
            let Some(mut key_path) = keys::decode_key_path(it.value()) else {
                return Err(self.read_error(ErrorSite::GetObjectStores));
            };

            it.next();
            if !check_object_store_meta(
                &it,
                &stop_key,
                object_store_id,
                ObjectStoreMetaDataKey::AUTO_INCREMENT,
            ) {
                self.report_consistency(ErrorSite::GetObjectStores);
                break;
            }
            let auto_increment = keys::decode_bool(it.value());

            it.next(); // evictable flag, unused
            if !check_object_store_meta(
                &it,
                &stop_key,
                object_store_id,
                ObjectStoreMetaDataKey::EVICTABLE,
            ) {
                self.report_consistency(ErrorSite::GetObjectStores);
                break;
            }

            it.next(); // last version, loaded on demand
            if !check_object_store_meta(
                &it,
                &stop_key,
                object_store_id,
                ObjectStoreMetaDataKey::LAST_VERSION,
            ) {
                self.report_consistency(ErrorSite::GetObjectStores);
                break;
            }

            it.next();
            if !check_object_store_meta(
                &it,
                &stop_key,
                object_store_id,
                ObjectStoreMetaDataKey::MAX_INDEX_ID,
            ) {
                self.report_consistency(ErrorSite::GetObjectStores);
                break;
            }
            let Some(max_index_id) = keys::decode_int(it.value()) else {
                return Err(self.read_error(ErrorSite::GetObjectStores));
            };

            it.next(); // optional has-key-path row
            if check_object_store_meta(
                &it,
                &stop_key,
                object_store_id,
                ObjectStoreMetaDataKey::HAS_KEY_PATH,
            ) {
                // Two generations of encoding here: has-key-path once
                // distinguished null from an empty string path.
                let has_key_path = keys::decode_bool(it.value());
                if !has_key_path {
                    if matches!(&key_path, KeyPath::Single(path) if !path.is_empty()) {
                        self.report_consistency(ErrorSite::GetObjectStores);
                        break;
                    }
                    key_path = KeyPath::None;
                }
                it.next();
            }

            if check_object_store_meta(
                &it,
                &stop_key,
                object_store_id,
                ObjectStoreMetaDataKey::KEY_GENERATOR_CURRENT_NUMBER,
            ) {
                // Loaded on demand via get_key_generator_current_number.
                it.next();
            }

            let indexes = self.get_indexes(database_id, object_store_id)?;
            object_stores.insert(
                object_store_id,
                ObjectStoreMetadata {
                    id: object_store_id,
                    name,
                    key_path,
                    auto_increment,
                    max_index_id,
                    indexes,
                },
            );
        }
        Ok(object_stores)
    }

    fn set_max_object_store_id(
        &self,
        txn: &S::Transaction,
        database_id: i64,
        object_store_id: i64,
    ) -> Result<()> {
        let max_key =
            DatabaseMetaDataKey::encode(database_id, DatabaseMetaDataKey::MAX_OBJECT_STORE_ID);
        let max_object_store_id = get_int(txn, &max_key)?.unwrap_or(0);
        if object_store_id <= max_object_store_id {
            return Err(self.consistency_error(ErrorSite::SetMaxObjectStoreId));
        }
        put_int(txn, &max_key, object_store_id)
    }

    /// Creates an object store and writes all of its metadata rows.
    pub fn create_object_store(
        &self,
        txn: &Transaction<S>,
        database_id: i64,
        object_store_id: i64,
        name: &str,
        key_path: &KeyPath,
        auto_increment: bool,
    ) -> Result<()> {
        if !KeyPrefix::valid_ids(database_id, object_store_id) {
            return Err(Error::InvalidId { database_id, object_store_id, index_id: 0 });
        }
        let raw = txn.raw();
        self.set_max_object_store_id(raw, database_id, object_store_id)?;

        let meta = |meta_type| ObjectStoreMetaDataKey::encode(database_id, object_store_id, meta_type);
        put_string(raw, &meta(ObjectStoreMetaDataKey::NAME), name)?;
        put_key_path(raw, &meta(ObjectStoreMetaDataKey::KEY_PATH), key_path)?;
        put_int(raw, &meta(ObjectStoreMetaDataKey::AUTO_INCREMENT), i64::from(auto_increment))?;
        put_int(raw, &meta(ObjectStoreMetaDataKey::EVICTABLE), 0)?;
        put_int(raw, &meta(ObjectStoreMetaDataKey::LAST_VERSION), 1)?;
        put_int(raw, &meta(ObjectStoreMetaDataKey::MAX_INDEX_ID), KeyPrefix::MINIMUM_INDEX_ID)?;
        put_bool(raw, &meta(ObjectStoreMetaDataKey::HAS_KEY_PATH), !key_path.is_none())?;
        put_int(
            raw,
            &meta(ObjectStoreMetaDataKey::KEY_GENERATOR_CURRENT_NUMBER),
            KEY_GENERATOR_INITIAL_NUMBER,
        )?;
        put_int(raw, &ObjectStoreNamesKey::encode(database_id, name), object_store_id)?;
        Ok(())
    }

    /// Deletes an object store: metadata, name row, index metadata, data.
    pub fn delete_object_store(
        &self,
        txn: &Transaction<S>,
        database_id: i64,
        object_store_id: i64,
    ) -> Result<()> {
        if !KeyPrefix::valid_ids(database_id, object_store_id) {
            return Err(Error::InvalidId { database_id, object_store_id, index_id: 0 });
        }
        let raw = txn.raw();

        let Some(name) = get_string(
            raw,
            &ObjectStoreMetaDataKey::encode(database_id, object_store_id, ObjectStoreMetaDataKey::NAME),
        )?
        else {
            return Err(self.consistency_error(ErrorSite::DeleteObjectStore));
        };

        delete_range(
            raw,
            &ObjectStoreMetaDataKey::encode(database_id, object_store_id, 0),
            &ObjectStoreMetaDataKey::encode_max_for_store(database_id, object_store_id),
        )?;
        raw.remove(&ObjectStoreNamesKey::encode(database_id, &name))?;
        delete_range(
            raw,
            &IndexMetaDataKey::encode(database_id, object_store_id, 0, 0),
            &IndexMetaDataKey::encode_max_for_store(database_id, object_store_id),
        )?;

        self.clear_object_store(txn, database_id, object_store_id)
    }

    // ========================================================================
    // Records
    // ========================================================================

    /// Reads a record's value, without its version prefix.
    pub fn get_record(
        &self,
        txn: &Transaction<S>,
        database_id: i64,
        object_store_id: i64,
        key: &Key,
    ) -> Result<Option<Vec<u8>>> {
        if !KeyPrefix::valid_ids(database_id, object_store_id) {
            return Err(Error::InvalidId { database_id, object_store_id, index_id: 0 });
        }
        let data_key = ObjectStoreDataKey::encode(database_id, object_store_id, key);
        let Some(data) = txn.raw().get(&data_key)? else {
            return Ok(None);
        };

        let mut slice = data.as_slice();
        if keys::decode_var_int(&mut slice).is_none() {
            return Err(self.read_error(ErrorSite::GetRecord));
        }
        Ok(Some(slice.to_vec()))
    }

    fn get_new_version_number(
        &self,
        txn: &S::Transaction,
        database_id: i64,
        object_store_id: i64,
    ) -> Result<i64> {
        let last_version_key = ObjectStoreMetaDataKey::encode(
            database_id,
            object_store_id,
            ObjectStoreMetaDataKey::LAST_VERSION,
        );
        let last_version = get_int(txn, &last_version_key)?.unwrap_or(0);
        debug_assert!(last_version >= 0);

        let version = last_version + 1;
        put_int(txn, &last_version_key, version)?;
        Ok(version)
    }

    /// Writes a record at `key`, superseding any existing revision, and
    /// returns the identifier of the new revision.
    ///
    /// Index entries pointing at the superseded revision are not touched
    /// here; they are healed lazily when next encountered.
    pub fn put_record(
        &self,
        txn: &Transaction<S>,
        database_id: i64,
        object_store_id: i64,
        key: &Key,
        value: &[u8],
    ) -> Result<RecordIdentifier> {
        if !KeyPrefix::valid_ids(database_id, object_store_id) {
            return Err(Error::InvalidId { database_id, object_store_id, index_id: 0 });
        }
        if !key.is_valid() {
            return Err(Error::InvalidKey);
        }
        let raw = txn.raw();
        let version = self.get_new_version_number(raw, database_id, object_store_id)?;

        let data_key = ObjectStoreDataKey::encode(database_id, object_store_id, key);
        let mut stored = keys::encode_var_int(version);
        stored.extend_from_slice(value);
        raw.put(&data_key, &stored)?;

        let exists_key = ExistsEntryKey::encode(database_id, object_store_id, key);
        raw.put(&exists_key, &keys::encode_int(version))?;

        Ok(RecordIdentifier::new(keys::encode_key(key), version))
    }

    /// Deletes the record a cursor identified, and its exists entry. Index
    /// entries are left for lazy repair.
    pub fn delete_record(
        &self,
        txn: &Transaction<S>,
        database_id: i64,
        object_store_id: i64,
        record: &RecordIdentifier,
    ) -> Result<()> {
        if !KeyPrefix::valid_ids(database_id, object_store_id) {
            return Err(Error::InvalidId { database_id, object_store_id, index_id: 0 });
        }
        let raw = txn.raw();
        raw.remove(&ObjectStoreDataKey::encode_encoded(
            database_id,
            object_store_id,
            &record.encoded_primary_key,
        ))?;
        raw.remove(&ExistsEntryKey::encode_encoded(
            database_id,
            object_store_id,
            &record.encoded_primary_key,
        ))?;
        Ok(())
    }

    /// Removes every key the object store's prefix owns: records, exists
    /// entries, and index entries.
    pub fn clear_object_store(
        &self,
        txn: &Transaction<S>,
        database_id: i64,
        object_store_id: i64,
    ) -> Result<()> {
        if !KeyPrefix::valid_ids(database_id, object_store_id) {
            return Err(Error::InvalidId { database_id, object_store_id, index_id: 0 });
        }
        let start_key = KeyPrefix::new(database_id, object_store_id, 0).encode();
        let stop_key = KeyPrefix::new(database_id, object_store_id + 1, 0).encode();
        delete_range(txn.raw(), &start_key, &stop_key)
    }

    /// Checks for a record at `key`, returning its identifier when present.
    pub fn key_exists_in_object_store(
        &self,
        txn: &Transaction<S>,
        database_id: i64,
        object_store_id: i64,
        key: &Key,
    ) -> Result<Option<RecordIdentifier>> {
        if !KeyPrefix::valid_ids(database_id, object_store_id) {
            return Err(Error::InvalidId { database_id, object_store_id, index_id: 0 });
        }
        let data_key = ObjectStoreDataKey::encode(database_id, object_store_id, key);
        let Some(data) = txn.raw().get(&data_key)? else {
            return Ok(None);
        };

        let mut slice = data.as_slice();
        let Some(version) = keys::decode_var_int(&mut slice) else {
            return Err(self.read_error(ErrorSite::KeyExistsInObjectStore));
        };
        Ok(Some(RecordIdentifier::new(keys::encode_key(key), version)))
    }

    // ========================================================================
    // Key generator
    // ========================================================================

    /// Current key-generator value for an object store.
    ///
    /// Stores written before the explicit counter existed derive it from
    /// the largest numeric primary key present, plus one.
    pub fn get_key_generator_current_number(
        &self,
        txn: &Transaction<S>,
        database_id: i64,
        object_store_id: i64,
    ) -> Result<i64> {
        if !KeyPrefix::valid_ids(database_id, object_store_id) {
            return Err(Error::InvalidId { database_id, object_store_id, index_id: 0 });
        }
        let raw = txn.raw();
        let counter_key = ObjectStoreMetaDataKey::encode(
            database_id,
            object_store_id,
            ObjectStoreMetaDataKey::KEY_GENERATOR_CURRENT_NUMBER,
        );
        if let Some(current) = get_int(raw, &counter_key)? {
            return Ok(current);
        }

        let start_key =
            ObjectStoreDataKey::encode_encoded(database_id, object_store_id, &keys::min_key_bytes());
        let stop_key =
            ObjectStoreDataKey::encode_encoded(database_id, object_store_id, &keys::max_key_bytes());

        let mut max_numeric_key: i64 = 0;
        let mut it = raw.iterator();
        it.seek(&start_key);
        while it.is_valid() && keys::compare(it.key(), &stop_key, false) == Ordering::Less {
            let mut slice = it.key();
            if let Some(data_key) = ObjectStoreDataKey::decode(&mut slice) {
                if let Key::Number(value) = data_key.user_key {
                    let value = value as i64;
                    if value > max_numeric_key {
                        max_numeric_key = value;
                    }
                }
            }
            it.next();
        }
        Ok(max_numeric_key + 1)
    }

    /// Advances the key generator to `new_number` when it is ahead of the
    /// current value; never regresses it.
    pub fn maybe_update_key_generator_current_number(
        &self,
        txn: &Transaction<S>,
        database_id: i64,
        object_store_id: i64,
        new_number: i64,
        check_current: bool,
    ) -> Result<()> {
        if !KeyPrefix::valid_ids(database_id, object_store_id) {
            return Err(Error::InvalidId { database_id, object_store_id, index_id: 0 });
        }
        if check_current {
            let current =
                self.get_key_generator_current_number(txn, database_id, object_store_id)?;
            if new_number <= current {
                return Ok(());
            }
        }
        put_int(
            txn.raw(),
            &ObjectStoreMetaDataKey::encode(
                database_id,
                object_store_id,
                ObjectStoreMetaDataKey::KEY_GENERATOR_CURRENT_NUMBER,
            ),
            new_number,
        )
    }

    // ========================================================================
    // Indexes
    // ========================================================================

    /// Loads the indexes of an object store, keyed by id.
    pub fn get_indexes(
        &self,
        database_id: i64,
        object_store_id: i64,
    ) -> Result<BTreeMap<i64, IndexMetadata>> {
        if !KeyPrefix::valid_ids(database_id, object_store_id) {
            return Err(Error::InvalidId { database_id, object_store_id, index_id: 0 });
        }
        let start_key = IndexMetaDataKey::encode(database_id, object_store_id, 0, 0);
        let stop_key = IndexMetaDataKey::encode(database_id, object_store_id + 1, 0, 0);

        let mut indexes = BTreeMap::new();
        let mut it = self.store.iterator();
        it.seek(&start_key);
        while it.is_valid() && keys::compare(it.key(), &stop_key, false) == Ordering::Less {
            let mut slice = it.key();
            let meta_key = match IndexMetaDataKey::decode(&mut slice) {
                Some(meta_key) if meta_key.meta_type == IndexMetaDataKey::NAME => meta_key,
                _ => {
                    // Possibly stale metadata; skip rather than fail the load.
                    self.report_consistency(ErrorSite::GetIndexes);
                    it.next();
                    continue;
                }
            };
            let index_id = meta_key.index_id;
            let Some(name) = keys::decode_string(it.value()) else {
                return Err(self.read_error(ErrorSite::GetIndexes));
            };

            it.next();
            if !check_index_meta(&it, &stop_key, index_id, IndexMetaDataKey::UNIQUE) {
                self.report_consistency(ErrorSite::GetIndexes);
                break;
            }
            let unique = keys::decode_bool(it.value());

            it.next();
            if !check_index_meta(&it, &stop_key, index_id, IndexMetaDataKey::KEY_PATH) {
                self.report_consistency(ErrorSite::GetIndexes);
                break;
            }
            let Some(key_path) = keys::decode_key_path(it.value()) else {
                return Err(self.read_error(ErrorSite::GetIndexes));
            };

            it.next(); // optional multi-entry row
            let mut multi_entry = false;
            if check_index_meta(&it, &stop_key, index_id, IndexMetaDataKey::MULTI_ENTRY) {
                multi_entry = keys::decode_bool(it.value());
                it.next();
            }

            indexes.insert(
                index_id,
                IndexMetadata { id: index_id, name, key_path, unique, multi_entry },
            );
        }
        Ok(indexes)
    }

    fn set_max_index_id(
        &self,
        txn: &S::Transaction,
        database_id: i64,
        object_store_id: i64,
        index_id: i64,
    ) -> Result<()> {
        let max_key = ObjectStoreMetaDataKey::encode(
            database_id,
            object_store_id,
            ObjectStoreMetaDataKey::MAX_INDEX_ID,
        );
        let max_index_id = get_int(txn, &max_key)?.unwrap_or(KeyPrefix::MINIMUM_INDEX_ID);
        if index_id <= max_index_id {
            return Err(self.consistency_error(ErrorSite::SetMaxIndexId));
        }
        put_int(txn, &max_key, index_id)
    }

    /// Creates an index and writes its metadata rows.
    #[allow(clippy::too_many_arguments)]
    pub fn create_index(
        &self,
        txn: &Transaction<S>,
        database_id: i64,
        object_store_id: i64,
        index_id: i64,
        name: &str,
        key_path: &KeyPath,
        unique: bool,
        multi_entry: bool,
    ) -> Result<()> {
        if !KeyPrefix::valid_ids_with_index(database_id, object_store_id, index_id) {
            return Err(Error::InvalidId { database_id, object_store_id, index_id });
        }
        let raw = txn.raw();
        self.set_max_index_id(raw, database_id, object_store_id, index_id)?;

        let meta =
            |meta_type| IndexMetaDataKey::encode(database_id, object_store_id, index_id, meta_type);
        put_string(raw, &meta(IndexMetaDataKey::NAME), name)?;
        put_bool(raw, &meta(IndexMetaDataKey::UNIQUE), unique)?;
        put_key_path(raw, &meta(IndexMetaDataKey::KEY_PATH), key_path)?;
        put_bool(raw, &meta(IndexMetaDataKey::MULTI_ENTRY), multi_entry)?;
        Ok(())
    }

    /// Deletes an index: metadata rows and every index entry.
    pub fn delete_index(
        &self,
        txn: &Transaction<S>,
        database_id: i64,
        object_store_id: i64,
        index_id: i64,
    ) -> Result<()> {
        if !KeyPrefix::valid_ids_with_index(database_id, object_store_id, index_id) {
            return Err(Error::InvalidId { database_id, object_store_id, index_id });
        }
        let raw = txn.raw();

        delete_range(
            raw,
            &IndexMetaDataKey::encode(database_id, object_store_id, index_id, 0),
            &IndexMetaDataKey::encode_max_for_index(database_id, object_store_id, index_id),
        )?;
        delete_range(
            raw,
            &IndexDataKey::encode_min_key(database_id, object_store_id, index_id),
            &IndexDataKey::encode_max_key(database_id, object_store_id, index_id),
        )?;
        Ok(())
    }

    /// Writes the index entry mapping `key` to a record revision.
    pub fn put_index_data_for_record(
        &self,
        txn: &Transaction<S>,
        database_id: i64,
        object_store_id: i64,
        index_id: i64,
        key: &Key,
        record: &RecordIdentifier,
    ) -> Result<()> {
        if !KeyPrefix::valid_ids_with_index(database_id, object_store_id, index_id) {
            return Err(Error::InvalidId { database_id, object_store_id, index_id });
        }
        if !key.is_valid() {
            return Err(Error::InvalidKey);
        }

        let index_data_key = IndexDataKey::encode(
            database_id,
            object_store_id,
            index_id,
            &keys::encode_key(key),
            &record.encoded_primary_key,
        );
        let mut data = keys::encode_var_int(record.version);
        data.extend_from_slice(&record.encoded_primary_key);
        txn.raw().put(&index_data_key, &data)?;
        Ok(())
    }

    fn version_exists(
        &self,
        txn: &S::Transaction,
        database_id: i64,
        object_store_id: i64,
        version: i64,
        encoded_primary_key: &[u8],
    ) -> Result<bool> {
        let exists_key =
            ExistsEntryKey::encode_encoded(database_id, object_store_id, encoded_primary_key);
        let Some(data) = txn.get(&exists_key)? else {
            return Ok(false);
        };
        Ok(keys::decode_int(&data) == Some(version))
    }

    /// First live index entry at `key`, as an encoded primary key.
    ///
    /// Entries whose version no longer matches the referenced record are
    /// stale; each one encountered is deleted in place and the scan
    /// continues. This lazy repair is what keeps indexes consistent with
    /// primary data without eager cross-updates on every write.
    fn find_key_in_index(
        &self,
        txn: &S::Transaction,
        database_id: i64,
        object_store_id: i64,
        index_id: i64,
        key: &Key,
    ) -> Result<Option<Vec<u8>>> {
        debug_assert!(KeyPrefix::valid_ids_with_index(database_id, object_store_id, index_id));

        let target = IndexDataKey::encode_user_key(database_id, object_store_id, index_id, key);
        let mut it = txn.iterator();
        it.seek(&target);

        loop {
            if !it.is_valid() {
                return Ok(None);
            }
            if keys::compare(it.key(), &target, true) == Ordering::Greater {
                return Ok(None);
            }

            let mut value_slice = it.value();
            let Some(version) = keys::decode_var_int(&mut value_slice) else {
                return Err(self.read_error(ErrorSite::FindKeyInIndex));
            };
            let encoded_primary_key = value_slice.to_vec();

            if !self.version_exists(
                txn,
                database_id,
                object_store_id,
                version,
                &encoded_primary_key,
            )? {
                tracing::debug!(database_id, object_store_id, index_id, "removing stale index entry");
                txn.remove(it.key())?;
                it.next();
                continue;
            }
            return Ok(Some(encoded_primary_key));
        }
    }

    /// Resolves an index key to the primary key of its first live entry.
    pub fn get_primary_key_via_index(
        &self,
        txn: &Transaction<S>,
        database_id: i64,
        object_store_id: i64,
        index_id: i64,
        key: &Key,
    ) -> Result<Option<Key>> {
        if !KeyPrefix::valid_ids_with_index(database_id, object_store_id, index_id) {
            return Err(Error::InvalidId { database_id, object_store_id, index_id });
        }
        let Some(encoded) =
            self.find_key_in_index(txn.raw(), database_id, object_store_id, index_id, key)?
        else {
            return Ok(None);
        };
        let mut slice = encoded.as_slice();
        let Some(primary_key) = keys::decode_key(&mut slice) else {
            return Err(self.read_error(ErrorSite::GetPrimaryKeyViaIndex));
        };
        Ok(Some(primary_key))
    }

    /// Whether any live entry exists for `index_key`, and its primary key.
    pub fn key_exists_in_index(
        &self,
        txn: &Transaction<S>,
        database_id: i64,
        object_store_id: i64,
        index_id: i64,
        index_key: &Key,
    ) -> Result<Option<Key>> {
        if !KeyPrefix::valid_ids_with_index(database_id, object_store_id, index_id) {
            return Err(Error::InvalidId { database_id, object_store_id, index_id });
        }
        let Some(encoded) =
            self.find_key_in_index(txn.raw(), database_id, object_store_id, index_id, index_key)?
        else {
            return Ok(None);
        };
        let mut slice = encoded.as_slice();
        let Some(primary_key) = keys::decode_key(&mut slice) else {
            return Err(self.read_error(ErrorSite::KeyExistsInIndex));
        };
        Ok(Some(primary_key))
    }

    // ========================================================================
    // Cursors
    // ========================================================================

    /// Opens a key+value cursor over an object store's records.
    /// `None` when the range holds no rows.
    pub fn open_object_store_cursor<'t>(
        &self,
        txn: &'t Transaction<S>,
        database_id: i64,
        object_store_id: i64,
        range: &KeyRange,
        direction: CursorDirection,
    ) -> Result<Option<ObjectStoreCursor<'t, S>>> {
        if !KeyPrefix::valid_ids(database_id, object_store_id) {
            return Err(Error::InvalidId { database_id, object_store_id, index_id: 0 });
        }
        let raw = txn.raw();
        let Some(options) =
            cursor::object_store_cursor_options(raw, database_id, object_store_id, range, direction)
        else {
            return Ok(None);
        };
        Ok(Cursor::open(raw, options, Arc::clone(&self.observer)))
    }

    /// Opens a key-only cursor over an object store's records.
    pub fn open_object_store_key_cursor<'t>(
        &self,
        txn: &'t Transaction<S>,
        database_id: i64,
        object_store_id: i64,
        range: &KeyRange,
        direction: CursorDirection,
    ) -> Result<Option<ObjectStoreKeyCursor<'t, S>>> {
        if !KeyPrefix::valid_ids(database_id, object_store_id) {
            return Err(Error::InvalidId { database_id, object_store_id, index_id: 0 });
        }
        let raw = txn.raw();
        let Some(options) =
            cursor::object_store_cursor_options(raw, database_id, object_store_id, range, direction)
        else {
            return Ok(None);
        };
        Ok(Cursor::open(raw, options, Arc::clone(&self.observer)))
    }

    /// Opens a cursor over an index, yielding referenced record values.
    pub fn open_index_cursor<'t>(
        &self,
        txn: &'t Transaction<S>,
        database_id: i64,
        object_store_id: i64,
        index_id: i64,
        range: &KeyRange,
        direction: CursorDirection,
    ) -> Result<Option<IndexCursor<'t, S>>> {
        if !KeyPrefix::valid_ids_with_index(database_id, object_store_id, index_id) {
            return Err(Error::InvalidId { database_id, object_store_id, index_id });
        }
        let raw = txn.raw();
        let Some(options) = cursor::index_cursor_options(
            raw,
            database_id,
            object_store_id,
            index_id,
            range,
            direction,
        ) else {
            return Ok(None);
        };
        Ok(Cursor::open(raw, options, Arc::clone(&self.observer)))
    }

    /// Opens a key-only cursor over an index.
    pub fn open_index_key_cursor<'t>(
        &self,
        txn: &'t Transaction<S>,
        database_id: i64,
        object_store_id: i64,
        index_id: i64,
        range: &KeyRange,
        direction: CursorDirection,
    ) -> Result<Option<IndexKeyCursor<'t, S>>> {
        if !KeyPrefix::valid_ids_with_index(database_id, object_store_id, index_id) {
            return Err(Error::InvalidId { database_id, object_store_id, index_id });
        }
        let raw = txn.raw();
        let Some(options) = cursor::index_cursor_options(
            raw,
            database_id,
            object_store_id,
            index_id,
            range,
            direction,
        ) else {
            return Ok(None);
        };
        Ok(Cursor::open(raw, options, Arc::clone(&self.observer)))
    }
}

/// Backing store over the in-memory engine.
pub type MemoryBackingStore = BackingStore<MemoryStore<KeyspaceComparator>>;

impl MemoryBackingStore {
    /// Opens a fresh in-memory backing store for `origin`. Useful for tests
    /// and ephemeral workloads; data is lost on drop.
    pub fn open_in_memory(origin: &str) -> Result<Self> {
        let backing = Self {
            origin: origin.to_string(),
            store: MemoryStore::new(),
            observer: Arc::new(NoopObserver),
        };
        backing.set_up_metadata()?;
        Ok(backing)
    }
}
