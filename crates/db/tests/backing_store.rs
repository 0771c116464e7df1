//! End-to-end tests for schema metadata, record CRUD, the key generator,
//! and index consistency.

use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use strata_db::keys::{ObjectStoreMetaDataKey, SchemaVersionKey};
use strata_db::{
    keys, BackingStore, Error, Key, KeyPath, KeyspaceComparator, MemoryBackingStore, OpenOptions,
};
use strata_store::{
    MemoryFactory, MemoryStore, OrderedStore, StoreFactory, StoreRead, StoreTransaction,
};

const DB_NAME: &str = "app";
const ORIGIN: &str = "https://app.example";

/// Opens a fresh store with one database and one object store (id 1).
fn fresh_store() -> (MemoryBackingStore, i64) {
    let store = MemoryBackingStore::open_in_memory(ORIGIN).expect("open");
    let db_id = store.create_database_metadata(DB_NAME, "", None).expect("create db");
    let txn = store.begin_transaction();
    store
        .create_object_store(&txn, db_id, 1, "records", &KeyPath::None, false)
        .expect("create store");
    txn.commit().expect("commit");
    (store, db_id)
}

#[test]
fn test_put_then_get_roundtrip() {
    let (store, db_id) = fresh_store();
    let txn = store.begin_transaction();
    store.put_record(&txn, db_id, 1, &Key::Number(1.0), b"a").expect("put");
    assert_eq!(
        store.get_record(&txn, db_id, 1, &Key::Number(1.0)).expect("get"),
        Some(b"a".to_vec())
    );
    assert_eq!(store.get_record(&txn, db_id, 1, &Key::Number(2.0)).expect("get"), None);
    txn.commit().expect("commit");
}

#[test]
fn test_overwrite_replaces_value_and_bumps_version() {
    let (store, db_id) = fresh_store();
    let txn = store.begin_transaction();

    let first = store.put_record(&txn, db_id, 1, &Key::Number(1.0), b"a").expect("put");
    let second = store.put_record(&txn, db_id, 1, &Key::Number(1.0), b"b").expect("put");
    assert!(second.version > first.version, "versions must be strictly increasing");

    assert_eq!(
        store.get_record(&txn, db_id, 1, &Key::Number(1.0)).expect("get"),
        Some(b"b".to_vec())
    );

    // Exactly one exists entry, carrying the latest version.
    let found = store
        .key_exists_in_object_store(&txn, db_id, 1, &Key::Number(1.0))
        .expect("exists");
    assert_eq!(found, Some(second));
}

#[test]
fn test_versions_are_monotonic_across_keys() {
    let (store, db_id) = fresh_store();
    let txn = store.begin_transaction();

    let mut last_version = 0;
    for i in 0..20 {
        let key = Key::Number(f64::from(i % 5));
        let record = store.put_record(&txn, db_id, 1, &key, b"v").expect("put");
        assert!(record.version > last_version);
        last_version = record.version;
    }
}

#[test]
fn test_invalid_key_is_rejected() {
    let (store, db_id) = fresh_store();
    let txn = store.begin_transaction();
    let err = store.put_record(&txn, db_id, 1, &Key::Invalid, b"v").unwrap_err();
    assert!(matches!(err, Error::InvalidKey));
    let err = store.put_record(&txn, db_id, 1, &Key::Number(f64::NAN), b"v").unwrap_err();
    assert!(matches!(err, Error::InvalidKey));
}

#[test]
fn test_invalid_ids_are_rejected() {
    let (store, db_id) = fresh_store();
    let txn = store.begin_transaction();
    let err = store.get_record(&txn, 0, 1, &Key::Number(1.0)).unwrap_err();
    assert!(matches!(err, Error::InvalidId { .. }));
    let err = store.get_record(&txn, db_id, 0, &Key::Number(1.0)).unwrap_err();
    assert!(matches!(err, Error::InvalidId { .. }));
}

#[test]
fn test_delete_record_removes_both_entries() {
    let (store, db_id) = fresh_store();
    let txn = store.begin_transaction();
    let record = store.put_record(&txn, db_id, 1, &Key::Number(1.0), b"a").expect("put");

    store.delete_record(&txn, db_id, 1, &record).expect("delete");
    assert_eq!(store.get_record(&txn, db_id, 1, &Key::Number(1.0)).expect("get"), None);
    assert_eq!(
        store.key_exists_in_object_store(&txn, db_id, 1, &Key::Number(1.0)).expect("exists"),
        None
    );
}

#[test]
fn test_clear_object_store_removes_every_record() {
    let (store, db_id) = fresh_store();
    let txn = store.begin_transaction();
    for i in 1..=3 {
        store.put_record(&txn, db_id, 1, &Key::Number(f64::from(i)), b"v").expect("put");
    }
    store.clear_object_store(&txn, db_id, 1).expect("clear");
    for i in 1..=3 {
        assert_eq!(
            store.get_record(&txn, db_id, 1, &Key::Number(f64::from(i))).expect("get"),
            None
        );
    }
}

#[test]
fn test_delete_object_store_drops_data_and_metadata() {
    let (store, db_id) = fresh_store();
    {
        let txn = store.begin_transaction();
        store.put_record(&txn, db_id, 1, &Key::Number(1.0), b"a").expect("put");
        store
            .create_index(&txn, db_id, 1, 31, "by_name", &KeyPath::Single("name".into()), false, false)
            .expect("create index");
        txn.commit().expect("commit");
    }

    {
        let txn = store.begin_transaction();
        store.delete_object_store(&txn, db_id, 1).expect("delete store");
        txn.commit().expect("commit");
    }

    let txn = store.begin_transaction();
    assert_eq!(store.get_record(&txn, db_id, 1, &Key::Number(1.0)).expect("get"), None);
    assert!(store.get_object_stores(db_id).expect("stores").is_empty());
    assert!(store.get_indexes(db_id, 1).expect("indexes").is_empty());
}

#[test]
fn test_object_store_metadata_roundtrip() {
    let (store, db_id) = fresh_store();
    {
        let txn = store.begin_transaction();
        store
            .create_object_store(&txn, db_id, 2, "people", &KeyPath::Single("id".into()), true)
            .expect("create store");
        store
            .create_index(&txn, db_id, 2, 31, "by_email", &KeyPath::Single("email".into()), true, false)
            .expect("create index");
        store
            .create_index(
                &txn,
                db_id,
                2,
                32,
                "by_tag",
                &KeyPath::Single("tags".into()),
                false,
                true,
            )
            .expect("create index");
        txn.commit().expect("commit");
    }

    let stores = store.get_object_stores(db_id).expect("stores");
    assert_eq!(stores.len(), 2);

    let records = &stores[&1];
    assert_eq!(records.name, "records");
    assert_eq!(records.key_path, KeyPath::None);
    assert!(!records.auto_increment);
    assert!(records.indexes.is_empty());

    let people = &stores[&2];
    assert_eq!(people.name, "people");
    assert_eq!(people.key_path, KeyPath::Single("id".into()));
    assert!(people.auto_increment);
    assert_eq!(people.max_index_id, 32);
    assert_eq!(people.indexes.len(), 2);
    let by_email = &people.indexes[&31];
    assert_eq!(by_email.name, "by_email");
    assert!(by_email.unique);
    assert!(!by_email.multi_entry);
    let by_tag = &people.indexes[&32];
    assert!(!by_tag.unique);
    assert!(by_tag.multi_entry);
}

#[test]
fn test_object_store_ids_never_regress() {
    let (store, db_id) = fresh_store();
    let txn = store.begin_transaction();
    // Reusing or going backwards signals corruption.
    let err = store
        .create_object_store(&txn, db_id, 1, "again", &KeyPath::None, false)
        .unwrap_err();
    assert!(matches!(err, Error::Consistency { .. }));

    store.create_object_store(&txn, db_id, 2, "next", &KeyPath::None, false).expect("create");
}

#[test]
fn test_index_ids_never_regress() {
    let (store, db_id) = fresh_store();
    let txn = store.begin_transaction();
    store
        .create_index(&txn, db_id, 1, 31, "a", &KeyPath::Single("a".into()), false, false)
        .expect("create");
    let err = store
        .create_index(&txn, db_id, 1, 31, "b", &KeyPath::Single("b".into()), false, false)
        .unwrap_err();
    assert!(matches!(err, Error::Consistency { .. }));
}

// ============================================================================
// Databases
// ============================================================================

#[test]
fn test_database_metadata_roundtrip() {
    let store = MemoryBackingStore::open_in_memory(ORIGIN).expect("open");
    assert_eq!(store.get_database_metadata("missing").expect("get"), None);

    let id = store.create_database_metadata("notes", "1.0", None).expect("create");
    let metadata = store.get_database_metadata("notes").expect("get").expect("present");
    assert_eq!(metadata.id, id);
    assert_eq!(metadata.name, "notes");
    assert_eq!(metadata.version, "1.0");
    assert_eq!(metadata.int_version, None);
    assert_eq!(metadata.max_object_store_id, 0);

    let txn = store.begin_transaction();
    store.update_database_version(&txn, id, "2.0").expect("update");
    store.update_database_int_version(&txn, id, Some(4)).expect("update");
    txn.commit().expect("commit");

    let metadata = store.get_database_metadata("notes").expect("get").expect("present");
    assert_eq!(metadata.version, "2.0");
    assert_eq!(metadata.int_version, Some(4));
}

#[test]
fn test_database_ids_are_unique() {
    let store = MemoryBackingStore::open_in_memory(ORIGIN).expect("open");
    let first = store.create_database_metadata("one", "", None).expect("create");
    let second = store.create_database_metadata("two", "", None).expect("create");
    assert!(second > first);
}

#[test]
fn test_get_database_names_lists_only_this_origin() {
    let factory: MemoryFactory<KeyspaceComparator> = MemoryFactory::new();
    let store =
        BackingStore::open(&factory, "shared", ORIGIN, OpenOptions::default()).expect("open");
    store.create_database_metadata("beta", "", None).expect("create");
    store.create_database_metadata("alpha", "", None).expect("create");

    let other = BackingStore::open(&factory, "shared", "https://other.example", OpenOptions::default())
        .expect("open");
    other.create_database_metadata("theirs", "", None).expect("create");

    assert_eq!(store.get_database_names().expect("names"), vec!["alpha", "beta"]);
    assert_eq!(other.get_database_names().expect("names"), vec!["theirs"]);
}

#[test]
fn test_delete_database_drops_everything_it_owns() {
    let (store, db_id) = fresh_store();
    {
        let txn = store.begin_transaction();
        store.put_record(&txn, db_id, 1, &Key::Number(1.0), b"a").expect("put");
        txn.commit().expect("commit");
    }
    store.create_database_metadata("keep", "", None).expect("create");

    store.delete_database(DB_NAME).expect("delete");

    assert_eq!(store.get_database_metadata(DB_NAME).expect("get"), None);
    assert!(store.get_database_metadata("keep").expect("get").is_some());
    assert!(store.get_object_stores(db_id).expect("stores").is_empty());
    let txn = store.begin_transaction();
    assert_eq!(store.get_record(&txn, db_id, 1, &Key::Number(1.0)).expect("get"), None);

    // Deleting again is a no-op.
    store.delete_database(DB_NAME).expect("delete");
    assert!(store.get_database_metadata("keep").expect("get").is_some());
}

#[test]
fn test_database_ids_are_not_reused_after_delete() {
    let store = MemoryBackingStore::open_in_memory(ORIGIN).expect("open");
    let first = store.create_database_metadata("gone", "", None).expect("create");
    store.delete_database("gone").expect("delete");
    let second = store.create_database_metadata("new", "", None).expect("create");
    assert!(second > first);
}

// ============================================================================
// Key generator
// ============================================================================

#[test]
fn test_key_generator_starts_at_one() {
    let (store, db_id) = fresh_store();
    let txn = store.begin_transaction();
    assert_eq!(store.get_key_generator_current_number(&txn, db_id, 1).expect("get"), 1);
}

#[test]
fn test_key_generator_only_advances_when_checked() {
    let (store, db_id) = fresh_store();
    let txn = store.begin_transaction();

    store
        .maybe_update_key_generator_current_number(&txn, db_id, 1, 5, true)
        .expect("update");
    assert_eq!(store.get_key_generator_current_number(&txn, db_id, 1).expect("get"), 5);

    // A smaller number is ignored under the check...
    store
        .maybe_update_key_generator_current_number(&txn, db_id, 1, 3, true)
        .expect("update");
    assert_eq!(store.get_key_generator_current_number(&txn, db_id, 1).expect("get"), 5);

    // ...and written unconditionally without it.
    store
        .maybe_update_key_generator_current_number(&txn, db_id, 1, 2, false)
        .expect("update");
    assert_eq!(store.get_key_generator_current_number(&txn, db_id, 1).expect("get"), 2);
}

#[test]
fn test_key_generator_falls_back_to_scanning_numeric_keys() {
    let factory: MemoryFactory<KeyspaceComparator> = MemoryFactory::new();
    let store = BackingStore::open(&factory, "db", ORIGIN, OpenOptions::default()).expect("open");
    let db_id = store.create_database_metadata(DB_NAME, "", None).expect("create");
    {
        let txn = store.begin_transaction();
        store.create_object_store(&txn, db_id, 1, "records", &KeyPath::None, true).expect("create");
        store.put_record(&txn, db_id, 1, &Key::Number(3.0), b"v").expect("put");
        store.put_record(&txn, db_id, 1, &Key::Number(7.0), b"v").expect("put");
        store.put_record(&txn, db_id, 1, &Key::String("s".into()), b"v").expect("put");
        txn.commit().expect("commit");
    }

    // Simulate a store from before the explicit counter existed.
    let raw = factory.open("db").expect("open raw");
    let surgery = raw.begin_transaction();
    surgery
        .remove(&ObjectStoreMetaDataKey::encode(
            db_id,
            1,
            ObjectStoreMetaDataKey::KEY_GENERATOR_CURRENT_NUMBER,
        ))
        .expect("remove");
    surgery.commit().expect("commit");

    let txn = store.begin_transaction();
    assert_eq!(store.get_key_generator_current_number(&txn, db_id, 1).expect("get"), 8);
}

// ============================================================================
// Indexes
// ============================================================================

fn with_index(store: &MemoryBackingStore, db_id: i64) {
    let txn = store.begin_transaction();
    store
        .create_index(&txn, db_id, 1, 31, "by_name", &KeyPath::Single("name".into()), false, false)
        .expect("create index");
    txn.commit().expect("commit");
}

#[test]
fn test_index_lookup_returns_primary_key() {
    let (store, db_id) = fresh_store();
    with_index(&store, db_id);

    let txn = store.begin_transaction();
    let record = store.put_record(&txn, db_id, 1, &Key::Number(1.0), b"a").expect("put");
    store
        .put_index_data_for_record(&txn, db_id, 1, 31, &Key::String("x".into()), &record)
        .expect("index put");

    let found = store
        .key_exists_in_index(&txn, db_id, 1, 31, &Key::String("x".into()))
        .expect("lookup");
    assert_eq!(found, Some(Key::Number(1.0)));

    let found = store
        .get_primary_key_via_index(&txn, db_id, 1, 31, &Key::String("x".into()))
        .expect("lookup");
    assert_eq!(found, Some(Key::Number(1.0)));

    let missing = store
        .key_exists_in_index(&txn, db_id, 1, 31, &Key::String("y".into()))
        .expect("lookup");
    assert_eq!(missing, None);
}

#[test]
fn test_stale_index_entry_is_healed_on_lookup() {
    let (store, db_id) = fresh_store();
    with_index(&store, db_id);

    let txn = store.begin_transaction();
    let record = store.put_record(&txn, db_id, 1, &Key::Number(1.0), b"a").expect("put");
    store
        .put_index_data_for_record(&txn, db_id, 1, 31, &Key::String("x".into()), &record)
        .expect("index put");

    // Overwrite the record without refreshing the index entry.
    store.put_record(&txn, db_id, 1, &Key::Number(1.0), b"b").expect("put");

    let found = store
        .key_exists_in_index(&txn, db_id, 1, 31, &Key::String("x".into()))
        .expect("lookup");
    assert_eq!(found, None, "stale entry must not resolve");

    // The stale entry was deleted in place: a key cursor over the index
    // finds nothing left.
    let cursor = store
        .open_index_key_cursor(
            &txn,
            db_id,
            1,
            31,
            &strata_db::KeyRange::all(),
            strata_db::CursorDirection::Next,
        )
        .expect("open");
    assert!(cursor.is_none());
}

#[test]
fn test_lookup_skips_stale_entry_and_finds_live_one() {
    let (store, db_id) = fresh_store();
    with_index(&store, db_id);

    let txn = store.begin_transaction();
    let stale = store.put_record(&txn, db_id, 1, &Key::Number(1.0), b"a").expect("put");
    store
        .put_index_data_for_record(&txn, db_id, 1, 31, &Key::String("x".into()), &stale)
        .expect("index put");

    let live = store.put_record(&txn, db_id, 1, &Key::Number(2.0), b"b").expect("put");
    store
        .put_index_data_for_record(&txn, db_id, 1, 31, &Key::String("x".into()), &live)
        .expect("index put");

    // Delete record 1, leaving its index entry stale.
    store.delete_record(&txn, db_id, 1, &stale).expect("delete");

    let found = store
        .key_exists_in_index(&txn, db_id, 1, 31, &Key::String("x".into()))
        .expect("lookup");
    assert_eq!(found, Some(Key::Number(2.0)));
}

#[test]
fn test_delete_index_removes_entries() {
    let (store, db_id) = fresh_store();
    with_index(&store, db_id);

    let txn = store.begin_transaction();
    let record = store.put_record(&txn, db_id, 1, &Key::Number(1.0), b"a").expect("put");
    store
        .put_index_data_for_record(&txn, db_id, 1, 31, &Key::String("x".into()), &record)
        .expect("index put");

    store.delete_index(&txn, db_id, 1, 31).expect("delete index");
    assert!(store.get_indexes(db_id, 1).expect("indexes").is_empty());
    let found = store
        .key_exists_in_index(&txn, db_id, 1, 31, &Key::String("x".into()))
        .expect("lookup");
    assert_eq!(found, None);
}

// ============================================================================
// Open, schema versioning, recovery
// ============================================================================

#[test]
fn test_reopen_preserves_data() {
    let factory: MemoryFactory<KeyspaceComparator> = MemoryFactory::new();
    let db_id;
    {
        let store =
            BackingStore::open(&factory, "db", ORIGIN, OpenOptions::default()).expect("open");
        db_id = store.create_database_metadata(DB_NAME, "", None).expect("create");
        let txn = store.begin_transaction();
        store.create_object_store(&txn, db_id, 1, "records", &KeyPath::None, false).expect("create");
        store.put_record(&txn, db_id, 1, &Key::Number(1.0), b"a").expect("put");
        txn.commit().expect("commit");
    }

    let store = BackingStore::open(&factory, "db", ORIGIN, OpenOptions::default()).expect("open");
    let txn = store.begin_transaction();
    assert_eq!(
        store.get_record(&txn, db_id, 1, &Key::Number(1.0)).expect("get"),
        Some(b"a".to_vec())
    );
}

#[test]
fn test_unknown_schema_refuses_to_open_and_preserves_data() {
    let factory: MemoryFactory<KeyspaceComparator> = MemoryFactory::new();
    {
        let store =
            BackingStore::open(&factory, "db", ORIGIN, OpenOptions::default()).expect("open");
        store.create_database_metadata(DB_NAME, "", None).expect("create");
    }

    // A future build wrote a newer schema.
    let raw = factory.open("db").expect("open raw");
    let surgery = raw.begin_transaction();
    surgery.put(&SchemaVersionKey::encode(), &keys::encode_int(99)).expect("put");
    surgery.commit().expect("commit");

    let err = BackingStore::open(&factory, "db", ORIGIN, OpenOptions::default()).unwrap_err();
    assert!(matches!(err, Error::UnknownSchema));

    // Refusal must not destroy the store.
    let raw = factory.open("db").expect("open raw");
    let check = raw.begin_transaction();
    assert!(check.get(&SchemaVersionKey::encode()).expect("get").is_some());
}

/// Factory whose first open fails, for exercising the recovery path.
struct FlakyFactory {
    inner: MemoryFactory<KeyspaceComparator>,
    fail_next_open: AtomicBool,
    destroyed: AtomicBool,
}

impl FlakyFactory {
    fn new() -> Self {
        Self {
            inner: MemoryFactory::new(),
            fail_next_open: AtomicBool::new(true),
            destroyed: AtomicBool::new(false),
        }
    }
}

impl StoreFactory for FlakyFactory {
    type Store = MemoryStore<KeyspaceComparator>;

    fn open(&self, name: &str) -> strata_store::Result<Self::Store> {
        if self.fail_next_open.swap(false, AtomicOrdering::SeqCst) {
            return Err(strata_store::Error::Corrupted { reason: "torn header".to_string() });
        }
        self.inner.open(name)
    }

    fn destroy(&self, name: &str) -> strata_store::Result<()> {
        self.destroyed.store(true, AtomicOrdering::SeqCst);
        self.inner.destroy(name)
    }
}

#[test]
fn test_corrupt_open_recovers_by_destroy_and_reopen() {
    let factory = FlakyFactory::new();
    let store = BackingStore::open(&factory, "db", ORIGIN, OpenOptions::default()).expect("open");
    assert!(factory.destroyed.load(AtomicOrdering::SeqCst));
    // The recovered store works.
    store.create_database_metadata(DB_NAME, "", None).expect("create");
}

#[test]
fn test_corrupt_open_fails_without_recovery() {
    let factory = FlakyFactory::new();
    let options = OpenOptions::builder().recover_on_failure(false).build();
    let err = BackingStore::open(&factory, "db", ORIGIN, options).unwrap_err();
    assert!(matches!(err, Error::Store { .. }));
    assert!(!factory.destroyed.load(AtomicOrdering::SeqCst));
}

/// Observer wired into open, counting reports.
struct CountingObserver {
    reports: std::sync::atomic::AtomicUsize,
}

impl strata_db::Observer for CountingObserver {
    fn internal_error(&self, _class: strata_db::ErrorClass, _site: strata_db::ErrorSite) {
        self.reports.fetch_add(1, AtomicOrdering::SeqCst);
    }
}

#[test]
fn test_observer_sees_consistency_errors() {
    let factory: MemoryFactory<KeyspaceComparator> = MemoryFactory::new();
    let observer = Arc::new(CountingObserver { reports: std::sync::atomic::AtomicUsize::new(0) });
    let dyn_observer: Arc<dyn strata_db::Observer> = observer.clone();
    let options = OpenOptions::builder().observer(dyn_observer).build();
    let store = BackingStore::open(&factory, "db", ORIGIN, options).expect("open");
    let db_id = store.create_database_metadata(DB_NAME, "", None).expect("create");

    let txn = store.begin_transaction();
    store.create_object_store(&txn, db_id, 1, "records", &KeyPath::None, false).expect("create");
    // Id reuse is a consistency error and must be reported.
    let _ = store.create_object_store(&txn, db_id, 1, "again", &KeyPath::None, false);
    assert!(observer.reports.load(AtomicOrdering::SeqCst) > 0);
}
