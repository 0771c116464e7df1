//! Cursor semantics: range bounds, direction, duplicate skipping, and the
//! reverse-unique recovery walk.

use strata_db::{
    CursorDirection, Key, KeyPath, KeyRange, MemoryBackingStore, ObjectStoreCursor, Transaction,
};
use strata_store::{KeyComparator, MemoryStore, OrderedStore};

type Store = MemoryStore<strata_db::KeyspaceComparator>;

const ORIGIN: &str = "https://app.example";

/// Store with one database (id 1), one object store (id 1) holding records
/// 1..=5, and one index (id 31) mapping "x"→{1,2}, "y"→{3}, "z"→{4,5}.
fn seeded() -> (MemoryBackingStore, i64) {
    let store = MemoryBackingStore::open_in_memory(ORIGIN).expect("open");
    let db_id = store.create_database_metadata("app", "", None).expect("create db");

    let txn = store.begin_transaction();
    store
        .create_object_store(&txn, db_id, 1, "records", &KeyPath::None, false)
        .expect("create store");
    store
        .create_index(&txn, db_id, 1, 31, "by_tag", &KeyPath::Single("tag".into()), false, false)
        .expect("create index");

    let tags = ["x", "x", "y", "z", "z"];
    for (i, tag) in tags.iter().enumerate() {
        let primary = Key::Number((i + 1) as f64);
        let value = format!("v{}", i + 1);
        let record = store.put_record(&txn, db_id, 1, &primary, value.as_bytes()).expect("put");
        store
            .put_index_data_for_record(&txn, db_id, 1, 31, &Key::String((*tag).into()), &record)
            .expect("index put");
    }
    txn.commit().expect("commit");
    (store, db_id)
}

fn number(value: f64) -> Key {
    Key::Number(value)
}

fn collect_keys(cursor: &mut ObjectStoreCursor<'_, Store>) -> Vec<f64> {
    let mut keys = Vec::new();
    loop {
        match cursor.key() {
            Some(Key::Number(value)) => keys.push(*value),
            other => panic!("unexpected cursor key {other:?}"),
        }
        if !cursor.continue_to(None) {
            return keys;
        }
    }
}

fn object_store_keys(
    store: &MemoryBackingStore,
    txn: &Transaction<Store>,
    db_id: i64,
    range: &KeyRange,
    direction: CursorDirection,
) -> Vec<f64> {
    match store.open_object_store_cursor(txn, db_id, 1, range, direction).expect("open") {
        Some(mut cursor) => collect_keys(&mut cursor),
        None => Vec::new(),
    }
}

#[test]
fn test_forward_unbounded() {
    let (store, db_id) = seeded();
    let txn = store.begin_transaction();
    let keys = object_store_keys(&store, &txn, db_id, &KeyRange::all(), CursorDirection::Next);
    assert_eq!(keys, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
}

#[test]
fn test_forward_closed_lower_open_upper() {
    let (store, db_id) = seeded();
    let txn = store.begin_transaction();
    // [2, 4) yields exactly 2 and 3, ascending.
    let range = KeyRange::bound(number(2.0), number(4.0), false, true);
    let keys = object_store_keys(&store, &txn, db_id, &range, CursorDirection::Next);
    assert_eq!(keys, vec![2.0, 3.0]);
}

#[test]
fn test_forward_open_lower() {
    let (store, db_id) = seeded();
    let txn = store.begin_transaction();
    let range = KeyRange::bound(number(2.0), number(4.0), true, false);
    let keys = object_store_keys(&store, &txn, db_id, &range, CursorDirection::Next);
    assert_eq!(keys, vec![3.0, 4.0]);
}

#[test]
fn test_forward_lower_bound_only() {
    let (store, db_id) = seeded();
    let txn = store.begin_transaction();
    let range = KeyRange::lower_bound(number(2.0), false);
    let keys = object_store_keys(&store, &txn, db_id, &range, CursorDirection::Next);
    assert_eq!(keys, vec![2.0, 3.0, 4.0, 5.0]);
}

#[test]
fn test_forward_bound_between_keys() {
    let (store, db_id) = seeded();
    let txn = store.begin_transaction();
    let range = KeyRange::bound(number(1.5), number(4.5), false, false);
    let keys = object_store_keys(&store, &txn, db_id, &range, CursorDirection::Next);
    assert_eq!(keys, vec![2.0, 3.0, 4.0]);
}

#[test]
fn test_reverse_unbounded() {
    let (store, db_id) = seeded();
    let txn = store.begin_transaction();
    let keys = object_store_keys(&store, &txn, db_id, &KeyRange::all(), CursorDirection::Prev);
    assert_eq!(keys, vec![5.0, 4.0, 3.0, 2.0, 1.0]);
}

#[test]
fn test_reverse_closed_bounds() {
    let (store, db_id) = seeded();
    let txn = store.begin_transaction();
    let range = KeyRange::bound(number(2.0), number(4.0), false, false);
    let keys = object_store_keys(&store, &txn, db_id, &range, CursorDirection::Prev);
    assert_eq!(keys, vec![4.0, 3.0, 2.0]);
}

#[test]
fn test_reverse_open_upper_starts_below_bound() {
    let (store, db_id) = seeded();
    let txn = store.begin_transaction();
    let range = KeyRange::bound(number(1.0), number(5.0), false, true);
    let keys = object_store_keys(&store, &txn, db_id, &range, CursorDirection::Prev);
    assert_eq!(keys, vec![4.0, 3.0, 2.0, 1.0]);
}

#[test]
fn test_reverse_upper_between_keys() {
    let (store, db_id) = seeded();
    let txn = store.begin_transaction();
    // The bound key does not exist; the cursor starts from the greatest
    // existing key below it.
    let range = KeyRange::upper_bound(number(3.5), false);
    let keys = object_store_keys(&store, &txn, db_id, &range, CursorDirection::Prev);
    assert_eq!(keys, vec![3.0, 2.0, 1.0]);
}

#[test]
fn test_empty_range_yields_no_cursor() {
    let (store, db_id) = seeded();
    let txn = store.begin_transaction();
    let range = KeyRange::bound(number(10.0), number(20.0), false, false);
    let cursor = store
        .open_object_store_cursor(&txn, db_id, 1, &range, CursorDirection::Next)
        .expect("open");
    assert!(cursor.is_none());
}

#[test]
fn test_empty_store_yields_no_cursor() {
    let store = MemoryBackingStore::open_in_memory(ORIGIN).expect("open");
    let db_id = store.create_database_metadata("app", "", None).expect("create db");
    let txn = store.begin_transaction();
    store
        .create_object_store(&txn, db_id, 1, "records", &KeyPath::None, false)
        .expect("create store");

    for direction in [CursorDirection::Next, CursorDirection::Prev] {
        let cursor = store
            .open_object_store_cursor(&txn, db_id, 1, &KeyRange::all(), direction)
            .expect("open");
        assert!(cursor.is_none(), "{direction:?}");
    }
}

#[test]
fn test_exhausted_cursor_stays_exhausted() {
    let (store, db_id) = seeded();
    let txn = store.begin_transaction();
    let range = KeyRange::only(number(5.0));
    let mut cursor = store
        .open_object_store_cursor(&txn, db_id, 1, &range, CursorDirection::Next)
        .expect("open")
        .expect("non-empty");
    assert!(!cursor.continue_to(None));
    assert!(!cursor.continue_to(None));
    assert!(cursor.key().is_none());
}

#[test]
fn test_values_and_record_identifiers() {
    let (store, db_id) = seeded();
    let txn = store.begin_transaction();
    let cursor = store
        .open_object_store_cursor(&txn, db_id, 1, &KeyRange::all(), CursorDirection::Next)
        .expect("open")
        .expect("non-empty");
    assert_eq!(cursor.value(), Some(&b"v1"[..]));
    assert_eq!(cursor.key(), cursor.primary_key());
    let record = cursor.record_identifier().expect("record");
    assert!(record.version > 0);
}

#[test]
fn test_key_cursor_has_no_value() {
    let (store, db_id) = seeded();
    let txn = store.begin_transaction();
    let cursor = store
        .open_object_store_key_cursor(&txn, db_id, 1, &KeyRange::all(), CursorDirection::Next)
        .expect("open")
        .expect("non-empty");
    assert_eq!(cursor.key(), Some(&number(1.0)));
    assert_eq!(cursor.value(), None);
}

#[test]
fn test_continue_to_target_key() {
    let (store, db_id) = seeded();
    let txn = store.begin_transaction();
    let mut cursor = store
        .open_object_store_cursor(&txn, db_id, 1, &KeyRange::all(), CursorDirection::Next)
        .expect("open")
        .expect("non-empty");
    assert_eq!(cursor.key(), Some(&number(1.0)));

    // Jump to the first key at or past the target.
    assert!(cursor.continue_to(Some(&number(3.5))));
    assert_eq!(cursor.key(), Some(&number(4.0)));
}

#[test]
fn test_advance_steps_and_reports_exhaustion() {
    let (store, db_id) = seeded();
    let txn = store.begin_transaction();
    let mut cursor = store
        .open_object_store_cursor(&txn, db_id, 1, &KeyRange::all(), CursorDirection::Next)
        .expect("open")
        .expect("non-empty");
    assert!(cursor.advance(3));
    assert_eq!(cursor.key(), Some(&number(4.0)));
    assert!(!cursor.advance(5));
}

#[test]
fn test_clone_iterates_independently() {
    let (store, db_id) = seeded();
    let txn = store.begin_transaction();
    let mut cursor = store
        .open_object_store_cursor(&txn, db_id, 1, &KeyRange::all(), CursorDirection::Next)
        .expect("open")
        .expect("non-empty");

    let mut clone = cursor.clone();
    assert!(cursor.continue_to(None));
    assert_eq!(cursor.key(), Some(&number(2.0)));

    // The clone kept its own position and iterator.
    assert_eq!(clone.key(), Some(&number(1.0)));
    assert!(clone.continue_to(None));
    assert_eq!(clone.key(), Some(&number(2.0)));
}

// ============================================================================
// Index cursors
// ============================================================================

fn collect_index_rows<'t, T, R>(cursor: &mut strata_db::Cursor<'t, T, R>) -> Vec<(String, f64)>
where
    T: strata_store::StoreTransaction,
    R: strata_db::RowCodec,
{
    let mut rows = Vec::new();
    loop {
        let key = match cursor.key() {
            Some(Key::String(tag)) => tag.clone(),
            other => panic!("unexpected index key {other:?}"),
        };
        let primary = match cursor.primary_key() {
            Some(Key::Number(value)) => *value,
            other => panic!("unexpected primary key {other:?}"),
        };
        rows.push((key, primary));
        if !cursor.continue_to(None) {
            return rows;
        }
    }
}

#[test]
fn test_index_forward_orders_duplicates_by_primary_key() {
    let (store, db_id) = seeded();
    let txn = store.begin_transaction();
    let mut cursor = store
        .open_index_cursor(&txn, db_id, 1, 31, &KeyRange::all(), CursorDirection::Next)
        .expect("open")
        .expect("non-empty");
    let rows = collect_index_rows(&mut cursor);
    assert_eq!(
        rows,
        vec![
            ("x".to_string(), 1.0),
            ("x".to_string(), 2.0),
            ("y".to_string(), 3.0),
            ("z".to_string(), 4.0),
            ("z".to_string(), 5.0),
        ]
    );
}

#[test]
fn test_index_cursor_yields_record_values() {
    let (store, db_id) = seeded();
    let txn = store.begin_transaction();
    let cursor = store
        .open_index_cursor(&txn, db_id, 1, 31, &KeyRange::all(), CursorDirection::Next)
        .expect("open")
        .expect("non-empty");
    // First row is ("x", 1) and carries record 1's value.
    assert_eq!(cursor.value(), Some(&b"v1"[..]));
}

#[test]
fn test_index_forward_unique_skips_duplicates() {
    let (store, db_id) = seeded();
    let txn = store.begin_transaction();
    let mut cursor = store
        .open_index_cursor(&txn, db_id, 1, 31, &KeyRange::all(), CursorDirection::NextNoDuplicate)
        .expect("open")
        .expect("non-empty");
    let rows = collect_index_rows(&mut cursor);
    assert_eq!(
        rows,
        vec![("x".to_string(), 1.0), ("y".to_string(), 3.0), ("z".to_string(), 4.0)]
    );
}

#[test]
fn test_index_reverse_walks_duplicates_backwards() {
    let (store, db_id) = seeded();
    let txn = store.begin_transaction();
    let mut cursor = store
        .open_index_cursor(&txn, db_id, 1, 31, &KeyRange::all(), CursorDirection::Prev)
        .expect("open")
        .expect("non-empty");
    let rows = collect_index_rows(&mut cursor);
    assert_eq!(
        rows,
        vec![
            ("z".to_string(), 5.0),
            ("z".to_string(), 4.0),
            ("y".to_string(), 3.0),
            ("x".to_string(), 2.0),
            ("x".to_string(), 1.0),
        ]
    );
}

#[test]
fn test_index_reverse_unique_yields_first_of_each_run() {
    let (store, db_id) = seeded();
    let txn = store.begin_transaction();
    let mut cursor = store
        .open_index_key_cursor(
            &txn,
            db_id,
            1,
            31,
            &KeyRange::all(),
            CursorDirection::PrevNoDuplicate,
        )
        .expect("open")
        .expect("non-empty");
    // Physically reverse, but each duplicate run yields its first entry in
    // forward order, including the run at the very start of the range.
    let rows = collect_index_rows(&mut cursor);
    assert_eq!(
        rows,
        vec![("z".to_string(), 4.0), ("y".to_string(), 3.0), ("x".to_string(), 1.0)]
    );
}

#[test]
fn test_index_range_bounds_apply_to_index_keys() {
    let (store, db_id) = seeded();
    let txn = store.begin_transaction();
    let range = KeyRange::bound(
        Key::String("x".into()),
        Key::String("y".into()),
        false,
        false,
    );
    let mut cursor = store
        .open_index_cursor(&txn, db_id, 1, 31, &range, CursorDirection::Next)
        .expect("open")
        .expect("non-empty");
    let rows = collect_index_rows(&mut cursor);
    assert_eq!(
        rows,
        vec![("x".to_string(), 1.0), ("x".to_string(), 2.0), ("y".to_string(), 3.0)]
    );
}

#[test]
fn test_index_range_open_upper_excludes_run() {
    let (store, db_id) = seeded();
    let txn = store.begin_transaction();
    let range = KeyRange::bound(
        Key::String("x".into()),
        Key::String("z".into()),
        false,
        true,
    );
    let mut cursor = store
        .open_index_cursor(&txn, db_id, 1, 31, &range, CursorDirection::Next)
        .expect("open")
        .expect("non-empty");
    let rows = collect_index_rows(&mut cursor);
    assert_eq!(
        rows,
        vec![("x".to_string(), 1.0), ("x".to_string(), 2.0), ("y".to_string(), 3.0)]
    );
}

#[test]
fn test_index_reverse_over_range_with_duplicates() {
    let (store, db_id) = seeded();
    let txn = store.begin_transaction();
    let range = KeyRange::upper_bound(Key::String("y".into()), false);
    let mut cursor = store
        .open_index_cursor(&txn, db_id, 1, 31, &range, CursorDirection::PrevNoDuplicate)
        .expect("open")
        .expect("non-empty");
    let rows = collect_index_rows(&mut cursor);
    assert_eq!(rows, vec![("y".to_string(), 3.0), ("x".to_string(), 1.0)]);
}

#[test]
fn test_cursor_skips_stale_index_entries() {
    let (store, db_id) = seeded();
    let txn = store.begin_transaction();
    // Overwrite record 3 ("y"); its index entry goes stale.
    store.put_record(&txn, db_id, 1, &number(3.0), b"v3'").expect("put");

    let mut cursor = store
        .open_index_cursor(&txn, db_id, 1, 31, &KeyRange::all(), CursorDirection::Next)
        .expect("open")
        .expect("non-empty");
    let rows = collect_index_rows(&mut cursor);
    assert_eq!(
        rows,
        vec![
            ("x".to_string(), 1.0),
            ("x".to_string(), 2.0),
            ("z".to_string(), 4.0),
            ("z".to_string(), 5.0),
        ]
    );
}

// Exercise the comparator as installed into the store engine, end to end.
#[test]
fn test_keyspace_comparator_drives_iteration_order() {
    use strata_db::keys::ObjectStoreDataKey;
    use strata_store::{StoreIterator, StoreTransaction};

    assert_eq!(strata_db::KeyspaceComparator::NAME, "strata_keyspace_v1");

    let store: Store = MemoryStore::new();
    let txn = store.begin_transaction();
    // 10 sorts after 9 numerically even though its encoded bytes do not.
    for value in [10.0, 9.0, 2.0] {
        let key = ObjectStoreDataKey::encode(1, 1, &Key::Number(value));
        txn.put(&key, b"v").expect("put");
    }

    let mut seen = Vec::new();
    let mut it = txn.iterator();
    it.seek(&ObjectStoreDataKey::encode_encoded(1, 1, &strata_db::keys::min_key_bytes()));
    while it.is_valid() {
        let mut slice = it.key();
        let data_key = ObjectStoreDataKey::decode(&mut slice).expect("decode");
        match data_key.user_key {
            Key::Number(value) => seen.push(value),
            other => panic!("unexpected key {other:?}"),
        }
        it.next();
    }
    assert_eq!(seen, vec![2.0, 9.0, 10.0]);
}
