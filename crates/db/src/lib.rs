//! strata-db: a transactional object/index store over an ordered
//! byte-keyed store.
//!
//! A hierarchical logical schema (databases, object stores, secondary
//! indexes, records) is mapped onto one flat sorted keyspace. Records
//! carry monotonic version stamps; secondary-index entries reference record
//! versions and are repaired lazily when they go stale, so writes never
//! fan out across indexes eagerly. Cursors iterate bounded, directional,
//! optionally duplicate-skipping sub-ranges of the keyspace.
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               BackingStore                  │
//! │ (schema, records, indexes, cursor opening)  │
//! └────────────────┬────────────────────────────┘
//!                  │
//! ┌────────────────▼────────────────────────────┐
//! │           Keyspace codec (keys)             │
//! │  (prefix partitions, ordered key encoding)  │
//! └────────────────┬────────────────────────────┘
//!                  │
//! ┌────────────────▼────────────────────────────┐
//! │        Ordered store (strata-store)         │
//! │ (get/put/delete, iterators, transactions)   │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use strata_db::{CursorDirection, Key, KeyPath, KeyRange, MemoryBackingStore};
//!
//! let store = MemoryBackingStore::open_in_memory("https://app.example")?;
//! let db_id = store.create_database_metadata("notes", "", None)?;
//!
//! let txn = store.begin_transaction();
//! store.create_object_store(&txn, db_id, 1, "notes", &KeyPath::None, false)?;
//! store.put_record(&txn, db_id, 1, &Key::Number(1.0), b"hello")?;
//!
//! if let Some(cursor) = store.open_object_store_cursor(
//!     &txn,
//!     db_id,
//!     1,
//!     &KeyRange::all(),
//!     CursorDirection::Next,
//! )? {
//!     assert_eq!(cursor.value(), Some(&b"hello"[..]));
//! }
//! txn.commit()?;
//! # Ok::<(), strata_db::Error>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cursor;
pub mod db;
pub mod error;
pub mod key;
pub mod keys;
pub mod metadata;
pub mod observe;
pub mod txn;

pub use cursor::{Cursor, CursorDirection, CursorOptions, KeyRange, RowCodec};
pub use db::{
    BackingStore, IndexCursor, IndexKeyCursor, MemoryBackingStore, ObjectStoreCursor,
    ObjectStoreKeyCursor, OpenOptions, KEY_GENERATOR_INITIAL_NUMBER,
};
pub use error::{Error, Result};
pub use key::{Key, KeyPath};
pub use keys::KeyspaceComparator;
pub use metadata::{DatabaseMetadata, IndexMetadata, ObjectStoreMetadata, RecordIdentifier};
pub use observe::{ErrorClass, ErrorSite, NoopObserver, Observer};
pub use txn::Transaction;
