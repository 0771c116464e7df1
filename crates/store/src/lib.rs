//! strata-store: the ordered byte-keyed storage collaborator for strata.
//!
//! The object/index layer in `strata-db` maps a hierarchical logical schema
//! onto a flat sorted keyspace. This crate defines the contract that keyspace
//! is accessed through, and ships one engine implementing it:
//!
//! - **Traits** ([`OrderedStore`], [`StoreTransaction`], [`StoreIterator`],
//!   [`StoreFactory`]): point get/put/delete, seek/next/prev iteration, and
//!   atomic transactions with read-your-writes semantics. The upper layer is
//!   generic over these, so the encoding and cursor logic stays
//!   engine-agnostic.
//! - **Comparator** ([`KeyComparator`]): a store is opened with one fixed
//!   total order over encoded keys and every lookup, scan, and iterator
//!   honors it.
//! - **In-memory engine** ([`MemoryStore`]): snapshot-isolated transactions
//!   over a committed map behind an atomic pointer swap. Suitable for tests
//!   and ephemeral workloads; data is lost on drop.
//!
//! ## Quick Start
//!
//! ```no_run
//! use strata_store::{MemoryStore, OrderedStore, StoreRead, StoreTransaction};
//!
//! let store: MemoryStore = MemoryStore::new();
//!
//! let txn = store.begin_transaction();
//! txn.put(b"key", b"value")?;
//! txn.commit()?;
//!
//! let value = store.get(b"key")?;
//! assert_eq!(value.as_deref(), Some(&b"value"[..]));
//! # Ok::<(), strata_store::Error>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod comparator;
pub mod error;
pub mod factory;
pub mod memory;
pub mod traits;

pub use comparator::{BytewiseComparator, KeyComparator};
pub use error::{Error, Result};
pub use factory::MemoryFactory;
pub use memory::{MemoryIterator, MemoryStore, MemoryTransaction};
pub use traits::{OrderedStore, StoreFactory, StoreIterator, StoreRead, StoreTransaction};
