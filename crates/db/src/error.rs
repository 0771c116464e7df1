//! Error types for the object/index store.

use snafu::Snafu;

use crate::observe::ErrorSite;

/// Result type alias for backing-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the backing store.
///
/// Stale index entries are not errors; they are repaired in place during
/// reads and iteration.
#[derive(Debug, Snafu)]
pub enum Error {
    /// Expected-present data could not be read or decoded.
    #[snafu(display("read error during {site}"))]
    Read {
        /// Operation that detected the failure.
        site: ErrorSite,
    },

    /// A write or commit failed.
    #[snafu(display("write error during {site}"))]
    Write {
        /// Operation that detected the failure.
        site: ErrorSite,
    },

    /// An invariant the store itself maintains was violated; indicates
    /// corruption, not a normal-use condition.
    #[snafu(display("consistency error during {site}"))]
    Consistency {
        /// Operation that detected the failure.
        site: ErrorSite,
    },

    /// The stored schema or data version is newer than this build
    /// understands. The store is left untouched.
    #[snafu(display("backing store schema is newer than this build"))]
    UnknownSchema,

    /// An id was out of range for the keyspace.
    #[snafu(display(
        "invalid ids: database {database_id}, object store {object_store_id}, index {index_id}"
    ))]
    InvalidId {
        /// Offending database id.
        database_id: i64,
        /// Offending object store id.
        object_store_id: i64,
        /// Offending index id, or 0 when not applicable.
        index_id: i64,
    },

    /// The supplied key cannot be stored.
    #[snafu(display("invalid key"))]
    InvalidKey,

    /// Error from the ordered-store collaborator.
    #[snafu(display("store error: {source}"))]
    Store {
        /// The underlying store error.
        source: strata_store::Error,
    },
}

// Automatic conversion for ergonomic ? usage over collaborator calls
impl From<strata_store::Error> for Error {
    fn from(source: strata_store::Error) -> Self {
        Error::Store { source }
    }
}
