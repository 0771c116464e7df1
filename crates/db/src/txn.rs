//! Transaction handle binding logical operations to one store transaction.

use std::sync::Arc;

use strata_store::{OrderedStore, StoreTransaction};

use crate::error::{Error, Result};
use crate::observe::{ErrorClass, ErrorSite, Observer};

/// A single-writer transaction over the backing store.
///
/// Construction (via `BackingStore::begin_transaction`) begins the underlying
/// store transaction. Cursors borrow the transaction, so the borrow checker
/// guarantees every cursor ends before the transaction commits or rolls
/// back. Isolation between transactions is the store engine's concern;
/// callers serialize writers.
pub struct Transaction<S: OrderedStore> {
    raw: S::Transaction,
    observer: Arc<dyn Observer>,
}

impl<S: OrderedStore> Transaction<S> {
    pub(crate) fn new(raw: S::Transaction, observer: Arc<dyn Observer>) -> Self {
        Self { raw, observer }
    }

    pub(crate) fn raw(&self) -> &S::Transaction {
        &self.raw
    }

    /// Commits all buffered writes.
    ///
    /// A commit failure is fatal to the whole logical operation that was in
    /// flight; nothing is partially applied.
    pub fn commit(self) -> Result<()> {
        if let Err(error) = self.raw.commit() {
            tracing::error!(%error, "transaction commit failed");
            self.observer.internal_error(ErrorClass::Write, ErrorSite::TransactionCommit);
            return Err(Error::Write { site: ErrorSite::TransactionCommit });
        }
        Ok(())
    }

    /// Discards all buffered writes.
    pub fn rollback(self) {
        self.raw.rollback();
    }
}
