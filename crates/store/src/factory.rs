//! Store factory over a registry of named in-memory stores.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::comparator::{BytewiseComparator, KeyComparator};
use crate::error::Result;
use crate::memory::MemoryStore;
use crate::traits::StoreFactory;

/// Factory handing out named [`MemoryStore`] instances.
///
/// `open` returns the existing store for a name, so a reopen sees prior
/// commits, and `destroy` drops it. Together these make the
/// destroy-then-reopen recovery path of the object/index layer observable
/// in tests.
pub struct MemoryFactory<C: KeyComparator = BytewiseComparator> {
    stores: Mutex<HashMap<String, MemoryStore<C>>>,
}

impl<C: KeyComparator> MemoryFactory<C> {
    /// Creates an empty factory.
    pub fn new() -> Self {
        Self { stores: Mutex::new(HashMap::new()) }
    }
}

impl<C: KeyComparator> Default for MemoryFactory<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: KeyComparator> StoreFactory for MemoryFactory<C> {
    type Store = MemoryStore<C>;

    fn open(&self, name: &str) -> Result<MemoryStore<C>> {
        let mut stores = self.stores.lock();
        let store = stores.entry(name.to_string()).or_insert_with(MemoryStore::new);
        Ok(store.clone())
    }

    fn destroy(&self, name: &str) -> Result<()> {
        self.stores.lock().remove(name);
        Ok(())
    }
}
