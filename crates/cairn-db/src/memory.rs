//! In-memory datastore for tests.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Mutex;

use crate::{Datastore, Result};

/// Ordered in-memory implementation of [`Datastore`].
#[derive(Default)]
pub struct MemoryDatastore {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryDatastore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Datastore for MemoryDatastore {
    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.lock().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.lock().get(key).cloned())
    }

    fn has(&self, key: &str) -> Result<bool> {
        Ok(self.lock().contains_key(key))
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.lock().remove(key);
        Ok(())
    }

    fn query(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let map = self.lock();
        let rows = map
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(rows)
    }
}
