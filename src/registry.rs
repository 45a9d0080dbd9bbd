use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

/// Identity-keyed cache guaranteeing one in-memory instance per identifier.
pub struct Registry<T> {
    entries: RwLock<HashMap<String, Arc<T>>>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<Arc<T>> {
        self.entries.read().get(id).cloned()
    }

    /// Returns the registered instance for `id`, building it with `make` only
    /// when none exists yet.
    pub fn get_or_insert_with<F>(&self, id: &str, make: F) -> Arc<T>
    where
        F: FnOnce() -> T,
    {
        if let Some(existing) = self.get(id) {
            return existing;
        }
        let mut entries = self.entries.write();
        entries
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(make()))
            .clone()
    }

    pub fn values(&self) -> Vec<Arc<T>> {
        self.entries.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}
