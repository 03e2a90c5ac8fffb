use anyhow::{Result, anyhow};
use log::*;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// The only capabilities the lock needs from the shared store.
///
/// Implementations must make `insert_if_absent` atomic across every caller
/// sharing the store; that is the lock's whole correctness foundation.
pub trait AtomicStore: Send + Sync {
    /// Creates a record for `id`. `Ok(false)` means one already exists.
    fn insert_if_absent(&self, id: &str) -> Result<bool>;

    /// Removes the record for `id`. Removing a missing record is not an error.
    fn delete(&self, id: &str) -> Result<()>;
}

impl<S: AtomicStore + ?Sized> AtomicStore for Arc<S> {
    fn insert_if_absent(&self, id: &str) -> Result<bool> {
        (**self).insert_if_absent(id)
    }

    fn delete(&self, id: &str) -> Result<()> {
        (**self).delete(id)
    }
}

#[derive(Debug, Default)]
pub struct MemStore {
    records: Mutex<HashSet<String>>,
    peak: AtomicUsize,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records
            .lock()
            .map(|r| r.contains(id))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Highest number of live records ever held at once.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::Acquire)
    }
}

impl AtomicStore for MemStore {
    fn insert_if_absent(&self, id: &str) -> Result<bool> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| anyhow!("store mutex poisoned"))?;

        if !records.insert(id.to_string()) {
            return Ok(false);
        }

        self.peak.fetch_max(records.len(), Ordering::AcqRel);
        Ok(true)
    }

    fn delete(&self, id: &str) -> Result<()> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| anyhow!("store mutex poisoned"))?;

        if !records.remove(id) {
            debug!("delete: no record for [{id}]");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_is_exclusive() {
        let store = MemStore::new();
        assert!(store.insert_if_absent("a").unwrap());
        assert!(!store.insert_if_absent("a").unwrap());
        assert!(store.insert_if_absent("b").unwrap());
        assert_eq!(store.len(), 2);
        assert_eq!(store.peak(), 2);
    }

    #[test]
    fn delete_frees_identity() {
        let store = MemStore::new();
        assert!(store.insert_if_absent("a").unwrap());
        store.delete("a").unwrap();
        assert!(!store.contains("a"));
        assert!(store.insert_if_absent("a").unwrap());
        assert_eq!(store.peak(), 1);
    }

    #[test]
    fn delete_missing_is_ok() {
        let store = MemStore::new();
        store.delete("nobody").unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn arc_forwards() {
        let store = Arc::new(MemStore::new());
        let shared: Arc<dyn AtomicStore> = store.clone();
        assert!(shared.insert_if_absent("x").unwrap());
        assert!(store.contains("x"));
    }
}
