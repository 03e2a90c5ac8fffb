use crate::store::AtomicStore;
use log::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use time::OffsetDateTime;

/// Acquire/release handle over one contested identity in a shared store.
///
/// Every participant contending for the same resource must use the same
/// identity. A `Lock` can be built per participant or shared by reference;
/// the counters are atomic so either way works.
pub struct Lock {
    store: Arc<dyn AtomicStore>,
    identity: String,
    misses: AtomicUsize,
    start: Instant,
    latest_ns: AtomicU64, // since `start`
}

impl Lock {
    pub fn new(store: Arc<dyn AtomicStore>, identity: impl Into<String>) -> Self {
        Self {
            store,
            identity: identity.into(),
            misses: AtomicUsize::new(0),
            start: Instant::now(),
            latest_ns: AtomicU64::new(0),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn store(&self) -> &dyn AtomicStore {
        &*self.store
    }

    pub fn misses(&self) -> usize {
        self.misses.load(Ordering::Relaxed)
    }

    /// One insert attempt; never blocks. Contention and store faults both
    /// come back as `false`.
    pub fn acquire(&self) -> bool {
        match self.store.insert_if_absent(&self.identity) {
            Ok(true) => {
                self.stopwatch("acquired");
                true
            }
            Ok(false) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(e) => {
                warn!("acquire [{}] failed: {e:#}", self.identity);
                self.misses.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Deletes the record. Store errors are logged, never returned.
    pub fn release(&self) {
        self.stopwatch("released");
        if let Err(e) = self.store.delete(&self.identity) {
            error!("release [{}] failed: {e:#}", self.identity);
        }
    }

    fn stopwatch(&self, state: &str) {
        let now = self.start.elapsed();
        let now_ns = u64::try_from(now.as_nanos()).unwrap_or(u64::MAX);
        let last = Duration::from_nanos(self.latest_ns.swap(now_ns, Ordering::Relaxed));
        let misses = self.misses.swap(0, Ordering::Relaxed);
        info!(
            "[{}] {state} after {misses} misses, {:?} since last, {:?} from the start ({})",
            self.identity,
            now.saturating_sub(last),
            now,
            OffsetDateTime::now_utc(),
        );
    }
}
