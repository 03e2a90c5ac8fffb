use crate::lock::Lock;
use crate::retry::{Outcome, Retry};
use crate::store::AtomicStore;
use crate::task::{Task, WorkerId};
use anyhow::anyhow;
use log::*;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Spawns one thread per worker, each contending through its own
/// [`Retry`] call, and waits for all of them.
#[derive(Debug, Clone)]
pub struct Pool {
    workers: usize,
    retry: Retry,
    shared_lock: bool,
}

impl Pool {
    pub fn builder() -> PoolBuilder {
        PoolBuilder::default()
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn run(&self, store: Arc<dyn AtomicStore>, task: &dyn Task) -> Report {
        info!(
            "workers={}, identity={}, deadline={:?}, poll={:?}, jitter={:?}, shared_lock={}",
            self.workers,
            self.retry.identity(),
            self.retry.deadline(),
            self.retry.poll(),
            self.retry.jitter(),
            self.shared_lock,
        );

        let start = Instant::now();
        let shared = self
            .shared_lock
            .then(|| Lock::new(store.clone(), self.retry.identity()));

        let outcomes: Vec<(WorkerId, Outcome)> = thread::scope(|s| {
            let handles: Vec<_> = (0..self.workers)
                .map(|i| {
                    let worker = WorkerId::new();
                    let store = store.clone();
                    let shared = shared.as_ref();
                    let h = thread::Builder::new()
                        .name(format!("worker-{i}"))
                        .spawn_scoped(s, move || match shared {
                            Some(lock) => self.retry.run_shared(lock, &worker, task),
                            None => self.retry.run_with_lock(&worker, store, task),
                        });
                    (worker, h)
                })
                .collect();

            handles
                .into_iter()
                .map(|(worker, h)| {
                    let outcome = match h {
                        Ok(h) => h.join().unwrap_or_else(|_| {
                            error!("worker [{worker}] panicked outside its task");
                            Outcome::WorkerLost {
                                error: anyhow!("worker thread panicked"),
                            }
                        }),
                        Err(e) => {
                            error!("spawn worker [{worker}] failed: {e}");
                            Outcome::WorkerLost {
                                error: anyhow!("spawn failed: {e}"),
                            }
                        }
                    };
                    (worker, outcome)
                })
                .collect()
        });

        Report {
            outcomes,
            elapsed: start.elapsed(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PoolBuilder {
    workers: Option<usize>,
    retry: Option<Retry>,
    shared_lock: bool,
}

impl PoolBuilder {
    pub fn new() -> PoolBuilder {
        PoolBuilder::default()
    }

    pub fn workers(mut self, n: usize) -> PoolBuilder {
        self.workers = Some(n);
        self
    }

    pub fn retry(mut self, retry: Retry) -> PoolBuilder {
        self.retry = Some(retry);
        self
    }

    /// All workers contend through one `Lock` handle instead of one each.
    pub fn shared_lock(mut self, yes: bool) -> PoolBuilder {
        self.shared_lock = yes;
        self
    }

    pub fn build(self) -> Pool {
        Pool {
            workers: self.workers.unwrap_or(25),
            retry: self.retry.unwrap_or_default(),
            shared_lock: self.shared_lock,
        }
    }
}

/// Every worker's outcome, in spawn order.
#[derive(Debug)]
pub struct Report {
    pub outcomes: Vec<(WorkerId, Outcome)>,
    pub elapsed: Duration,
}

impl Report {
    pub fn completed(&self) -> usize {
        self.count(Outcome::is_completed)
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, Outcome::TaskFailed { .. }))
    }

    pub fn timed_out(&self) -> usize {
        self.count(Outcome::is_timed_out)
    }

    pub fn lost(&self) -> usize {
        self.count(Outcome::is_worker_lost)
    }

    pub fn attempts(&self) -> usize {
        self.outcomes.iter().map(|(_, o)| o.attempts()).sum()
    }

    pub fn log_summary(&self) {
        info!(
            "done in {:?}: completed={}, failed={}, timed_out={}, lost={}, attempts={}",
            self.elapsed,
            self.completed(),
            self.failed(),
            self.timed_out(),
            self.lost(),
            self.attempts(),
        );

        for (worker, outcome) in &self.outcomes {
            match outcome {
                Outcome::TaskFailed { error, .. } => warn!("[{worker}] failed: {error:#}"),
                Outcome::WorkerLost { error } => warn!("[{worker}] lost: {error:#}"),
                _ => {}
            }
        }
    }

    fn count(&self, f: impl Fn(&Outcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| f(o)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemStore;
    use anyhow::bail;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn retry() -> Retry {
        Retry::builder().identity("job").deadline_ms(10_000).poll_ms(1).build()
    }

    #[test]
    fn builder_defaults() {
        let pool = Pool::builder().build();
        assert_eq!(pool.workers(), 25);
        assert!(!pool.shared_lock);
    }

    #[test]
    fn every_worker_runs_once() {
        let store = Arc::new(MemStore::new());
        let runs = AtomicUsize::new(0);
        let task = |_: &WorkerId, _: &dyn AtomicStore| {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok::<(), anyhow::Error>(())
        };

        let report = Pool::builder()
            .workers(8)
            .retry(retry())
            .build()
            .run(store.clone(), &task);

        assert_eq!(report.outcomes.len(), 8);
        assert_eq!(report.completed(), 8);
        assert_eq!(runs.load(Ordering::SeqCst), 8);
        assert_eq!(store.peak(), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn report_separates_outcomes() {
        let store = Arc::new(MemStore::new());
        let runs = AtomicUsize::new(0);
        let task = |_: &WorkerId, _: &dyn AtomicStore| -> anyhow::Result<()> {
            if runs.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
                bail!("odd one out");
            }
            Ok(())
        };

        let report = Pool::builder()
            .workers(6)
            .retry(retry())
            .shared_lock(true)
            .build()
            .run(store.clone(), &task);

        assert_eq!(report.completed(), 3);
        assert_eq!(report.failed(), 3);
        assert_eq!(report.timed_out(), 0);
        assert!(report.attempts() >= 6);
        assert!(store.is_empty());
    }

    #[test]
    fn unworkable_store_times_out() {
        let store = Arc::new(MemStore::new());
        assert!(store.insert_if_absent("job").unwrap());
        let task = |_: &WorkerId, _: &dyn AtomicStore| Ok::<(), anyhow::Error>(());

        let report = Pool::builder()
            .workers(3)
            .retry(Retry::builder().identity("job").deadline_ms(50).poll_ms(5).build())
            .build()
            .run(store, &task);

        assert_eq!(report.timed_out(), 3);
        assert_eq!(report.completed(), 0);
    }

    struct Exploding;

    impl AtomicStore for Exploding {
        fn insert_if_absent(&self, _: &str) -> anyhow::Result<bool> {
            panic!("store exploded");
        }

        fn delete(&self, _: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn dead_worker_is_not_a_task_failure() {
        let runs = AtomicUsize::new(0);
        let task = |_: &WorkerId, _: &dyn AtomicStore| {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok::<(), anyhow::Error>(())
        };

        let report = Pool::builder()
            .workers(2)
            .retry(retry())
            .build()
            .run(Arc::new(Exploding), &task);

        assert_eq!(report.lost(), 2);
        assert_eq!(report.failed(), 0);
        assert_eq!(report.attempts(), 0);
        assert!(report.outcomes.iter().all(|(_, o)| !o.ran_task()));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}
