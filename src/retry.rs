use crate::DEFAULT_IDENTITY;
use crate::lock::Lock;
use crate::store::AtomicStore;
use crate::task::{Task, WorkerId};
use anyhow::anyhow;
use log::*;
use rand::Rng;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// How a single [`Retry::run_with_lock`] call ended.
#[derive(Debug)]
pub enum Outcome {
    /// Acquired the lock and the task succeeded.
    Completed { attempts: usize },
    /// Acquired the lock and the task failed (or panicked). Not retried.
    TaskFailed {
        attempts: usize,
        error: anyhow::Error,
    },
    /// Gave up at the deadline; the task never ran.
    TimedOut { attempts: usize },
    /// The worker thread failed to spawn or died outside the task.
    WorkerLost { error: anyhow::Error },
}

impl Outcome {
    pub fn attempts(&self) -> usize {
        match self {
            Outcome::Completed { attempts }
            | Outcome::TaskFailed { attempts, .. }
            | Outcome::TimedOut { attempts } => *attempts,
            Outcome::WorkerLost { .. } => 0,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed { .. })
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self, Outcome::TimedOut { .. })
    }

    pub fn is_worker_lost(&self) -> bool {
        matches!(self, Outcome::WorkerLost { .. })
    }

    /// True when the lock was acquired, whatever the task did.
    pub fn ran_task(&self) -> bool {
        matches!(self, Outcome::Completed { .. } | Outcome::TaskFailed { .. })
    }
}

/// Polls a [`Lock`] until it is acquired or the deadline passes, then runs
/// the task once and releases.
#[derive(Debug, Clone)]
pub struct Retry {
    identity: String,
    deadline: Duration,
    poll: Duration,
    jitter: Duration,
}

impl Default for Retry {
    fn default() -> Self {
        Self {
            identity: DEFAULT_IDENTITY.to_string(),
            deadline: Duration::from_secs(2000),
            poll: Duration::from_millis(100),
            jitter: Duration::ZERO,
        }
    }
}

impl Retry {
    pub fn builder() -> RetryBuilder {
        RetryBuilder::default()
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub fn poll(&self) -> Duration {
        self.poll
    }

    pub fn jitter(&self) -> Duration {
        self.jitter
    }

    pub fn run_with_lock(
        &self,
        worker: &WorkerId,
        store: Arc<dyn AtomicStore>,
        task: &dyn Task,
    ) -> Outcome {
        let lock = Lock::new(store, self.identity.clone());
        self.run_shared(&lock, worker, task)
    }

    /// Same as [`Retry::run_with_lock`] but over a lock handle shared with
    /// other callers. The handle's identity wins over the configured one.
    pub fn run_shared(&self, lock: &Lock, worker: &WorkerId, task: &dyn Task) -> Outcome {
        let mut attempt = Attempt::new(self, worker);
        debug!(
            "[{worker}] polling [{}] every {:?} for up to {:?}",
            lock.identity(),
            self.poll,
            self.deadline
        );

        while Instant::now() < attempt.deadline {
            attempt.count += 1;
            if lock.acquire() {
                return attempt.hold(lock, task);
            }

            let pause = attempt.next_pause();
            thread::sleep(pause);
        }

        warn!(
            "[{worker}] gave up on [{}] after {} attempts",
            lock.identity(),
            attempt.count
        );

        Outcome::TimedOut {
            attempts: attempt.count,
        }
    }
}

struct Attempt<'a> {
    worker: &'a WorkerId,
    deadline: Instant,
    poll: Duration,
    jitter_ns: u64,
    count: usize,
}

impl<'a> Attempt<'a> {
    fn new(retry: &Retry, worker: &'a WorkerId) -> Self {
        let now = Instant::now();
        // Effectively "never" for deadlines too large to represent.
        let deadline = now
            .checked_add(retry.deadline)
            .unwrap_or_else(|| now + Duration::from_secs(u32::MAX as u64));

        Self {
            worker,
            deadline,
            poll: retry.poll,
            jitter_ns: nanos(retry.jitter),
            count: 0,
        }
    }

    // Never runs past the deadline.
    fn next_pause(&mut self) -> Duration {
        // Fresh uniform draw each miss so contenders drift apart.
        let pause = match self.jitter_ns {
            0 => self.poll,
            j => self.poll + Duration::from_nanos(rand::rng().random_range(0..=j)),
        };

        pause.min(self.deadline.saturating_duration_since(Instant::now()))
    }

    fn hold(&self, lock: &Lock, task: &dyn Task) -> Outcome {
        let worker = self.worker;
        let attempts = self.count;

        // Runs on every way out of this scope, unwinding included.
        let _release = scopeguard::guard(lock, |lock| lock.release());

        let res = panic::catch_unwind(AssertUnwindSafe(|| task.run(worker, lock.store())));
        match res {
            Ok(Ok(())) => {
                info!("[{worker}] task done after {attempts} attempts");
                Outcome::Completed { attempts }
            }
            Ok(Err(error)) => {
                error!("[{worker}] task failed: {error:#}");
                Outcome::TaskFailed { attempts, error }
            }
            Err(payload) => {
                let error = anyhow!("task panicked: {}", panic_message(&*payload));
                error!("[{worker}] {error}");
                Outcome::TaskFailed { attempts, error }
            }
        }
    }
}

fn nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown payload"
    }
}

/// One contending call under the default identity, without jitter.
pub fn run_with_lock(
    worker: &WorkerId,
    deadline: Duration,
    poll: Duration,
    store: Arc<dyn AtomicStore>,
    task: &dyn Task,
) -> Outcome {
    Retry::builder()
        .deadline(deadline)
        .poll(poll)
        .build()
        .run_with_lock(worker, store, task)
}

#[derive(Debug, Clone, Default)]
pub struct RetryBuilder {
    identity: Option<String>,
    deadline: Option<Duration>,
    poll: Option<Duration>,
    jitter: Option<Duration>,
}

impl RetryBuilder {
    pub fn new() -> RetryBuilder {
        RetryBuilder::default()
    }

    pub fn identity(mut self, identity: impl Into<String>) -> RetryBuilder {
        self.identity = Some(identity.into());
        self
    }

    pub fn deadline(mut self, deadline: Duration) -> RetryBuilder {
        self.deadline = Some(deadline);
        self
    }

    pub fn deadline_ms(self, ms: u64) -> RetryBuilder {
        self.deadline(Duration::from_millis(ms))
    }

    pub fn poll(mut self, poll: Duration) -> RetryBuilder {
        self.poll = Some(poll);
        self
    }

    pub fn poll_ms(self, ms: u64) -> RetryBuilder {
        self.poll(Duration::from_millis(ms))
    }

    /// Extra random pause on top of the poll interval, up to `jitter`.
    pub fn jitter(mut self, jitter: Duration) -> RetryBuilder {
        self.jitter = Some(jitter);
        self
    }

    pub fn jitter_ms(self, ms: u64) -> RetryBuilder {
        self.jitter(Duration::from_millis(ms))
    }

    pub fn build(self) -> Retry {
        let d = Retry::default();
        Retry {
            identity: self.identity.unwrap_or(d.identity),
            deadline: self.deadline.unwrap_or(d.deadline),
            poll: self.poll.unwrap_or(d.poll),
            jitter: self.jitter.unwrap_or(d.jitter),
        }
    }
}
