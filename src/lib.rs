//! A mutual-exclusion lock built on a store that only offers
//! "insert if absent" and "delete".
//!
//! Workers race through [`Retry::run_with_lock`]; the store's atomic insert
//! decides who holds the lock, the task runs once per acquisition and the
//! lock is always released on the way out.

pub mod config;
pub mod lock;
pub mod pool;
pub mod retry;
#[cfg(feature = "spanner")]
pub mod spanner;
pub mod store;
pub mod task;

pub use config::Config;
pub use lock::Lock;
pub use pool::{Pool, PoolBuilder, Report};
pub use retry::{Outcome, Retry, RetryBuilder, run_with_lock};
#[cfg(feature = "spanner")]
pub use spanner::SpannerStore;
pub use store::{AtomicStore, MemStore};
pub use task::{AppendLine, Task, WorkerId, verify_output};

/// Identity of the contested record when none is configured.
pub const DEFAULT_IDENTITY: &str = "taskID: task";

pub const DEFAULT_LINE: &str = "Maestro is the best......";
