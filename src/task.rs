use crate::DEFAULT_LINE;
use crate::store::AtomicStore;
use anyhow::{Context, Result, ensure};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use uuid::Uuid;

const SEPARATOR: &str = "\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(Uuid);

impl WorkerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The unit of work executed while the lock is held.
pub trait Task: Send + Sync {
    fn run(&self, worker: &WorkerId, store: &dyn AtomicStore) -> Result<()>;
}

impl<F> Task for F
where
    F: Fn(&WorkerId, &dyn AtomicStore) -> Result<()> + Send + Sync,
{
    fn run(&self, worker: &WorkerId, store: &dyn AtomicStore) -> Result<()> {
        self(worker, store)
    }
}

/// Appends one record to a shared file, a byte at a time: the line
/// followed by a blank line.
///
/// Each byte is its own append, so two holders running at once would
/// interleave and corrupt the record.
#[derive(Debug, Clone)]
pub struct AppendLine {
    path: PathBuf,
    line: String,
    pace: Duration,
}

impl AppendLine {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            line: DEFAULT_LINE.to_string(),
            pace: Duration::ZERO,
        }
    }

    pub fn line(mut self, line: impl Into<String>) -> Self {
        self.line = line.into();
        self
    }

    pub fn pace(mut self, pace: Duration) -> Self {
        self.pace = pace;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn reset(&self) -> Result<()> {
        fs::write(&self.path, b"")
            .with_context(|| format!("truncate {}", self.path.display()))
    }
}

impl Task for AppendLine {
    fn run(&self, _: &WorkerId, _: &dyn AtomicStore) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open {}", self.path.display()))?;

        for b in self.line.as_bytes().iter().chain(SEPARATOR.as_bytes()) {
            file.write_all(std::slice::from_ref(b))
                .with_context(|| format!("append to {}", self.path.display()))?;
            if !self.pace.is_zero() {
                thread::sleep(self.pace);
            }
        }

        Ok(())
    }
}

/// Checks that `path` holds exactly `expected` records, each equal to
/// `line` once trimmed. Records are split on blank lines; empty pieces are
/// dropped, anything else (a stray `\n` included) must match.
pub fn verify_output(path: impl AsRef<Path>, line: &str, expected: usize) -> Result<usize> {
    let path = path.as_ref();
    let contents =
        fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;

    let records: Vec<&str> = contents
        .split(SEPARATOR)
        .filter(|r| !r.is_empty())
        .collect();

    for (i, got) in records.iter().enumerate() {
        ensure!(
            got.trim() == line,
            "record {}: expecting {line:?}, got {got:?}",
            i + 1
        );
    }

    ensure!(
        records.len() == expected,
        "expecting {expected} records, got {}",
        records.len()
    );

    Ok(records.len())
}
