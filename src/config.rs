use crate::pool::Pool;
use crate::retry::Retry;
use crate::{DEFAULT_IDENTITY, DEFAULT_LINE};
use anyhow::{Result, ensure};
use clap::Parser;
use clap::builder::NonEmptyStringValueParser;
use std::path::PathBuf;
use std::time::Duration;

/// Races a pool of workers through one insert-if-absent lock; each winner
/// appends one record to the output file.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "latchkey")]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Number of concurrent workers.
    #[arg(long, env = "LATCHKEY_WORKERS", default_value_t = 25)]
    pub workers: usize,

    /// How long each worker keeps trying before giving up.
    #[arg(long, env = "LATCHKEY_DEADLINE_MS", default_value_t = 2_000_000)]
    pub deadline_ms: u64,

    /// Pause between acquire attempts.
    #[arg(long, env = "LATCHKEY_POLL_MS", default_value_t = 100)]
    pub poll_ms: u64,

    /// Random extra pause, up to this much, added to every poll.
    #[arg(long, env = "LATCHKEY_JITTER_MS", default_value_t = 0)]
    pub jitter_ms: u64,

    /// Identity of the contested record.
    #[arg(
        long,
        env = "LATCHKEY_IDENTITY",
        default_value = DEFAULT_IDENTITY,
        value_parser = NonEmptyStringValueParser::new(),
    )]
    pub identity: String,

    #[arg(long, env = "LATCHKEY_OUTPUT", default_value = "output.txt")]
    pub output: PathBuf,

    #[arg(long, env = "LATCHKEY_LINE", default_value = DEFAULT_LINE)]
    pub line: String,

    /// Contend through one lock handle shared by all workers.
    #[arg(long, env = "LATCHKEY_SHARED_LOCK")]
    pub shared_lock: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: 25,
            deadline_ms: 2_000_000,
            poll_ms: 100,
            jitter_ms: 0,
            identity: DEFAULT_IDENTITY.to_string(),
            output: PathBuf::from("output.txt"),
            line: DEFAULT_LINE.to_string(),
            shared_lock: false,
        }
    }
}

impl Config {
    /// Rejects settings clap cannot express on its own.
    pub fn check(self) -> Result<Self> {
        ensure!(self.workers > 0, "--workers must be at least 1");
        ensure!(!self.line.trim().is_empty(), "--line must not be blank");
        Ok(self)
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }

    pub fn poll(&self) -> Duration {
        Duration::from_millis(self.poll_ms)
    }

    pub fn jitter(&self) -> Duration {
        Duration::from_millis(self.jitter_ms)
    }

    pub fn retry(&self) -> Retry {
        Retry::builder()
            .identity(self.identity.clone())
            .deadline(self.deadline())
            .poll(self.poll())
            .jitter(self.jitter())
            .build()
    }

    pub fn pool(&self) -> Pool {
        Pool::builder()
            .workers(self.workers)
            .retry(self.retry())
            .shared_lock(self.shared_lock)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Result<Config> {
        let argv = std::iter::once("latchkey").chain(args.iter().copied());
        Config::try_parse_from(argv)?.check()
    }

    #[test]
    fn command_is_well_formed() {
        Config::command().debug_assert();
    }

    #[test]
    fn defaults_match() {
        let c = parse(&[]).unwrap();
        assert_eq!(c, Config::default());
        assert_eq!(c.deadline(), Duration::from_secs(2000));
        assert_eq!(c.poll(), Duration::from_millis(100));
        assert_eq!(c.identity, DEFAULT_IDENTITY);
    }

    #[test]
    fn overrides() {
        let c = parse(&[
            "--workers",
            "4",
            "--deadline-ms",
            "1500",
            "--poll-ms",
            "20",
            "--jitter-ms",
            "5",
            "--identity",
            "nightly",
            "--output",
            "/tmp/out.txt",
            "--shared-lock",
        ])
        .unwrap();

        assert_eq!(c.workers, 4);
        assert_eq!(c.deadline(), Duration::from_millis(1500));
        assert_eq!(c.jitter(), Duration::from_millis(5));
        assert_eq!(c.output, PathBuf::from("/tmp/out.txt"));
        assert!(c.shared_lock);

        let r = c.retry();
        assert_eq!(r.identity(), "nightly");
        assert_eq!(r.poll(), Duration::from_millis(20));
        assert_eq!(c.pool().workers(), 4);
    }

    #[test]
    fn every_setting_reads_its_env_var() {
        let cmd = Config::command();
        for (arg, var) in [
            ("workers", "LATCHKEY_WORKERS"),
            ("deadline_ms", "LATCHKEY_DEADLINE_MS"),
            ("poll_ms", "LATCHKEY_POLL_MS"),
            ("jitter_ms", "LATCHKEY_JITTER_MS"),
            ("identity", "LATCHKEY_IDENTITY"),
            ("output", "LATCHKEY_OUTPUT"),
            ("shared_lock", "LATCHKEY_SHARED_LOCK"),
        ] {
            let a = cmd
                .get_arguments()
                .find(|a| a.get_id().as_str() == arg)
                .unwrap_or_else(|| panic!("no argument {arg}"));
            assert_eq!(a.get_env().and_then(|v| v.to_str()), Some(var));
        }
    }

    #[test]
    fn rejects_garbage() {
        let err = parse(&["--poll-ms", "fast"]).unwrap_err();
        assert!(err.to_string().contains("fast"), "{err}");
    }

    #[test]
    fn rejects_zero_workers() {
        assert!(parse(&["--workers", "0"]).is_err());
    }

    #[test]
    fn rejects_empty_identity() {
        assert!(parse(&["--identity", ""]).is_err());
    }
}
