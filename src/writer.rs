//! Retry-safe append-only CSV writer
//!
//! **Lock-free multi-writer append**: several independent processes may append to
//! the same file. Each call opens the file in append mode, writes the header only if
//! the file was empty at open time, writes exactly one data line, and closes the
//! file again.
//!
//! Known race: two first writers can both observe an empty file and both write a
//! header. The size-based check is kept as is; an explicit "header written" marker
//! would change the on-disk format.
//!
//! Opening is retried with a randomized, bounded [`Backoff`]. Failing to open is
//! reported as `Ok(false)`; failing after the file was opened is an error, since a
//! partial write risks a corrupt file.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::rngs::{OsRng, StdRng};
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::Result;

/// Number of tries to open a CSV file before giving up
pub const MAX_CSV_FILE_OPEN_TRIES: u32 = 10;

/// Maximum number of seconds a single wait for file open can take
pub const MAX_FILE_OPEN_SLEEP_SEC: f64 = 30.0;

/// Bounds on open retries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Open attempts before giving up
    pub max_attempts: u32,
    /// Ceiling on a single backoff delay, in seconds
    pub max_sleep_secs: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_CSV_FILE_OPEN_TRIES,
            max_sleep_secs: MAX_FILE_OPEN_SLEEP_SEC,
        }
    }
}

/// Source of backoff randomness, chosen once at construction.
#[derive(Debug)]
pub enum RandomSource {
    /// Generator seeded from the operating system's secure source
    Secure(StdRng),
    /// Time-seeded generator used when the secure source is unavailable
    Fallback(StdRng),
}

impl RandomSource {
    /// Seed from the OS; fall back permanently to a time-seeded generator if that fails.
    #[must_use]
    pub fn new() -> Self {
        match StdRng::from_rng(OsRng) {
            Ok(rng) => Self::Secure(rng),
            Err(e) => {
                warn!(error = %e, "Secure random source unavailable; using fallback generator");
                let nanos = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map_or(0, |d| d.as_nanos());
                #[allow(clippy::cast_possible_truncation)]
                Self::Fallback(StdRng::seed_from_u64(nanos as u64 ^ u64::from(std::process::id())))
            }
        }
    }

    /// Deterministic source for reproducible runs.
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self::Fallback(StdRng::seed_from_u64(seed))
    }

    /// Whether the secure source is in use
    #[must_use]
    pub const fn is_secure(&self) -> bool {
        matches!(self, Self::Secure(_))
    }

    /// Uniform sample in `[0, 1)`
    pub fn next_fraction(&mut self) -> f64 {
        match self {
            Self::Secure(rng) | Self::Fallback(rng) => rng.gen::<f64>(),
        }
    }
}

impl Default for RandomSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Randomized, bounded delay between open attempts.
#[derive(Debug)]
pub struct Backoff {
    random: RandomSource,
    max_sleep_secs: f64,
}

impl Backoff {
    /// Create a backoff over an owned random source.
    #[must_use]
    pub const fn new(random: RandomSource, max_sleep_secs: f64) -> Self {
        Self {
            random,
            max_sleep_secs,
        }
    }

    /// Seconds to wait before the next attempt.
    ///
    /// The first delay (`prev == None`) is always exactly 1 second. Later delays
    /// scale the previous one by a random fraction `m` (`trunc(prev * m * 100) / 10`);
    /// a delay over the ceiling is replaced by `max(0.1, trunc(m * 100) / 10)`.
    pub fn next(&mut self, prev: Option<f64>) -> f64 {
        let Some(prev) = prev else {
            return 1.0;
        };

        let multiplier = self.random.next_fraction();
        let sleep = (prev * multiplier * 100.0).trunc() / 10.0;
        if sleep > self.max_sleep_secs {
            ((multiplier * 100.0).trunc() / 10.0).max(0.1)
        } else {
            sleep
        }
    }
}

/// Blocks the caller between open attempts.
pub trait Sleeper {
    /// Sleep for `duration`.
    fn sleep(&mut self, duration: Duration);
}

/// Sleeps the current thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Appends header-once, row-per-call records to shared CSV files.
pub struct CsvAppender {
    policy: RetryPolicy,
    backoff: Backoff,
    sleeper: Box<dyn Sleeper>,
}

impl std::fmt::Debug for CsvAppender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsvAppender")
            .field("policy", &self.policy)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

impl Default for CsvAppender {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl CsvAppender {
    /// Create an appender with a secure random source and real sleeps.
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_parts(policy, RandomSource::new(), Box::new(ThreadSleeper))
    }

    /// Create an appender from explicit parts.
    #[must_use]
    pub fn with_parts(
        policy: RetryPolicy,
        random: RandomSource,
        sleeper: Box<dyn Sleeper>,
    ) -> Self {
        Self {
            backoff: Backoff::new(random, policy.max_sleep_secs),
            policy,
            sleeper,
        }
    }

    /// Retry policy in use
    #[must_use]
    pub const fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Append one data line, writing the header first if the file is empty.
    ///
    /// Returns `Ok(true)` when the line was written and `Ok(false)` when the
    /// arguments are empty or the file could not be opened within the retry budget.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Io`] if writing fails after the file was opened
    pub fn append(&mut self, path: &Path, header: &str, data: &str) -> Result<bool> {
        if path.as_os_str().is_empty() || data.is_empty() {
            error!("Empty parameter passed to CSV append");
            return Ok(false);
        }

        let mut file = None;
        let mut backoff_secs = None;
        for attempt in 0..self.policy.max_attempts {
            match OpenOptions::new().append(true).create(true).open(path) {
                Ok(opened) => {
                    file = Some(opened);
                    break;
                }
                Err(e) => {
                    debug!(
                        path = %path.display(),
                        attempt,
                        error = %e,
                        "Exception caught while trying to open CSV file"
                    );
                }
            }

            if attempt + 1 < self.policy.max_attempts {
                let secs = self.backoff.next(backoff_secs);
                backoff_secs = Some(secs);
                info!(
                    path = %path.display(),
                    secs,
                    "Sleeping before trying to open CSV file again"
                );
                self.sleeper.sleep(Duration::from_secs_f64(secs));
            }
        }

        let Some(mut file) = file else {
            error!(path = %path.display(), "Unable to open CSV file for writing");
            return Ok(false);
        };

        if let Err(e) = write_record(&mut file, header, data) {
            error!(path = %path.display(), error = %e, "Exception while writing CSV file");
            return Err(e.into());
        }
        Ok(true)
    }
}

fn write_record(file: &mut File, header: &str, data: &str) -> std::io::Result<()> {
    // Size at open time decides the header; see the module docs for the race.
    if file.metadata()?.len() == 0 {
        file.write_all(format!("{header}\n").as_bytes())?;
    }
    file.write_all(format!("{data}\n").as_bytes())?;
    file.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct RecordingSleeper(Arc<Mutex<Vec<Duration>>>);

    impl Sleeper for RecordingSleeper {
        fn sleep(&mut self, duration: Duration) {
            self.0.lock().unwrap().push(duration);
        }
    }

    #[test]
    fn test_first_backoff_is_one() {
        let mut backoff = Backoff::new(RandomSource::seeded(7), MAX_FILE_OPEN_SLEEP_SEC);
        assert_eq!(backoff.next(None), 1.0);
    }

    #[test]
    fn test_backoff_bounded() {
        let mut backoff = Backoff::new(RandomSource::seeded(42), MAX_FILE_OPEN_SLEEP_SEC);
        let mut prev = None;
        for _ in 0..1000 {
            let next = backoff.next(prev);
            assert!((0.0..=MAX_FILE_OPEN_SLEEP_SEC).contains(&next));
            prev = Some(if next == 0.0 { 1000.0 } else { next });
        }
    }

    #[test]
    fn test_backoff_rescale_branch() {
        let mut backoff = Backoff::new(RandomSource::seeded(3), MAX_FILE_OPEN_SLEEP_SEC);
        for _ in 0..200 {
            let next = backoff.next(Some(10_000.0));
            assert!((0.1..=MAX_FILE_OPEN_SLEEP_SEC).contains(&next));
        }
    }

    #[test]
    fn test_seeded_source_is_not_secure() {
        assert!(!RandomSource::seeded(1).is_secure());
        let mut random = RandomSource::seeded(1);
        let sample = random.next_fraction();
        assert!((0.0..1.0).contains(&sample));
    }

    #[test]
    fn test_open_failure_exhausts_retries() {
        let sleeps = RecordingSleeper::default();
        let mut appender = CsvAppender::with_parts(
            RetryPolicy::default(),
            RandomSource::seeded(9),
            Box::new(sleeps.clone()),
        );
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("out.csv");

        assert!(!appender.append(&path, "a,b", "1,2").unwrap());

        let recorded = sleeps.0.lock().unwrap();
        assert_eq!(recorded.len(), (MAX_CSV_FILE_OPEN_TRIES - 1) as usize);
        assert_eq!(recorded[0], Duration::from_secs(1));
        assert!(recorded
            .iter()
            .all(|d| d.as_secs_f64() <= MAX_FILE_OPEN_SLEEP_SEC));
    }

    #[test]
    fn test_empty_arguments_rejected() {
        let mut appender = CsvAppender::with_parts(
            RetryPolicy::default(),
            RandomSource::seeded(1),
            Box::new(RecordingSleeper::default()),
        );
        assert!(!appender.append(Path::new(""), "h", "d").unwrap());
        let dir = tempfile::tempdir().unwrap();
        assert!(!appender.append(&dir.path().join("x.csv"), "h", "").unwrap());
    }

    #[test]
    fn test_header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let mut appender = CsvAppender::with_parts(
            RetryPolicy::default(),
            RandomSource::seeded(1),
            Box::new(RecordingSleeper::default()),
        );

        assert!(appender.append(&path, "a,b", "1,2").unwrap());
        assert!(appender.append(&path, "a,b", "3,4").unwrap());

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "a,b\n1,2\n3,4\n");
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_write_failure_after_open_is_an_error() {
        let sleeps = RecordingSleeper::default();
        let mut appender = CsvAppender::with_parts(
            RetryPolicy::default(),
            RandomSource::seeded(2),
            Box::new(sleeps.clone()),
        );

        let err = appender.append(Path::new("/dev/full"), "h", "d").unwrap_err();
        assert!(matches!(err, crate::Error::Io(_)));
        assert!(sleeps.0.lock().unwrap().is_empty());
    }
}
