//! Bounded retry schedule for transient transfer failures.

use std::time::Duration;

/// Default wait before each retry, in milliseconds: immediately, then
/// increasing up to a minute.
pub const DEFAULT_RETRY_DELAYS: [u64; 7] = [0, 3_000, 5_000, 10_000, 20_000, 60_000, 60_000];

/// Ordered list of waits applied before successive retries.
///
/// A schedule with `n` delays permits `n` retries, i.e. `n + 1` attempts
/// in total before the transfer is considered exhausted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySchedule {
    delays: Vec<Duration>,
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self::from_millis(&DEFAULT_RETRY_DELAYS)
    }
}

impl RetrySchedule {
    /// Creates a schedule from explicit delays.
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    /// Creates a schedule from millisecond delays.
    pub fn from_millis(delays: &[u64]) -> Self {
        Self::new(delays.iter().map(|&ms| Duration::from_millis(ms)).collect())
    }

    /// A schedule that never retries.
    pub fn none() -> Self {
        Self::new(Vec::new())
    }

    /// The configured delays.
    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    /// Maximum number of retries.
    pub fn max_retries(&self) -> usize {
        self.delays.len()
    }

    /// Starts a fresh cursor over this schedule.
    pub fn cursor(&self) -> RetryCursor<'_> {
        RetryCursor {
            schedule: self,
            retries: 0,
        }
    }
}

/// Position within a [`RetrySchedule`] for one transfer.
#[derive(Debug)]
pub struct RetryCursor<'a> {
    schedule: &'a RetrySchedule,
    retries: usize,
}

impl RetryCursor<'_> {
    /// Returns the delay before the next retry, or `None` once the
    /// schedule is used up.
    pub fn next_delay(&mut self) -> Option<Duration> {
        let delay = self.schedule.delays.get(self.retries).copied()?;
        self.retries += 1;
        Some(delay)
    }

    /// Resets the budget. Called when a failed attempt still moved the
    /// acknowledged offset forward.
    pub fn reset(&mut self) {
        self.retries = 0;
    }

    /// Retries consumed so far.
    pub fn retries(&self) -> usize {
        self.retries
    }
}
