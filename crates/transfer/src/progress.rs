use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

const DEFAULT_WINDOW: Duration = Duration::from_secs(5);
const DEFAULT_MAX_SAMPLES: usize = 100;

#[derive(Debug)]
struct SpeedSample {
    acked: u64,
    at: Instant,
}

/// Estimates throughput from acknowledged offsets over a sliding window.
///
/// Samples are cumulative offsets, so a retry that re-reports an earlier
/// offset never produces negative speed.
#[derive(Debug)]
pub struct SpeedCalculator {
    samples: VecDeque<SpeedSample>,
    max_samples: usize,
    window: Duration,
}

impl Default for SpeedCalculator {
    fn default() -> Self {
        Self::new(None, None)
    }
}

impl SpeedCalculator {
    /// Creates a new calculator.
    ///
    /// - `window`: time window for speed calculation (default 5 s).
    /// - `max_samples`: maximum retained samples (default 100).
    pub fn new(window: Option<Duration>, max_samples: Option<usize>) -> Self {
        Self {
            samples: VecDeque::new(),
            max_samples: max_samples.unwrap_or(DEFAULT_MAX_SAMPLES).max(2),
            window: window.unwrap_or(DEFAULT_WINDOW),
        }
    }

    /// Records the acknowledged offset at the current instant.
    pub fn record(&mut self, acked: u64) {
        self.record_at(acked, Instant::now());
    }

    /// Records the acknowledged offset at `at`.
    pub fn record_at(&mut self, acked: u64, at: Instant) {
        if self.samples.back().is_some_and(|last| acked < last.acked) {
            // Offset went backwards (remote lost data); restart the window.
            self.samples.clear();
        }
        self.samples.push_back(SpeedSample { acked, at });

        while let Some(front) = self.samples.front() {
            if self.samples.len() > 2 && at.duration_since(front.at) > self.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
        while self.samples.len() > self.max_samples {
            self.samples.pop_front();
        }
    }

    /// Average speed in bytes/second within the window.
    ///
    /// Returns 0.0 with fewer than 2 samples.
    pub fn bytes_per_second(&self) -> f64 {
        let (Some(first), Some(last)) = (self.samples.front(), self.samples.back()) else {
            return 0.0;
        };
        let elapsed = last.at.duration_since(first.at);
        if elapsed.is_zero() {
            return 0.0;
        }
        (last.acked - first.acked) as f64 / elapsed.as_secs_f64()
    }

    /// Estimated time to transfer `remaining` bytes. `None` while speed is zero.
    pub fn eta(&self, remaining: u64) -> Option<Duration> {
        let speed = self.bytes_per_second();
        if speed <= 0.0 {
            return None;
        }
        Duration::try_from_secs_f64(remaining as f64 / speed).ok()
    }

    /// Clears all recorded samples.
    pub fn reset(&mut self) {
        self.samples.clear();
    }
}
