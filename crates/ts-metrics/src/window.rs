use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// A sliding window of `(timestamp, value)` samples, pruned lazily.
///
/// Entries older than `horizon` are dropped whenever a new sample is
/// pushed, bounding memory to roughly `horizon / inter-arrival-time`
/// entries. Rate queries sum the entries newer than a given sub-window
/// and divide by its length in seconds, per spec §4.1.
#[derive(Debug, Default)]
pub struct SlidingWindow {
    entries: VecDeque<(Instant, u64)>,
    horizon: Duration,
}

impl SlidingWindow {
    pub fn new(horizon: Duration) -> Self {
        Self {
            entries: VecDeque::new(),
            horizon,
        }
    }

    pub fn push(&mut self, now: Instant, value: u64) {
        self.entries.push_back((now, value));
        self.prune(now);
    }

    fn prune(&mut self, now: Instant) {
        while let Some(&(t, _)) = self.entries.front() {
            if now.saturating_duration_since(t) > self.horizon {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }

    /// Sum of values recorded within `window` of `now`.
    pub fn sum_within(&self, now: Instant, window: Duration) -> u64 {
        self.entries
            .iter()
            .rev()
            .take_while(|(t, _)| now.saturating_duration_since(*t) <= window)
            .map(|(_, v)| v)
            .sum()
    }

    /// Rate (sum / seconds) of values within `window` of `now`.
    pub fn rate_within(&self, now: Instant, window: Duration) -> f64 {
        let sum = self.sum_within(now, window);
        let secs = window.as_secs_f64();
        if secs <= 0.0 {
            0.0
        } else {
            sum as f64 / secs
        }
    }
}

/// A bounded, time-boxed buffer of samples used for on-demand percentiles
/// (e.g. payload sizes, TTFT). Overflow evicts the oldest sample.
#[derive(Debug)]
pub struct SampleBuffer {
    samples: VecDeque<(Instant, u64)>,
    cap: usize,
    time_box: Duration,
}

impl SampleBuffer {
    pub fn new(cap: usize, time_box: Duration) -> Self {
        Self {
            samples: VecDeque::with_capacity(cap.min(64)),
            cap,
            time_box,
        }
    }

    pub fn push(&mut self, now: Instant, value: u64) {
        while let Some(&(t, _)) = self.samples.front() {
            if now.saturating_duration_since(t) > self.time_box {
                self.samples.pop_front();
            } else {
                break;
            }
        }
        self.samples.push_back((now, value));
        while self.samples.len() > self.cap {
            self.samples.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// `p` in `[0, 100]`. Returns `None` if there are no samples.
    pub fn percentile(&self, p: f64) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }
        let mut values: Vec<u64> = self.samples.iter().map(|(_, v)| *v).collect();
        values.sort_unstable();
        let rank = ((p / 100.0) * (values.len() as f64 - 1.0)).round() as usize;
        values.get(rank.min(values.len() - 1)).copied()
    }

    pub fn average(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: u64 = self.samples.iter().map(|(_, v)| v).sum();
        Some(sum as f64 / self.samples.len() as f64)
    }
}
