//! Exponential backoff with full jitter (spec §4.4):
//! `D_i = min(D_max, D_base * 2^i)`, then a uniform random delay in
//! `[0, D_i]` is actually waited. Grounded in the `usealtoal-edgelord`
//! sibling's `ReconnectingDataStream` (`core/exchange/reconnecting.rs`),
//! generalized from that wrapper's circuit-breaker-flavored backoff to the
//! plain full-jitter formula this spec calls for.

use std::time::Duration;

use rand::Rng;

pub struct Backoff {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            attempt: 0,
        }
    }

    /// Returns the jittered delay for the next attempt and advances the
    /// consecutive-failure counter.
    pub fn next_delay(&mut self) -> Duration {
        let exp = self.attempt.min(31);
        self.attempt += 1;
        let capped_ms = self
            .base
            .as_millis()
            .saturating_mul(1u128 << exp)
            .min(self.max.as_millis());
        let jittered_ms = if capped_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=capped_ms)
        };
        Duration::from_millis(jittered_ms as u64)
    }

    /// Resets the consecutive-failure counter on a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.attempt
    }
}
