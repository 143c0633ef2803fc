//! The randomized election timeout.

use std::time::{Duration, Instant};

use rand_core::RngCore;

/// Tracks when this server should next give up on hearing from a leader.
///
/// Each reset picks a fresh timeout uniformly from `[low, 2 * low)` so that
/// split votes resolve quickly (Raft §5.2). The tracker never reads a clock
/// of its own; the host passes `now` into every call.
pub struct ElectionTimeoutTimer<R> {
    rng: R,
    election_timeout_low: Duration,
    current_duration: Duration,
    expiry: Instant,
}

impl<R: RngCore> ElectionTimeoutTimer<R> {
    /// Constructs a timer and starts its first timeout period at `now`.
    ///
    /// `rng` should produce different sequences on every server of a
    /// cluster, or all followers will time out in lockstep.
    pub fn new(rng: R, election_timeout_low: Duration, now: Instant) -> Self {
        let mut timer = Self {
            rng,
            election_timeout_low,
            current_duration: election_timeout_low,
            expiry: now,
        };
        timer.reset(now);
        timer
    }

    /// Picks a fresh random timeout duration and restarts the period at
    /// `now`.
    pub fn reset(&mut self, now: Instant) {
        let low_nanos = self.election_timeout_low.as_nanos() as u64;
        let jitter = self.rng.next_u64().checked_rem(low_nanos).unwrap_or(0);
        self.current_duration = self.election_timeout_low + Duration::from_nanos(jitter);
        self.expiry = now + self.current_duration;
    }

    /// Returns whether the current timeout period has elapsed at `now`.
    pub fn expired(&self, now: Instant) -> bool {
        now >= self.expiry
    }

    /// Returns the instant at which the current period expires.
    pub fn expiry(&self) -> Instant {
        self.expiry
    }

    /// Returns the randomly chosen duration of the current period.
    pub fn current_duration(&self) -> Duration {
        self.current_duration
    }
}
