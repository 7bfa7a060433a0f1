// SPDX-License-Identifier: Apache-2.0

//! A thread-safe token bucket refilled continuously at `capacity` units per minute.
//!
//! The bucket starts full, so a whole minute's allowance may be spent as a
//! burst. Refill is proportional to elapsed time rather than stepped at
//! window boundaries. A bucket with zero capacity is disabled and admits
//! everything.
//!
//! Units are only taken when they are available. A waiter that is cancelled
//! never charges the bucket, and no ordering between waiters is promised.

use crate::context::Context;
use crate::error::Error;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

/// Seconds over which a full bucket is refilled.
pub const SECONDS_PER_MINUTE: f64 = 60.0;

/// Smallest suspension between two admission attempts.
const MIN_WAIT: Duration = Duration::from_millis(1);

/// Slack absorbing floating point error in the refill arithmetic.
const EPSILON: f64 = 1e-9;

/// Refill rate expressed as units per second.
/// Must be finite and positive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Limit(f64);

impl Limit {
    /// Creates the refill rate for a per-minute quota.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` if the quota is zero.
    pub fn per_minute(units_per_minute: u64) -> Result<Self, Error> {
        if units_per_minute == 0 {
            return Err(Error::invalid_argument(
                "units_per_minute",
                "a refill rate must be positive",
            ));
        }
        Ok(Limit(units_per_minute as f64 / SECONDS_PER_MINUTE))
    }

    /// Returns the rate as units per second.
    pub fn rate(self) -> f64 {
        self.0
    }

    /// Converts units to the duration required to accumulate them at this rate.
    fn duration_from_tokens(self, tokens: f64) -> Duration {
        let seconds = tokens / self.0;
        Duration::from_secs_f64(seconds.max(0.0))
    }

    /// Converts a duration to the number of units accumulated at this rate.
    fn tokens_from_duration(self, duration: Duration) -> f64 {
        duration.as_secs_f64() * self.0
    }
}

#[derive(Debug)]
struct State {
    /// Units available as of `last`.
    tokens: f64,
    /// Last time `tokens` was brought up to date.
    last: Instant,
}

/// Single-resource admission primitive.
///
/// Time is read from tokio's clock, so refill and waits both follow a paused
/// runtime in tests.
#[derive(Debug)]
pub struct TokenBucket {
    /// Maximum units available at once; zero disables the bucket.
    capacity: u64,
    /// Refill rate, absent when the bucket is disabled.
    limit: Option<Limit>,
    state: Mutex<State>,
}

impl TokenBucket {
    /// Creates a full bucket admitting `capacity` units per minute.
    /// A capacity of zero yields a disabled bucket.
    pub fn per_minute(capacity: u64) -> Self {
        TokenBucket {
            capacity,
            limit: Limit::per_minute(capacity).ok(),
            state: Mutex::new(State {
                tokens: capacity as f64,
                last: Instant::now(),
            }),
        }
    }

    /// Creates a disabled bucket that admits every request.
    pub fn unlimited() -> Self {
        Self::per_minute(0)
    }

    /// Returns the capacity (the per-minute quota).
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Returns false for a disabled bucket.
    pub fn is_limited(&self) -> bool {
        self.limit.is_some()
    }

    /// Returns the units available now. A disabled bucket reports infinity.
    pub fn available(&self) -> f64 {
        self.tokens_at(Instant::now())
    }

    /// Returns the units that will be available at `at`, without modifying state.
    pub fn tokens_at(&self, at: Instant) -> f64 {
        let Some(limit) = self.limit else {
            return f64::INFINITY;
        };
        let state = self.lock();
        Self::refilled(&state, limit, self.capacity, at)
    }

    /// Takes `n` units if they are available right now.
    ///
    /// # Errors
    ///
    /// Returns `Error::QuotaExceedsCapacity` if `n` is larger than the bucket.
    pub fn try_acquire(&self, n: u64) -> Result<bool, Error> {
        let Some(limit) = self.check(n)? else {
            return Ok(true);
        };
        Ok(self.take_or_delay(limit, n).is_none())
    }

    /// Waits until `n` units are available and takes them.
    ///
    /// Returns immediately when the bucket is disabled or `n` is zero. The
    /// wait ends early if `ctx` is cancelled or its deadline passes, in
    /// which case nothing is taken.
    ///
    /// # Errors
    ///
    /// - `Error::QuotaExceedsCapacity` if `n` is larger than the bucket.
    /// - `Error::Cancelled` or `Error::DeadlineExceeded` from `ctx`. A wait
    ///   that cannot finish before the deadline fails without sleeping.
    pub async fn acquire(&self, ctx: &Context, n: u64) -> Result<(), Error> {
        let Some(limit) = self.check(n)? else {
            return Ok(());
        };
        if let Some(err) = ctx.err() {
            return Err(err);
        }

        loop {
            let Some(delay) = self.take_or_delay(limit, n) else {
                return Ok(());
            };

            if let Some(deadline) = ctx.deadline() {
                // A wait ending exactly at the deadline would lose the race to it.
                if Instant::now() + delay >= deadline {
                    trace!(requested = n, ?delay, "wait would outlive the deadline");
                    return Err(Error::DeadlineExceeded);
                }
            }

            trace!(requested = n, capacity = self.capacity, ?delay, "waiting for units");
            tokio::select! {
                biased;
                reason = ctx.done() => {
                    trace!(requested = n, %reason, "wait abandoned");
                    return Err(reason);
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Validates `n`, returning the refill rate when the request must be gated.
    fn check(&self, n: u64) -> Result<Option<Limit>, Error> {
        let Some(limit) = self.limit else {
            return Ok(None);
        };
        if n == 0 {
            return Ok(None);
        }
        if n > self.capacity {
            return Err(Error::QuotaExceedsCapacity {
                requested: n,
                capacity: self.capacity,
            });
        }
        Ok(Some(limit))
    }

    /// Takes `n` units and returns `None`, or returns how long to wait for the shortfall.
    fn take_or_delay(&self, limit: Limit, n: u64) -> Option<Duration> {
        let now = Instant::now();
        let mut state = self.lock();
        let tokens = Self::refilled(&state, limit, self.capacity, now);
        state.tokens = tokens;
        state.last = now;

        let wanted = n as f64;
        if tokens + EPSILON >= wanted {
            state.tokens = (tokens - wanted).max(0.0);
            None
        } else {
            Some(limit.duration_from_tokens(wanted - tokens).max(MIN_WAIT))
        }
    }

    fn refilled(state: &State, limit: Limit, capacity: u64, at: Instant) -> f64 {
        let elapsed = at.saturating_duration_since(state.last);
        let tokens = state.tokens + limit.tokens_from_duration(elapsed);
        tokens.min(capacity as f64)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // The state is two plain numbers, always consistent between statements.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
