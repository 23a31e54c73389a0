//! Token Bucket Rate Limiter
//!
//! One global bucket for outbound notifications. Refilled lazily on every
//! access at `per_minute / 60` tokens per second, capped at `burst`, and
//! created full.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Global token bucket.
#[derive(Debug)]
pub struct TokenBucket {
    disabled: bool,
    rate_per_sec: f64,
    burst: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a bucket.
    ///
    /// A non-positive `per_minute` disables limiting; a non-positive
    /// `burst` means `per_minute`.
    #[must_use]
    pub fn new(per_minute: i64, burst: i64) -> Self {
        let disabled = per_minute <= 0;
        let burst = if burst <= 0 { per_minute } else { burst };
        #[allow(clippy::cast_precision_loss)]
        let (rate_per_sec, burst) = if disabled {
            (0.0, 0.0)
        } else {
            (per_minute as f64 / 60.0, burst as f64)
        };
        Self {
            disabled,
            rate_per_sec,
            burst,
            state: Mutex::new(BucketState {
                tokens: burst,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Whether the bucket lets everything through.
    #[must_use]
    pub const fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Take one token if available.
    pub fn allow(&self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    /// Take one token if available at `now`.
    pub fn try_acquire_at(&self, now: Instant) -> bool {
        if self.disabled {
            return true;
        }
        let mut state = self.state.lock();
        self.refill(&mut state, now);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Time until one whole token is available.
    #[must_use]
    pub fn time_until_next(&self) -> Duration {
        if self.disabled || self.rate_per_sec <= 0.0 {
            return Duration::ZERO;
        }
        let mut state = self.state.lock();
        self.refill(&mut state, Instant::now());
        if state.tokens >= 1.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64((1.0 - state.tokens) / self.rate_per_sec)
    }

    /// Wait up to `max_wait` for a token.
    ///
    /// Sleeps for the time until the next token, bounded by the deadline.
    pub async fn wait_for_token(&self, max_wait: Duration) -> bool {
        if self.disabled {
            return true;
        }
        let deadline = Instant::now() + max_wait;
        loop {
            if self.allow() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let sleep_for = self
                .time_until_next()
                .max(Duration::from_millis(1))
                .min(deadline - now);
            tokio::time::sleep(sleep_for).await;
        }
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        if elapsed <= 0.0 {
            return;
        }
        state.tokens = (state.tokens + elapsed * self.rate_per_sec).min(self.burst);
        state.last_refill = now;
    }
}
