//! Retry policy and rate limiting for provider fallbacks

use std::sync::Mutex;
use std::time::Duration;

use log::{debug, trace};
use tokio::time::Instant;

/// Retry policy for transient provider faults
#[derive(Debug, Clone)]
pub struct RetryPolicy
{   pub max_attempts: usize
  , pub backoff_multiplier: f32
  , pub initial_backoff: Duration
}

impl RetryPolicy
{   /// Create a new retry policy
    pub fn new(
      max_attempts: usize
    , backoff_multiplier: f32
    , initial_backoff_ms: u64
    ) -> Self
    {   RetryPolicy
        {   max_attempts: max_attempts.max(1)
          , backoff_multiplier
          , initial_backoff: Duration::from_millis(
              initial_backoff_ms
            )
        }
    }

    /// Whether another call to the same adapter is allowed after
    /// `attempts_made` calls
    pub fn allows_retry(&self, attempts_made: usize) -> bool
    {   attempts_made < self.max_attempts
    }

    /// Calculate backoff duration before retry number `retry`
    /// (0 for the first retry)
    pub fn backoff_for_attempt(
      &self
    , retry: usize
    ) -> Duration
    {   let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let multiplier
          = f64::from(self.backoff_multiplier).powi(exponent);
        let millis
          = self.initial_backoff.as_millis() as f64 * multiplier;
        debug!("Backoff before retry {} is {:.0}ms", retry + 1, millis);
        if millis.is_finite()
        {   Duration::from_millis(millis as u64)
        } else
        {   Duration::MAX
        }
    }
}

impl Default for RetryPolicy
{   fn default() -> Self
    {   RetryPolicy::new(3, 2.0, 500)
    }
}

/// Minimum spacing between request starts on one provider.
///
/// Shared by every concurrent `generate()` call that uses the provider.
/// Only the slot reservation holds the lock; the wait happens after it
/// is released and the network call never runs under it.
#[derive(Debug)]
pub struct RateLimiter
{   min_interval: Duration
  , next_slot: Mutex<Option<Instant>>
}

impl RateLimiter
{   pub fn new(min_interval: Duration) -> Self
    {   RateLimiter
        {   min_interval
          , next_slot: Mutex::new(None)
        }
    }

    pub fn min_interval(&self) -> Duration
    {   self.min_interval
    }

    /// Reserve the next free slot and wait until it arrives
    pub async fn acquire(&self)
    {   let wait = self.reserve(Instant::now());
        if !wait.is_zero()
        {   trace!("Rate limiter waiting {:?}", wait);
            tokio::time::sleep(wait).await;
        }
    }

    /// Claim a slot at or after `now`; returns how long to wait for it
    fn reserve(&self, now: Instant) -> Duration
    {   let mut next = match self.next_slot.lock()
        {   Ok(guard) => guard
          , Err(poisoned) => poisoned.into_inner()
        };
        let slot = match *next
        {   Some(at) if at > now => at
          , _ => now
        };
        *next = Some(slot + self.min_interval);
        slot - now
    }
}
