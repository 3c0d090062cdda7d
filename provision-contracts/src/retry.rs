// SPDX-License-Identifier: GPL-3.0-only

//! Bounded retry with a fixed delay
//!
//! Retrying is sequential: the caller blocks until the operation succeeds, a
//! non-retryable error shows up, or attempts run out.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Source of delays between attempts. Tests substitute a recording fake.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::once()
    }
}

impl RetryPolicy {
    pub const fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }

    pub const fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Runs `operation` until it succeeds or the policy is exhausted.
    ///
    /// Only errors whose kind is retryable trigger another attempt; the last
    /// error is returned unchanged.
    pub fn run<T, F>(&self, sleeper: &dyn Sleeper, label: &str, mut operation: F) -> Result<T>
    where
        F: FnMut(u32) -> Result<T>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            match operation(attempt) {
                Ok(value) => return Ok(value),
                Err(error) if attempt < attempts && error.kind().is_retryable() => {
                    tracing::warn!(
                        "{} failed (attempt {}/{}): {}",
                        label,
                        attempt,
                        attempts,
                        error
                    );
                    sleeper.sleep(self.delay);
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::ProvisionError;

    #[derive(Default)]
    struct FakeClock {
        slept: Mutex<Vec<Duration>>,
    }

    impl Sleeper for FakeClock {
        fn sleep(&self, duration: Duration) {
            self.slept.lock().expect("clock lock").push(duration);
        }
    }

    fn busy() -> ProvisionError {
        ProvisionError::Execution {
            command: "udevadm settle".to_string(),
            exit_code: Some(1),
            stdout: String::new(),
            stderr: "busy".to_string(),
        }
    }

    #[test]
    fn retries_transient_errors_until_success() {
        let clock = FakeClock::default();
        let policy = RetryPolicy::new(5, Duration::from_secs(2));

        let value = policy
            .run(&clock, "settle", |attempt| {
                if attempt < 3 { Err(busy()) } else { Ok(attempt) }
            })
            .expect("third attempt succeeds");

        assert_eq!(value, 3);
        assert_eq!(
            *clock.slept.lock().expect("clock lock"),
            vec![Duration::from_secs(2), Duration::from_secs(2)]
        );
    }

    #[test]
    fn gives_up_after_attempts() {
        let clock = FakeClock::default();
        let policy = RetryPolicy::new(3, Duration::from_millis(10));
        let mut calls = 0;

        let result: Result<()> = policy.run(&clock, "settle", |_| {
            calls += 1;
            Err(busy())
        });

        assert!(result.is_err());
        assert_eq!(calls, 3);
        assert_eq!(clock.slept.lock().expect("clock lock").len(), 2);
    }

    #[test]
    fn integrity_errors_are_not_retried() {
        let clock = FakeClock::default();
        let policy = RetryPolicy::new(5, Duration::from_secs(1));
        let mut calls = 0;

        let result: Result<()> = policy.run(&clock, "verify", |_| {
            calls += 1;
            Err(ProvisionError::ImageChecksumMismatch {
                device: "/dev/sda3".to_string(),
                expected: "a".to_string(),
                actual: "b".to_string(),
            })
        });

        assert!(matches!(
            result,
            Err(ProvisionError::ImageChecksumMismatch { .. })
        ));
        assert_eq!(calls, 1);
        assert!(clock.slept.lock().expect("clock lock").is_empty());
    }

    #[test]
    fn zero_attempts_still_runs_once() {
        let clock = FakeClock::default();
        let policy = RetryPolicy::new(0, Duration::ZERO);
        let value = policy.run(&clock, "noop", |attempt| Ok(attempt)).expect("runs once");
        assert_eq!(value, 1);
    }
}
