//! Retry policy for network operations.
//!
//! Each retry re-runs the whole operation from the start; nothing is
//! resumed. The wait between attempts is interruptible.

use std::time::Duration;

use crate::signal::{sleep_interruptibly, ShutdownHandler};

use super::ClientError;

/// How often and how patiently to retry an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero is treated as one.
    pub max_attempts: u32,
    /// Wait before the second attempt.
    pub delay: Duration,
    /// Factor applied to the wait after each failed attempt (1 = fixed).
    pub backoff: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(5),
            backoff: 1,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            backoff: 1,
        }
    }

    /// Set the backoff factor.
    #[must_use]
    pub fn with_backoff(mut self, backoff: u32) -> Self {
        self.backoff = backoff.max(1);
        self
    }

    /// Wait before attempt `attempt + 1`.
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = self
            .backoff
            .max(1)
            .saturating_pow(attempt.saturating_sub(1));
        self.delay.saturating_mul(factor)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts run out.
    ///
    /// `op` receives the 1-based attempt number.
    ///
    /// # Errors
    ///
    /// Non-retryable errors are returned unchanged. Exhaustion returns
    /// [`ClientError::RetriesExhausted`] wrapping the last failure; an
    /// interruption during the wait returns [`ClientError::Interrupted`].
    pub fn run<R>(
        &self,
        operation: &str,
        shutdown: &ShutdownHandler,
        op: impl FnMut(u32) -> Result<R, ClientError>,
    ) -> Result<R, ClientError> {
        self.run_if(operation, shutdown, ClientError::is_retryable, op)
    }

    /// [`run`](Self::run) with a custom retry predicate.
    ///
    /// # Errors
    ///
    /// As [`run`](Self::run).
    pub fn run_if<R>(
        &self,
        operation: &str,
        shutdown: &ShutdownHandler,
        retryable: impl Fn(&ClientError) -> bool,
        mut op: impl FnMut(u32) -> Result<R, ClientError>,
    ) -> Result<R, ClientError> {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let error = match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !retryable(&error) {
                return Err(error);
            }
            if attempt >= max_attempts {
                log::warn!("{operation} failed after {attempt} attempts: {error}");
                return Err(ClientError::RetriesExhausted {
                    operation: operation.to_string(),
                    attempts: attempt,
                    last: Box::new(error),
                });
            }

            let delay = self.delay_after(attempt);
            log::info!(
                "{operation} failed (attempt {attempt}/{max_attempts}): {error}. Retrying in {delay:?}"
            );
            sleep_interruptibly(delay, shutdown)
                .map_err(|_| ClientError::interrupted(format!("waiting to retry {operation}")))?;
        }
    }
}

/// Pool of retry credits shared by every poll of one tracking run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    remaining: u32,
}

impl RetryBudget {
    #[must_use]
    pub fn new(credits: u32) -> Self {
        Self { remaining: credits }
    }

    /// Take one credit; `false` once the pool is empty.
    pub fn consume(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        true
    }

    #[must_use]
    pub fn remaining(&self) -> u32 {
        self.remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::transport::TransportError;

    fn connect_error() -> ClientError {
        ClientError::Transport(TransportError::Connect {
            endpoint: "https://sast.example.com".to_string(),
            message: "connection reset".to_string(),
        })
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::ZERO)
    }

    #[test]
    fn test_succeeds_immediately() {
        let mut calls = 0;
        let result = policy(3).run("op", &ShutdownHandler::new(), |_| {
            calls += 1;
            Ok::<_, ClientError>(7)
        });
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_succeeds_after_transient_failures() {
        let mut seen = Vec::new();
        let result = policy(3).run("op", &ShutdownHandler::new(), |attempt| {
            seen.push(attempt);
            if attempt < 3 {
                Err(connect_error())
            } else {
                Ok("done")
            }
        });
        assert_eq!(result.unwrap(), "done");
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[test]
    fn test_exhaustion_wraps_last_error() {
        let mut calls = 0;
        let err = policy(2)
            .run("Scan submission", &ShutdownHandler::new(), |_| {
                calls += 1;
                Err::<(), _>(connect_error())
            })
            .unwrap_err();
        assert_eq!(calls, 2);
        match err {
            ClientError::RetriesExhausted {
                operation,
                attempts,
                last,
            } => {
                assert_eq!(operation, "Scan submission");
                assert_eq!(attempts, 2);
                assert!(matches!(*last, ClientError::Transport(TransportError::Connect { .. })));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_rejection_is_not_retried() {
        let mut calls = 0;
        let err = policy(5)
            .run("op", &ShutdownHandler::new(), |_| {
                calls += 1;
                Err::<(), _>(ClientError::Rejected {
                    operation: "Scan",
                    message: "project locked".to_string(),
                })
            })
            .unwrap_err();
        assert_eq!(calls, 1);
        assert!(matches!(err, ClientError::Rejected { .. }));
    }

    #[test]
    fn test_custom_predicate() {
        let mut calls = 0;
        let err = policy(3)
            .run_if(
                "op",
                &ShutdownHandler::new(),
                |e| matches!(e, ClientError::Rejected { .. }),
                |_| {
                    calls += 1;
                    Err::<(), _>(ClientError::Rejected {
                        operation: "CreateScanReport",
                        message: "busy".to_string(),
                    })
                },
            )
            .unwrap_err();
        assert_eq!(calls, 3);
        assert!(matches!(err, ClientError::RetriesExhausted { attempts: 3, .. }));
    }

    #[test]
    fn test_interrupted_between_attempts() {
        let shutdown = ShutdownHandler::new();
        shutdown.request_shutdown();
        let mut calls = 0;
        let err = RetryPolicy::new(3, Duration::from_secs(60))
            .run("op", &shutdown, |_| {
                calls += 1;
                Err::<(), _>(connect_error())
            })
            .unwrap_err();
        assert_eq!(calls, 1);
        assert!(err.is_interrupted());
    }

    #[test]
    fn test_backoff_delays() {
        let policy = RetryPolicy::new(4, Duration::from_secs(2)).with_backoff(3);
        assert_eq!(policy.delay_after(1), Duration::from_secs(2));
        assert_eq!(policy.delay_after(2), Duration::from_secs(6));
        assert_eq!(policy.delay_after(3), Duration::from_secs(18));
        assert_eq!(RetryPolicy::default().delay_after(3), Duration::from_secs(5));
    }

    #[test]
    fn test_budget() {
        let mut budget = RetryBudget::new(2);
        assert!(budget.consume());
        assert!(budget.consume());
        assert!(!budget.consume());
        assert_eq!(budget.remaining(), 0);
    }
}
