//! Per-item retry loop with exponential backoff
//!
//! Drives one item through [`AttemptState`], sleeping between attempts. The
//! sleep is cut short by a shutdown request, in which case the item is left
//! in its non-terminal `Attempting` state and nothing is recorded for it.

use crate::config::RetryConfig;
use crate::crawler::shutdown::ShutdownSignal;
use crate::state::{AttemptEvent, AttemptState};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Attempt limit and backoff curve for one item
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Attempts per item, including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_retries,
            base_delay: Duration::from_millis(config.backoff_base_ms),
            max_delay: Duration::from_millis(config.backoff_max_ms),
            multiplier: config.backoff_multiplier,
        }
    }

    /// Delay after failed attempt `attempt` (1-based)
    ///
    /// `base * multiplier^(attempt - 1)`, capped at `max_delay`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let millis = self.base_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

/// What happened to one item
#[derive(Debug)]
pub struct AttemptReport<T, E> {
    /// `Succeeded`, `Failed`, or `Attempting(n)` if shutdown cut a backoff short
    pub state: AttemptState,

    /// Attempts actually made
    pub attempts: u32,

    pub value: Option<T>,

    pub last_error: Option<E>,

    /// Backoff delays that were started, in order
    pub delays: Vec<Duration>,
}

impl<T, E> AttemptReport<T, E> {
    /// True if shutdown stopped the item before it reached a terminal state
    pub fn is_interrupted(&self) -> bool {
        !self.state.is_terminal()
    }
}

/// Runs `operation` until it succeeds, exhausts its attempts, or is interrupted
///
/// # Arguments
///
/// * `policy` - Attempt limit and backoff curve
/// * `shutdown` - Interrupts the backoff sleep
/// * `label` - Identifies the item in log lines
/// * `operation` - Called with the 1-based attempt number
/// * `is_retryable` - Errors for which this returns false fail the item at once
///
/// # Returns
///
/// An [`AttemptReport`] whose `state` is terminal unless shutdown was
/// requested during a backoff.
pub async fn run_attempts<T, E, F, Fut, R>(
    policy: &RetryPolicy,
    shutdown: &ShutdownSignal,
    label: &str,
    mut operation: F,
    is_retryable: R,
) -> AttemptReport<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut state = AttemptState::Pending.advance(AttemptEvent::Start, max_attempts);
    let mut attempts = 0;
    let mut last_error = None;
    let mut delays = Vec::new();

    while let Some(attempt) = state.attempt() {
        attempts = attempt;

        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(item = label, attempt, "Succeeded after retry");
                }
                return AttemptReport {
                    state: state.advance(AttemptEvent::Success, max_attempts),
                    attempts,
                    value: Some(value),
                    last_error: None,
                    delays,
                };
            }
            Err(e) => {
                if !is_retryable(&e) {
                    tracing::debug!(item = label, attempt, error = %e, "Not retrying");
                    // Treat this attempt as the last one allowed
                    state = state.advance(AttemptEvent::Failure, attempt);
                    last_error = Some(e);
                    break;
                }

                let next = state.advance(AttemptEvent::Failure, max_attempts);

                if next.is_terminal() {
                    state = next;
                    tracing::warn!(
                        item = label,
                        attempts = attempt,
                        error = %e,
                        "All attempts failed"
                    );
                    last_error = Some(e);
                    break;
                }

                let delay = policy.backoff_delay(attempt);
                tracing::warn!(
                    item = label,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Attempt failed, retrying"
                );
                last_error = Some(e);
                delays.push(delay);

                // The next attempt only begins once the backoff has fully elapsed
                if !shutdown.sleep(delay).await {
                    tracing::info!(item = label, "Retry abandoned for shutdown");
                    break;
                }
                state = next;
            }
        }
    }

    AttemptReport {
        state,
        attempts,
        value: None,
        last_error,
        delays,
    }
}
