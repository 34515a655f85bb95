// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Retry utilities with exponential backoff.
//!
//! Operations report failures as [`Failure`]: a transient failure is retried
//! until the time budget is spent, a permanent one stops the loop at once.
//! Any error converts into a transient failure, so `?` works inside
//! operations; use [`permanent`] to mark errors that waiting cannot fix.

use crate::context::{Context, ContextError};
use std::fmt;
use std::future::Future;
use std::ops::ControlFlow;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{interval_at, sleep, sleep_until, timeout_at, Instant, MissedTickBehavior};
use tracing::debug;

/// Default divider applied to the retry window to get one attempt's budget.
pub const DEFAULT_ATTEMPT_DIVIDER: u32 = 2;

const INITIAL_INTERVAL: Duration = Duration::from_millis(500);
const MIN_INTERVAL: Duration = Duration::from_millis(1);
const MULTIPLIER: f64 = 1.5;

/// Outcome of a single failed attempt.
#[derive(Debug)]
pub enum Failure<E> {
    Transient(E),
    Permanent(E),
}

impl<E> From<E> for Failure<E> {
    fn from(err: E) -> Self {
        Failure::Transient(err)
    }
}

/// Mark `err` as permanent: the retry loop returns it without another attempt.
pub fn permanent<E>(err: E) -> Failure<E> {
    Failure::Permanent(err)
}

#[derive(Error, Debug)]
pub enum RetryError<E: fmt::Debug + fmt::Display> {
    #[error("{0}")]
    Permanent(E),

    #[error("timed out after {elapsed:?}")]
    Timeout { elapsed: Duration, last: Option<E> },

    #[error("retry aborted: {0}")]
    Cancelled(ContextError),
}

impl<E: fmt::Debug + fmt::Display> RetryError<E> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, RetryError::Timeout { .. })
    }

    /// The underlying operation error, if one was recorded.
    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::Permanent(err) => Some(err),
            RetryError::Timeout { last, .. } => last,
            RetryError::Cancelled(_) => None,
        }
    }
}

/// Exponential backoff bounded by a total time budget.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    pub initial_interval: Duration,
    pub multiplier: f64,
    pub max_interval: Duration,
    pub max_elapsed: Duration,
}

impl ExponentialBackoff {
    /// Backoff that spends at most `timeout`, never sleeping longer than a
    /// third of it between attempts.
    pub fn for_timeout(timeout: Duration) -> Self {
        let max_interval = (timeout / 3).max(MIN_INTERVAL);
        Self {
            initial_interval: INITIAL_INTERVAL.min(max_interval),
            multiplier: MULTIPLIER,
            max_interval,
            max_elapsed: timeout,
        }
    }

    /// Delay before the attempt following attempt number `attempt` (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(30) as i32;
        let delay = self.initial_interval.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::from_secs_f64(delay.min(self.max_interval.as_secs_f64())).max(MIN_INTERVAL)
    }
}

/// Run `op` until it succeeds, fails permanently or `timeout` elapses.
pub async fn retry<T, E, F, Fut>(mut op: F, timeout: Duration) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Failure<E>>>,
    E: fmt::Debug + fmt::Display,
{
    let ctx = Context::background();
    let backoff = ExponentialBackoff::for_timeout(timeout);
    run_with_backoff(&ctx, &backoff, || {
        let attempt = op();
        async move { Ok(attempt.await) }
    })
    .await
}

/// Like [`retry`], bounded additionally by `ctx`.
///
/// The retry window is the shorter of `timeout` and the context's remaining
/// time. Each attempt receives a child context limited to
/// `window / divider` (default [`DEFAULT_ATTEMPT_DIVIDER`]); an attempt that
/// overruns its budget counts as a transient failure.
pub async fn retry_with_context<T, E, F, Fut>(
    ctx: &Context,
    mut op: F,
    timeout: Duration,
    divider: Option<u32>,
) -> Result<T, RetryError<E>>
where
    F: FnMut(Context) -> Fut,
    Fut: Future<Output = Result<T, Failure<E>>>,
    E: fmt::Debug + fmt::Display,
{
    let window = match ctx.remaining() {
        Some(remaining) if remaining < timeout => remaining,
        _ => timeout,
    };
    let budget = window / divider.unwrap_or(DEFAULT_ATTEMPT_DIVIDER).max(1);
    let backoff = ExponentialBackoff::for_timeout(window);

    run_with_backoff(ctx, &backoff, || {
        let attempt_ctx = ctx.with_timeout(budget);
        let attempt = op(attempt_ctx.clone());
        async move { attempt_ctx.run(attempt).await }
    })
    .await
}

async fn run_with_backoff<T, E, F, Fut>(
    ctx: &Context,
    backoff: &ExponentialBackoff,
    mut attempt: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Result<T, Failure<E>>, ContextError>>,
    E: fmt::Debug + fmt::Display,
{
    let start = Instant::now();
    let mut attempts = 0u32;
    let mut last = None;

    loop {
        attempts += 1;

        match attempt().await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(Failure::Permanent(err))) => return Err(RetryError::Permanent(err)),
            Ok(Err(Failure::Transient(err))) => {
                debug!(attempt = attempts, error = %err, "Attempt failed");
                last = Some(err);
            }
            Err(err) => {
                if let Some(parent) = ctx.err() {
                    return Err(RetryError::Cancelled(parent));
                }
                debug!(attempt = attempts, "Attempt exceeded its budget: {}", err);
            }
        }

        let elapsed = start.elapsed();
        let remaining = backoff.max_elapsed.saturating_sub(elapsed);
        if remaining.is_zero() {
            return Err(RetryError::Timeout { elapsed, last });
        }

        let delay = backoff.delay_for_attempt(attempts).min(remaining);
        if let Err(err) = ctx.run(sleep(delay)).await {
            return Err(RetryError::Cancelled(err));
        }
    }
}

/// Poll `check` every `interval` until it breaks, fails or `timeout` passes.
///
/// `ControlFlow::Break` ends the loop successfully; an error from `check`
/// ends it immediately and is returned as [`RetryError::Permanent`].
pub async fn timeout<E, F, Fut>(
    interval: Duration,
    timeout: Duration,
    mut check: F,
) -> Result<(), RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<ControlFlow<()>, E>>,
    E: fmt::Debug + fmt::Display,
{
    let start = Instant::now();
    let deadline = start + timeout;
    let mut ticker = interval_at(start + interval, interval.max(MIN_INTERVAL));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = sleep_until(deadline) => {
                return Err(RetryError::Timeout { elapsed: start.elapsed(), last: None });
            }
            _ = ticker.tick() => {}
        }

        // A slow check is cut off by the deadline as well
        match timeout_at(deadline, check()).await {
            Ok(Ok(ControlFlow::Break(()))) => return Ok(()),
            Ok(Ok(ControlFlow::Continue(()))) => {}
            Ok(Err(err)) => return Err(RetryError::Permanent(err)),
            Err(_) => {
                return Err(RetryError::Timeout { elapsed: start.elapsed(), last: None });
            }
        }
    }
}
