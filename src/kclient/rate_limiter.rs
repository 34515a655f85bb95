// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Client-side request budget for the Kubernetes API server.
//!
//! A [`RateLimiter`] is a token bucket shared by every client built from the
//! same named factory. QPS and burst can be changed at runtime; holders of
//! the limiter see the new budget on their next request.

use crate::context::{Context, ContextError};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{ready, Context as TaskContext, Poll};
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, Instant, Sleep};
use tower::{BoxError, Layer, Service};
use tracing::{debug, info};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("rate limiter is stopped")]
    Stopped,

    #[error("rate limiter wait aborted: {0}")]
    Context(#[from] ContextError),

    #[error("rate limiter wait would exceed the context deadline")]
    WouldExceedDeadline,
}

/// Longest single wait handed out by a bucket
const MAX_WAIT: Duration = Duration::from_secs(24 * 60 * 60);

/// Map anything that is not a finite positive rate to 0, which means unlimited.
fn sanitize_qps(qps: f32) -> f32 {
    if qps.is_finite() && qps > 0.0 {
        qps
    } else {
        0.0
    }
}

#[derive(Debug)]
struct Bucket {
    qps: f32,
    burst: u32,
    tokens: f64,
    updated: Instant,
    stopped: bool,
}

impl Bucket {
    fn unlimited(&self) -> bool {
        self.qps <= 0.0
    }

    fn advance(&mut self, now: Instant) {
        if now > self.updated {
            let elapsed = now.duration_since(self.updated).as_secs_f64();
            self.tokens = (self.tokens + elapsed * f64::from(self.qps)).min(f64::from(self.burst));
            self.updated = now;
        }
    }

    /// Take one token, possibly going into debt, and return how long the
    /// caller has to wait before the token is really available.
    fn reserve(&mut self, now: Instant) -> Result<Duration, RateLimitError> {
        if self.stopped {
            return Err(RateLimitError::Stopped);
        }
        if self.unlimited() {
            return Ok(Duration::ZERO);
        }

        self.advance(now);
        self.tokens -= 1.0;
        if self.tokens >= 0.0 {
            return Ok(Duration::ZERO);
        }
        Ok(Duration::try_from_secs_f64(-self.tokens / f64::from(self.qps))
            .map_or(MAX_WAIT, |wait| wait.min(MAX_WAIT)))
    }

    fn release(&mut self) {
        if !self.unlimited() {
            self.tokens = (self.tokens + 1.0).min(f64::from(self.burst));
        }
    }
}

/// Token bucket rate limiter. All methods lock the bucket only for the
/// bookkeeping; waiting happens outside of the lock.
#[derive(Debug)]
pub struct RateLimiter {
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Create a limiter with a full bucket. A non-positive or non-finite
    /// `qps` disables limiting.
    pub fn new(qps: f32, burst: u32) -> Self {
        let burst = burst.max(1);
        Self {
            bucket: Mutex::new(Bucket {
                qps: sanitize_qps(qps),
                burst,
                tokens: f64::from(burst),
                updated: Instant::now(),
                stopped: false,
            }),
        }
    }

    /// Block until a token is available. Cancellation is not observed.
    pub async fn accept(&self) {
        if let Ok(wait) = self.reserve() {
            if !wait.is_zero() {
                sleep(wait).await;
            }
        }
    }

    /// Take a token if one is available right now.
    pub fn try_accept(&self) -> bool {
        let mut bucket = self.lock();
        if bucket.stopped {
            return false;
        }
        if bucket.unlimited() {
            return true;
        }
        bucket.advance(Instant::now());
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Block until a token is available or `ctx` is done.
    ///
    /// Fails immediately, without consuming a token, when the token would only
    /// become available after the context deadline.
    pub async fn wait(&self, ctx: &Context) -> Result<(), RateLimitError> {
        if let Some(err) = ctx.err() {
            return Err(err.into());
        }

        let wait = self.reserve()?;
        if wait.is_zero() {
            return Ok(());
        }

        if let Some(deadline) = ctx.deadline() {
            if Instant::now() + wait > deadline {
                self.lock().release();
                return Err(RateLimitError::WouldExceedDeadline);
            }
        }

        if let Err(err) = ctx.run(sleep(wait)).await {
            self.lock().release();
            return Err(err.into());
        }
        Ok(())
    }

    pub fn qps(&self) -> f32 {
        self.lock().qps
    }

    pub fn burst(&self) -> u32 {
        self.lock().burst
    }

    /// Change the sustained rate. Tokens accumulated so far are kept.
    pub fn set_qps(&self, qps: f32) {
        let mut bucket = self.lock();
        bucket.advance(Instant::now());
        bucket.qps = sanitize_qps(qps);
    }

    /// Change the bucket size, dropping tokens above the new size.
    pub fn set_burst(&self, burst: u32) {
        let mut bucket = self.lock();
        bucket.advance(Instant::now());
        bucket.burst = burst.max(1);
        bucket.tokens = bucket.tokens.min(f64::from(bucket.burst));
    }

    /// Stop the limiter; every later request through it fails.
    pub fn stop(&self) {
        self.lock().stopped = true;
    }

    fn reserve(&self) -> Result<Duration, RateLimitError> {
        self.lock().reserve(Instant::now())
    }

    fn lock(&self) -> MutexGuard<'_, Bucket> {
        self.bucket.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Named rate limiters, one per client identity.
#[derive(Debug)]
pub struct RateLimiters {
    settings: Mutex<(f32, u32)>,
    limiters: Mutex<HashMap<String, Arc<RateLimiter>>>,
}

impl RateLimiters {
    pub fn new(qps: f32, burst: u32) -> Self {
        Self {
            settings: Mutex::new((qps, burst)),
            limiters: Mutex::new(HashMap::new()),
        }
    }

    /// Get the limiter for `name`, creating it with the current settings.
    pub fn get(&self, name: &str) -> Arc<RateLimiter> {
        let mut limiters = self.limiters.lock().unwrap_or_else(PoisonError::into_inner);
        limiters
            .entry(name.to_string())
            .or_insert_with(|| {
                let (qps, burst) = *self.settings.lock().unwrap_or_else(PoisonError::into_inner);
                debug!(name, qps, burst, "Creating rate limiter");
                Arc::new(RateLimiter::new(qps, burst))
            })
            .clone()
    }

    /// Change the QPS of every existing and future limiter.
    pub fn set_qps(&self, qps: f32) {
        self.settings.lock().unwrap_or_else(PoisonError::into_inner).0 = qps;
        for limiter in self.limiters.lock().unwrap_or_else(PoisonError::into_inner).values() {
            limiter.set_qps(qps);
        }
        info!(qps, "Kubernetes client QPS updated");
    }

    /// Change the burst of every existing and future limiter.
    pub fn set_burst(&self, burst: u32) {
        self.settings.lock().unwrap_or_else(PoisonError::into_inner).1 = burst;
        for limiter in self.limiters.lock().unwrap_or_else(PoisonError::into_inner).values() {
            limiter.set_burst(burst);
        }
        info!(burst, "Kubernetes client burst updated");
    }
}

/// Tower layer metering every request of a client against a [`RateLimiter`].
#[derive(Debug, Clone)]
pub struct RateLimitLayer {
    limiter: Arc<RateLimiter>,
}

impl RateLimitLayer {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: self.limiter.clone(),
            delay: None,
            permit: false,
        }
    }
}

pub struct RateLimitService<S> {
    inner: S,
    limiter: Arc<RateLimiter>,
    delay: Option<Pin<Box<Sleep>>>,
    permit: bool,
}

impl<S, Req> Service<Req> for RateLimitService<S>
where
    S: Service<Req>,
    S::Error: Into<BoxError>,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<S::Response, BoxError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        while !self.permit {
            if let Some(delay) = self.delay.as_mut() {
                ready!(delay.as_mut().poll(cx));
                self.delay = None;
                self.permit = true;
                break;
            }

            match self.limiter.reserve() {
                Ok(wait) if wait.is_zero() => self.permit = true,
                Ok(wait) => self.delay = Some(Box::pin(sleep(wait))),
                Err(err) => return Poll::Ready(Err(err.into())),
            }
        }

        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        self.permit = false;
        let fut = self.inner.call(req);
        Box::pin(async move { fut.await.map_err(Into::into) })
    }
}
