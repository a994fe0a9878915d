//! Common test utilities

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use ventilation_coordinator::coordinator::StateFetcher;
use ventilation_coordinator::dispatcher::RefreshTrigger;
use ventilation_coordinator::{CoordinatorError, MetricValue, Result, Snapshot};

/// Fetcher that reports a growing `bytes` counter and tracks concurrency
///
/// Fetch `n` returns `bytes = 1000 * n` captured at `t = n` seconds.
pub struct CountingFetcher {
    delay: Duration,
    calls: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    fail: AtomicBool,
    step: AtomicI64,
}

impl CountingFetcher {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            step: AtomicI64::new(1000),
        }
    }

    /// Counter increase per fetch
    pub fn with_step(self, step: i64) -> Self {
        self.step.store(step, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl StateFetcher for CountingFetcher {
    async fn fetch(&self) -> Result<Snapshot> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) as i64 + 1;
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.fail.load(Ordering::SeqCst) {
            return Err(CoordinatorError::transport("device unreachable"));
        }
        let bytes = self.step.load(Ordering::SeqCst) * n;
        Ok(Snapshot::from_pairs(
            [("bytes", MetricValue::Int(bytes))],
            at(n),
        ))
    }
}

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

/// Forwards refreshes to an inner trigger and counts them
pub struct CountingRefresher {
    inner: Arc<dyn RefreshTrigger>,
    calls: AtomicUsize,
}

impl CountingRefresher {
    pub fn new(inner: Arc<dyn RefreshTrigger>) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RefreshTrigger for CountingRefresher {
    async fn refresh_now(&self) -> Result<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.refresh_now().await
    }
}
