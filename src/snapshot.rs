//! Immutable captures of device state

use crate::client::{MetricMap, MetricValue, Profile, METRIC_KEY_UUID_PREFIX};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One atomically captured set of metric values plus its capture time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    metrics: MetricMap,
    captured_at: DateTime<Utc>,
    profile: Option<Profile>,
}

impl Snapshot {
    /// Create a snapshot from a finished fetch
    pub fn new(metrics: MetricMap, captured_at: DateTime<Utc>, profile: Option<Profile>) -> Self {
        Self {
            metrics,
            captured_at,
            profile,
        }
    }

    /// Build a snapshot from `(key, value)` pairs; handy for tests and simulators
    pub fn from_pairs<I, K, V>(pairs: I, captured_at: DateTime<Utc>) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<MetricValue>,
    {
        let metrics = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self::new(metrics, captured_at, None)
    }

    /// Return the same snapshot with a profile attached
    pub fn with_profile(mut self, profile: Profile) -> Self {
        self.profile = Some(profile);
        self
    }

    pub fn metrics(&self) -> &MetricMap {
        &self.metrics
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn profile(&self) -> Option<Profile> {
        self.profile
    }

    /// Cached value for a metric key
    pub fn metric(&self, key: &str) -> Option<&MetricValue> {
        self.metrics.get(key)
    }

    /// Numeric value for a metric key
    pub fn metric_f64(&self, key: &str) -> Option<f64> {
        self.metric(key).and_then(MetricValue::as_f64)
    }

    /// Unit UUID assembled from the `A_CYC_UUID0..7` words
    ///
    /// Each word holds 16 bits; word 0 is the most significant.
    pub fn device_uuid(&self) -> Option<Uuid> {
        let mut bytes = [0u8; 16];
        for i in 0..8 {
            let word = self
                .metric(&format!("{METRIC_KEY_UUID_PREFIX}{i}"))
                .and_then(MetricValue::as_i64)?;
            let word = u16::try_from(word).ok()?;
            bytes[i * 2..i * 2 + 2].copy_from_slice(&word.to_be_bytes());
        }
        Some(Uuid::from_bytes(bytes))
    }
}
