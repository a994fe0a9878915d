//! Rate-based metrics derived from two consecutive snapshots
//!
//! Counters such as transferred air volume only become meaningful as a rate.
//! A rate needs two captures, so every value here is `None` ("unknown") until
//! the coordinator holds a previous snapshot.

use crate::error::{CoordinatorError, Result};
use crate::snapshot::Snapshot;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-second rate of change of `key` between two snapshots
///
/// Returns `None` when there is no previous snapshot, when the key is not
/// numeric in both, when no time has elapsed (or the clock went backwards),
/// when either counter is not a finite number, and when the counter
/// decreased. A decrease means the device reset its
/// counter; it is reported as unknown rather than as a negative rate.
pub fn rate(previous: Option<&Snapshot>, current: &Snapshot, key: &str) -> Option<f64> {
    let previous = previous?;
    let elapsed = (current.captured_at() - previous.captured_at())
        .to_std()
        .ok()?
        .as_secs_f64();
    if elapsed <= 0.0 {
        return None;
    }

    let delta = current.metric_f64(key)? - previous.metric_f64(key)?;
    if !delta.is_finite() || delta < 0.0 {
        return None;
    }

    let per_second = delta / elapsed;
    per_second.is_finite().then_some(per_second)
}

/// Description of one rate metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateMetric {
    /// Name the derived value is published under
    pub name: String,
    /// Counter metric the rate is computed from
    pub source_key: String,
    /// Scale applied to the per-second rate (1024.0 turns bytes into KiB)
    pub divisor: f64,
    /// Decimal places kept after scaling
    pub precision: Option<u32>,
}

impl RateMetric {
    pub fn new(name: impl Into<String>, source_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_key: source_key.into(),
            divisor: 1.0,
            precision: None,
        }
    }

    pub fn with_divisor(mut self, divisor: f64) -> Self {
        self.divisor = divisor;
        self
    }

    pub fn with_precision(mut self, precision: u32) -> Self {
        self.precision = Some(precision);
        self
    }

    /// Scaled and rounded rate for this metric
    pub fn compute(&self, previous: Option<&Snapshot>, current: &Snapshot) -> Option<f64> {
        let value = rate(previous, current, &self.source_key)? / self.divisor;
        let value = match self.precision {
            Some(places) => {
                let factor = 10f64.powi(places as i32);
                (value * factor).round() / factor
            }
            None => value,
        };
        value.is_finite().then_some(value)
    }
}

/// Derived values keyed by metric name
pub type DerivedValues = BTreeMap<String, Option<f64>>;

/// A fixed set of rate metrics evaluated after every successful fetch
#[derive(Debug, Clone, Default)]
pub struct DerivedMetricEngine {
    metrics: Vec<RateMetric>,
}

impl DerivedMetricEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a metric; names must be unique
    pub fn with_metric(mut self, metric: RateMetric) -> Result<Self> {
        if metric.divisor == 0.0 {
            return Err(CoordinatorError::configuration(format!(
                "derived metric '{}' has a zero divisor",
                metric.name
            )));
        }
        if self.metrics.iter().any(|m| m.name == metric.name) {
            return Err(CoordinatorError::configuration(format!(
                "derived metric '{}' is defined twice",
                metric.name
            )));
        }
        self.metrics.push(metric);
        Ok(self)
    }

    /// Air flow rates computed from the unit's volume counters (m³/h)
    pub fn ventilation_defaults() -> Self {
        let metrics = vec![
            RateMetric::new("supply_air_flow", crate::client::METRIC_KEY_SUPPLY_AIR_VOLUME)
                .with_divisor(1.0 / 3600.0)
                .with_precision(1),
            RateMetric::new("extract_air_flow", crate::client::METRIC_KEY_EXTRACT_AIR_VOLUME)
                .with_divisor(1.0 / 3600.0)
                .with_precision(1),
        ];
        Self { metrics }
    }

    pub fn metrics(&self) -> &[RateMetric] {
        &self.metrics
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Evaluate every metric for a snapshot pair
    pub fn compute(&self, previous: Option<&Snapshot>, current: &Snapshot) -> DerivedValues {
        self.metrics
            .iter()
            .map(|m| (m.name.clone(), m.compute(previous, current)))
            .collect()
    }
}
