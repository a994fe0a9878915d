//! Read-only sensor views over the coordinator cache
//!
//! Sensors never talk to the device. Each one is a description of where its
//! value lives in the latest [`Snapshot`](crate::snapshot::Snapshot) or in
//! the derived values, read on demand.

use crate::client::{
    MetricValue, METRIC_KEY_CELL_STATE, METRIC_KEY_CO2_VALUE, METRIC_KEY_FAN_SPEED,
    METRIC_KEY_REMAINING_TIME_FOR_FILTER, METRIC_KEY_RH_VALUE, METRIC_KEY_TEMP_EXHAUST_AIR,
    METRIC_KEY_TEMP_EXTRACT_AIR, METRIC_KEY_TEMP_OUTDOOR_AIR, METRIC_KEY_TEMP_SUPPLY_AIR,
};
use crate::coordinator::{Coordinator, Health};
use serde::Serialize;

/// Where a sensor takes its value from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SensorSource {
    /// Raw metric of the latest snapshot
    Metric(&'static str),
    /// Heat exchanger cell state, reported as a label
    CellState(&'static str),
    /// Derived metric computed by the coordinator
    Derived(&'static str),
    /// Active profile of the latest snapshot
    Profile,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorDescription {
    pub key: &'static str,
    pub name: &'static str,
    pub source: SensorSource,
    pub unit: Option<&'static str>,
}

impl SensorDescription {
    pub fn new(key: &'static str, name: &'static str, source: SensorSource) -> Self {
        Self {
            key,
            name,
            source,
            unit: None,
        }
    }

    pub fn with_unit(mut self, unit: &'static str) -> Self {
        self.unit = Some(unit);
        self
    }

    /// Current reading from the coordinator cache
    pub fn read(&self, coordinator: &Coordinator) -> SensorReading {
        let health = coordinator.health();
        let snapshot = coordinator.get_snapshot();

        let value = match self.source {
            SensorSource::Derived(name) => coordinator.derived(name).map(MetricValue::Float),
            SensorSource::Metric(key) => snapshot.as_ref().and_then(|s| s.metric(key).cloned()),
            SensorSource::CellState(key) => snapshot
                .as_ref()
                .and_then(|s| s.metric(key))
                .and_then(MetricValue::as_i64)
                .and_then(cell_state_label)
                .map(MetricValue::from),
            SensorSource::Profile => snapshot
                .as_ref()
                .and_then(|s| s.profile())
                .map(|p| MetricValue::from(p.as_str())),
        };

        SensorReading {
            value,
            available: snapshot.is_some(),
            stale: health == Health::Degraded,
        }
    }
}

/// A sensor value together with cache health
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorReading {
    /// `None` when the value is unknown
    pub value: Option<MetricValue>,
    /// False until the first successful fetch
    pub available: bool,
    /// The value comes from a cache the last fetch failed to refresh
    pub stale: bool,
}

fn cell_state_label(state: i64) -> Option<&'static str> {
    match state {
        0 => Some("Heat Recovery"),
        1 => Some("Cool Recovery"),
        2 => Some("Bypass"),
        3 => Some("Defrosting"),
        _ => None,
    }
}

/// Sensors every ventilation unit provides
pub fn ventilation_sensors() -> Vec<SensorDescription> {
    vec![
        SensorDescription::new("current_profile", "Current profile", SensorSource::Profile),
        SensorDescription::new(
            "fan_speed",
            "Fan speed",
            SensorSource::Metric(METRIC_KEY_FAN_SPEED),
        )
        .with_unit("%"),
        SensorDescription::new(
            "remaining_time_for_filter",
            "Remaining time for filter",
            SensorSource::Metric(METRIC_KEY_REMAINING_TIME_FOR_FILTER),
        )
        .with_unit("d"),
        SensorDescription::new(
            "cell_state",
            "Cell state",
            SensorSource::CellState(METRIC_KEY_CELL_STATE),
        ),
        SensorDescription::new(
            "extract_air",
            "Extract air",
            SensorSource::Metric(METRIC_KEY_TEMP_EXTRACT_AIR),
        )
        .with_unit("°C"),
        SensorDescription::new(
            "exhaust_air",
            "Exhaust air",
            SensorSource::Metric(METRIC_KEY_TEMP_EXHAUST_AIR),
        )
        .with_unit("°C"),
        SensorDescription::new(
            "outdoor_air",
            "Outdoor air",
            SensorSource::Metric(METRIC_KEY_TEMP_OUTDOOR_AIR),
        )
        .with_unit("°C"),
        SensorDescription::new(
            "supply_air",
            "Supply air",
            SensorSource::Metric(METRIC_KEY_TEMP_SUPPLY_AIR),
        )
        .with_unit("°C"),
        SensorDescription::new("humidity", "Humidity", SensorSource::Metric(METRIC_KEY_RH_VALUE))
            .with_unit("%"),
        SensorDescription::new("co2", "CO2", SensorSource::Metric(METRIC_KEY_CO2_VALUE))
            .with_unit("ppm"),
        SensorDescription::new(
            "supply_air_flow",
            "Supply air flow",
            SensorSource::Derived("supply_air_flow"),
        )
        .with_unit("m³/h"),
        SensorDescription::new(
            "extract_air_flow",
            "Extract air flow",
            SensorSource::Derived("extract_air_flow"),
        )
        .with_unit("m³/h"),
    ]
}
