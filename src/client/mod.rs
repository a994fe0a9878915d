//! Device client abstraction
//!
//! The coordinator never speaks a wire protocol itself. Everything it needs
//! from a ventilation unit goes through the [`DeviceClient`] trait, which a
//! transport crate (HTTP, WebSocket, serial) implements.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Metric key holding the Home profile fan speed setting (percent)
pub const METRIC_KEY_PROFILE_FAN_SPEED_HOME: &str = "A_CYC_HOME_SPEED_SETTING";
/// Metric key holding the Away profile fan speed setting (percent)
pub const METRIC_KEY_PROFILE_FAN_SPEED_AWAY: &str = "A_CYC_AWAY_SPEED_SETTING";
/// Metric key holding the Boost profile fan speed setting (percent)
pub const METRIC_KEY_PROFILE_FAN_SPEED_BOOST: &str = "A_CYC_BOOST_SPEED_SETTING";

/// Metric key of the current fan speed (percent)
pub const METRIC_KEY_FAN_SPEED: &str = "A_CYC_FAN_SPEED";
/// Metric key of the extract air temperature (°C)
pub const METRIC_KEY_TEMP_EXTRACT_AIR: &str = "A_CYC_TEMP_EXTRACT_AIR";
/// Metric key of the exhaust air temperature (°C)
pub const METRIC_KEY_TEMP_EXHAUST_AIR: &str = "A_CYC_TEMP_EXHAUST_AIR";
/// Metric key of the outdoor air temperature (°C)
pub const METRIC_KEY_TEMP_OUTDOOR_AIR: &str = "A_CYC_TEMP_OUTDOOR_AIR";
/// Metric key of the supply air temperature (°C)
pub const METRIC_KEY_TEMP_SUPPLY_AIR: &str = "A_CYC_TEMP_SUPPLY_AIR";
/// Metric key of the relative humidity (%)
pub const METRIC_KEY_RH_VALUE: &str = "A_CYC_RH_VALUE";
/// Metric key of the CO2 concentration (ppm)
pub const METRIC_KEY_CO2_VALUE: &str = "A_CYC_CO2_VALUE";
/// Metric key of the remaining filter lifetime (days)
pub const METRIC_KEY_REMAINING_TIME_FOR_FILTER: &str = "A_CYC_REMAINING_TIME_FOR_FILTER";
/// Metric key of the heat exchanger cell state
pub const METRIC_KEY_CELL_STATE: &str = "A_CYC_CELL_STATE";
/// Metric key of the accumulated supply air volume counter (m³)
pub const METRIC_KEY_SUPPLY_AIR_VOLUME: &str = "A_CYC_TOTAL_SUPPLY_AIR_VOLUME";
/// Metric key of the accumulated extract air volume counter (m³)
pub const METRIC_KEY_EXTRACT_AIR_VOLUME: &str = "A_CYC_TOTAL_EXTRACT_AIR_VOLUME";

/// Prefix of the eight 16-bit words that make up the unit's UUID
pub const METRIC_KEY_UUID_PREFIX: &str = "A_CYC_UUID";

/// Default fan speed for the Home profile
pub const DEFAULT_FAN_SPEED_HOME: i64 = 50;
/// Default fan speed for the Away profile
pub const DEFAULT_FAN_SPEED_AWAY: i64 = 25;
/// Default fan speed for the Boost profile
pub const DEFAULT_FAN_SPEED_BOOST: i64 = 65;

/// Raw metric values keyed by metric name
pub type MetricMap = BTreeMap<String, MetricValue>;

/// A single scalar metric value reported by the device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl MetricValue {
    /// Convert a JSON value, dropping anything that is not a scalar
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(MetricValue::Int)
                .or_else(|| n.as_f64().map(MetricValue::Float)),
            serde_json::Value::String(s) => Some(MetricValue::Text(s.clone())),
            _ => None,
        }
    }

    /// Numeric view of the value; numeric text is parsed
    ///
    /// NaN and infinities are not numbers a device can report.
    pub fn as_f64(&self) -> Option<f64> {
        let value = match self {
            MetricValue::Int(v) => *v as f64,
            MetricValue::Float(v) => *v,
            MetricValue::Text(s) => s.trim().parse().ok()?,
        };
        value.is_finite().then_some(value)
    }

    /// Integer view of the value
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MetricValue::Int(v) => Some(*v),
            MetricValue::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            MetricValue::Float(_) => None,
            MetricValue::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Int(v) => write!(f, "{v}"),
            MetricValue::Float(v) => write!(f, "{v}"),
            MetricValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for MetricValue {
    fn from(value: i64) -> Self {
        MetricValue::Int(value)
    }
}

impl From<f64> for MetricValue {
    fn from(value: f64) -> Self {
        MetricValue::Float(value)
    }
}

impl From<&str> for MetricValue {
    fn from(value: &str) -> Self {
        MetricValue::Text(value.to_string())
    }
}

/// Ventilation profile reported by or requested from the unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Profile {
    None,
    Home,
    Away,
    Boost,
    Fireplace,
    Extra,
}

impl Profile {
    /// Profiles a caller may switch the unit into
    pub const SETTABLE: [Profile; 4] = [
        Profile::Home,
        Profile::Away,
        Profile::Boost,
        Profile::Fireplace,
    ];

    /// Display names of the settable profiles
    pub const SETTABLE_NAMES: [&'static str; 4] = ["Home", "Away", "Boost", "Fireplace"];

    /// Display name of the profile
    pub fn as_str(&self) -> &'static str {
        match self {
            Profile::None => "None",
            Profile::Home => "Home",
            Profile::Away => "Away",
            Profile::Boost => "Boost",
            Profile::Fireplace => "Fireplace",
            Profile::Extra => "Extra",
        }
    }

    /// Whether the profile can be requested through `set_profile`
    pub fn is_settable(&self) -> bool {
        Self::SETTABLE.contains(self)
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Profile {
    type Err = crate::error::CoordinatorError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "None" => Ok(Profile::None),
            "Home" => Ok(Profile::Home),
            "Away" => Ok(Profile::Away),
            "Boost" => Ok(Profile::Boost),
            "Fireplace" => Ok(Profile::Fireplace),
            "Extra" => Ok(Profile::Extra),
            other => Err(crate::error::CoordinatorError::validation(format!(
                "unknown profile '{other}'"
            ))),
        }
    }
}

/// Trait for ventilation unit client implementations
///
/// Implementations report communication failures as
/// [`CoordinatorError::Transport`](crate::error::CoordinatorError::Transport)
/// and operations refused by the unit as
/// [`CoordinatorError::Device`](crate::error::CoordinatorError::Device).
#[async_trait]
pub trait DeviceClient: Send + Sync {
    /// Read every metric the unit exposes
    async fn fetch_metrics(&self) -> Result<MetricMap>;

    /// Read the currently active profile
    async fn get_profile(&self) -> Result<Profile>;

    /// Write one or more named parameters
    async fn set_values(&self, values: MetricMap) -> Result<()>;

    /// Switch the unit to another profile
    async fn set_profile(&self, profile: Profile) -> Result<()>;
}
