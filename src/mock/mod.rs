//! Mock implementations for testing
//!
//! [`MockDeviceClient`] records every call and can be scripted to fail.
//! [`SimulatedUnit`] behaves like a running ventilation unit and backs the
//! command-line demo.

use crate::client::{
    DeviceClient, MetricMap, MetricValue, Profile, DEFAULT_FAN_SPEED_AWAY,
    DEFAULT_FAN_SPEED_BOOST, DEFAULT_FAN_SPEED_HOME, METRIC_KEY_CELL_STATE, METRIC_KEY_CO2_VALUE,
    METRIC_KEY_EXTRACT_AIR_VOLUME, METRIC_KEY_FAN_SPEED, METRIC_KEY_PROFILE_FAN_SPEED_AWAY,
    METRIC_KEY_PROFILE_FAN_SPEED_BOOST, METRIC_KEY_PROFILE_FAN_SPEED_HOME,
    METRIC_KEY_REMAINING_TIME_FOR_FILTER, METRIC_KEY_RH_VALUE, METRIC_KEY_SUPPLY_AIR_VOLUME,
    METRIC_KEY_TEMP_EXHAUST_AIR, METRIC_KEY_TEMP_EXTRACT_AIR, METRIC_KEY_TEMP_OUTDOOR_AIR,
    METRIC_KEY_TEMP_SUPPLY_AIR, METRIC_KEY_UUID_PREFIX,
};
use crate::error::{CoordinatorError, Result};
use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use uuid::Uuid;

#[derive(Default)]
struct MockState {
    metrics: MetricMap,
    profile: Option<Profile>,
    fetch_error: Option<CoordinatorError>,
    write_error: Option<CoordinatorError>,
    fetches: usize,
    written: Vec<MetricMap>,
    profiles_set: Vec<Profile>,
}

/// Mock ventilation client for testing
///
/// Writes are recorded but do not change the metrics it reports.
#[derive(Default)]
pub struct MockDeviceClient {
    state: Mutex<MockState>,
}

impl MockDeviceClient {
    /// Create new mock client reporting no metrics and the Home profile
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                profile: Some(Profile::Home),
                ..MockState::default()
            }),
        }
    }

    /// Set the metrics returned by `fetch_metrics`
    pub fn with_metrics(self, metrics: MetricMap) -> Self {
        self.set_metrics(metrics);
        self
    }

    pub fn set_metrics(&self, metrics: MetricMap) {
        self.lock().metrics = metrics;
    }

    pub fn set_metric(&self, key: &str, value: impl Into<MetricValue>) {
        self.lock().metrics.insert(key.to_string(), value.into());
    }

    pub fn set_active_profile(&self, profile: Profile) {
        self.lock().profile = Some(profile);
    }

    /// Make every read fail with `error` until [`recover`](Self::recover)
    pub fn fail_fetches(&self, error: CoordinatorError) {
        self.lock().fetch_error = Some(error);
    }

    /// Make every write fail with `error` until [`recover`](Self::recover)
    pub fn fail_writes(&self, error: CoordinatorError) {
        self.lock().write_error = Some(error);
    }

    pub fn recover(&self) {
        let mut state = self.lock();
        state.fetch_error = None;
        state.write_error = None;
    }

    /// Number of `fetch_metrics` calls so far
    pub fn fetch_count(&self) -> usize {
        self.lock().fetches
    }

    /// Every successful `set_values` call, in order
    pub fn written_values(&self) -> Vec<MetricMap> {
        self.lock().written.clone()
    }

    /// Every successful `set_profile` call, in order
    pub fn profiles_set(&self) -> Vec<Profile> {
        self.lock().profiles_set.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl DeviceClient for MockDeviceClient {
    async fn fetch_metrics(&self) -> Result<MetricMap> {
        let mut state = self.lock();
        state.fetches += 1;
        match &state.fetch_error {
            Some(error) => Err(error.clone()),
            None => Ok(state.metrics.clone()),
        }
    }

    async fn get_profile(&self) -> Result<Profile> {
        let state = self.lock();
        if let Some(error) = &state.fetch_error {
            return Err(error.clone());
        }
        state
            .profile
            .ok_or_else(|| CoordinatorError::device("No profile available in mock"))
    }

    async fn set_values(&self, values: MetricMap) -> Result<()> {
        let mut state = self.lock();
        if let Some(error) = &state.write_error {
            return Err(error.clone());
        }
        state.written.push(values);
        Ok(())
    }

    async fn set_profile(&self, profile: Profile) -> Result<()> {
        let mut state = self.lock();
        if let Some(error) = &state.write_error {
            return Err(error.clone());
        }
        state.profiles_set.push(profile);
        Ok(())
    }
}

struct UnitState {
    profile: Profile,
    settings: MetricMap,
    supply_volume: f64,
    extract_volume: f64,
    last_tick: Instant,
}

/// An in-memory ventilation unit
///
/// Air volume counters advance with wall-clock time at a rate set by the
/// fan speed of the active profile, so derived flow metrics have something
/// to show.
pub struct SimulatedUnit {
    id: Uuid,
    state: Mutex<UnitState>,
}

impl SimulatedUnit {
    /// Nominal air flow at 100% fan speed (m³/h)
    const MAX_FLOW: f64 = 300.0;

    pub fn new() -> Self {
        let settings = MetricMap::from([
            (
                METRIC_KEY_PROFILE_FAN_SPEED_HOME.to_string(),
                MetricValue::Int(DEFAULT_FAN_SPEED_HOME),
            ),
            (
                METRIC_KEY_PROFILE_FAN_SPEED_AWAY.to_string(),
                MetricValue::Int(DEFAULT_FAN_SPEED_AWAY),
            ),
            (
                METRIC_KEY_PROFILE_FAN_SPEED_BOOST.to_string(),
                MetricValue::Int(DEFAULT_FAN_SPEED_BOOST),
            ),
        ]);

        Self {
            id: Uuid::new_v4(),
            state: Mutex::new(UnitState {
                profile: Profile::Home,
                settings,
                supply_volume: 0.0,
                extract_volume: 0.0,
                last_tick: Instant::now(),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    fn lock(&self) -> MutexGuard<'_, UnitState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fan_speed(state: &UnitState) -> i64 {
        let key = match state.profile {
            Profile::Away => METRIC_KEY_PROFILE_FAN_SPEED_AWAY,
            Profile::Boost | Profile::Fireplace => METRIC_KEY_PROFILE_FAN_SPEED_BOOST,
            _ => METRIC_KEY_PROFILE_FAN_SPEED_HOME,
        };
        state
            .settings
            .get(key)
            .and_then(MetricValue::as_i64)
            .unwrap_or(DEFAULT_FAN_SPEED_HOME)
    }

    fn advance(state: &mut UnitState) {
        let now = Instant::now();
        let hours = now.duration_since(state.last_tick).as_secs_f64() / 3600.0;
        let flow = Self::MAX_FLOW * Self::fan_speed(state) as f64 / 100.0;
        state.supply_volume += flow * hours;
        // Fireplace mode deliberately underpressures the room
        let extract_factor = if state.profile == Profile::Fireplace { 0.7 } else { 1.0 };
        state.extract_volume += flow * extract_factor * hours;
        state.last_tick = now;
    }
}

impl Default for SimulatedUnit {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceClient for SimulatedUnit {
    async fn fetch_metrics(&self) -> Result<MetricMap> {
        let mut state = self.lock();
        Self::advance(&mut state);

        let mut metrics = state.settings.clone();
        let fan_speed = Self::fan_speed(&state);
        metrics.extend([
            (METRIC_KEY_FAN_SPEED.to_string(), MetricValue::Int(fan_speed)),
            (METRIC_KEY_TEMP_EXTRACT_AIR.to_string(), MetricValue::Float(21.4)),
            (METRIC_KEY_TEMP_EXHAUST_AIR.to_string(), MetricValue::Float(8.2)),
            (METRIC_KEY_TEMP_OUTDOOR_AIR.to_string(), MetricValue::Float(5.1)),
            (METRIC_KEY_TEMP_SUPPLY_AIR.to_string(), MetricValue::Float(18.9)),
            (METRIC_KEY_RH_VALUE.to_string(), MetricValue::Int(42)),
            (METRIC_KEY_CO2_VALUE.to_string(), MetricValue::Int(650)),
            (METRIC_KEY_REMAINING_TIME_FOR_FILTER.to_string(), MetricValue::Int(180)),
            (METRIC_KEY_CELL_STATE.to_string(), MetricValue::Int(0)),
            (
                METRIC_KEY_SUPPLY_AIR_VOLUME.to_string(),
                MetricValue::Int(state.supply_volume as i64),
            ),
            (
                METRIC_KEY_EXTRACT_AIR_VOLUME.to_string(),
                MetricValue::Int(state.extract_volume as i64),
            ),
        ]);

        let bytes = self.id.as_bytes();
        for (i, word) in bytes.chunks(2).enumerate() {
            let word = u16::from_be_bytes([word[0], word[1]]);
            metrics.insert(
                format!("{METRIC_KEY_UUID_PREFIX}{i}"),
                MetricValue::Int(i64::from(word)),
            );
        }

        Ok(metrics)
    }

    async fn get_profile(&self) -> Result<Profile> {
        Ok(self.lock().profile)
    }

    async fn set_values(&self, values: MetricMap) -> Result<()> {
        let mut state = self.lock();
        Self::advance(&mut state);
        for (key, value) in values {
            if !state.settings.contains_key(&key) {
                return Err(CoordinatorError::device(format!(
                    "parameter '{key}' is not writable"
                )));
            }
            state.settings.insert(key, value);
        }
        Ok(())
    }

    async fn set_profile(&self, profile: Profile) -> Result<()> {
        if !profile.is_settable() {
            return Err(CoordinatorError::device(format!(
                "profile {profile} cannot be selected"
            )));
        }
        let mut state = self.lock();
        Self::advance(&mut state);
        state.profile = profile;
        Ok(())
    }
}
