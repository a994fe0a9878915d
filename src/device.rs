//! Per-device context
//!
//! A [`DeviceInstance`] bundles everything that belongs to one configured
//! unit: its client, coordinator, command dispatcher and sensors. Instances
//! live in a [`DeviceRegistry`] owned by the caller; nothing is global.

use crate::client::DeviceClient;
use crate::config::DeviceConfig;
use crate::coordinator::{ClientFetcher, Coordinator, CoordinatorConfig};
use crate::derived::DerivedMetricEngine;
use crate::dispatcher::{DispatchOutcome, Dispatcher};
use crate::error::{CoordinatorError, Result};
use crate::sensors::{ventilation_sensors, SensorDescription, SensorReading};
use crate::services::register_default_commands;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// One configured ventilation unit
pub struct DeviceInstance {
    entry_id: String,
    config: DeviceConfig,
    client: Arc<dyn DeviceClient>,
    coordinator: Coordinator,
    dispatcher: Dispatcher,
    sensors: Vec<SensorDescription>,
}

impl DeviceInstance {
    /// Build the instance and perform the first fetch
    ///
    /// Fails, and leaves nothing running, if the unit cannot be read.
    pub async fn setup(
        entry_id: impl Into<String>,
        config: DeviceConfig,
        coordinator_config: CoordinatorConfig,
        client: Arc<dyn DeviceClient>,
    ) -> Result<Self> {
        let entry_id = entry_id.into();
        let address = config.address()?;

        let coordinator = Coordinator::with_derived_metrics(
            config.name.clone(),
            Arc::new(ClientFetcher::new(Arc::clone(&client))),
            coordinator_config,
            DerivedMetricEngine::ventilation_defaults(),
        );

        let mut dispatcher = Dispatcher::new(Arc::new(coordinator.clone()));
        register_default_commands(&mut dispatcher, Arc::clone(&client))?;

        if let Err(e) = coordinator.start().await {
            warn!(entry_id = %entry_id, %address, "Ventilation unit not ready: {}", e);
            coordinator.shutdown().await;
            return Err(e);
        }

        info!(entry_id = %entry_id, name = %config.name, %address, "Ventilation unit set up");

        Ok(Self {
            entry_id,
            config,
            client,
            coordinator,
            dispatcher,
            sensors: ventilation_sensors(),
        })
    }

    pub fn entry_id(&self) -> &str {
        &self.entry_id
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn client(&self) -> &Arc<dyn DeviceClient> {
        &self.client
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn sensors(&self) -> &[SensorDescription] {
        &self.sensors
    }

    /// Read every sensor from the cache
    pub fn sensor_readings(&self) -> Vec<(&'static str, SensorReading)> {
        self.sensors
            .iter()
            .map(|s| (s.key, s.read(&self.coordinator)))
            .collect()
    }

    /// UUID reported by the unit in its latest snapshot
    pub fn device_uuid(&self) -> Option<Uuid> {
        self.coordinator.get_snapshot()?.device_uuid()
    }

    pub async fn dispatch(&self, command: &str, params: &Value) -> Result<DispatchOutcome> {
        self.dispatcher.dispatch(command, params).await
    }

    /// Stop polling for this unit
    pub async fn unload(&self) {
        info!(entry_id = %self.entry_id, "Unloading ventilation unit");
        self.coordinator.shutdown().await;
    }
}

/// Devices keyed by entry id
#[derive(Default)]
pub struct DeviceRegistry {
    devices: HashMap<String, Arc<DeviceInstance>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a set-up device; an entry id may only be used once
    ///
    /// A rejected device is dropped, which stops its polling.
    pub fn add(&mut self, device: DeviceInstance) -> Result<Arc<DeviceInstance>> {
        if self.devices.contains_key(device.entry_id()) {
            return Err(CoordinatorError::configuration(format!(
                "device entry '{}' already registered",
                device.entry_id()
            )));
        }
        let device = Arc::new(device);
        self.devices
            .insert(device.entry_id().to_string(), Arc::clone(&device));
        Ok(device)
    }

    /// Whether an entry id is taken; check before setting a device up
    pub fn contains(&self, entry_id: &str) -> bool {
        self.devices.contains_key(entry_id)
    }

    pub fn get(&self, entry_id: &str) -> Option<Arc<DeviceInstance>> {
        self.devices.get(entry_id).cloned()
    }

    /// Remove and unload a device; returns false if it was unknown
    pub async fn remove(&mut self, entry_id: &str) -> bool {
        match self.devices.remove(entry_id) {
            Some(device) => {
                device.unload().await;
                true
            }
            None => false,
        }
    }

    /// Run a command on one device
    pub async fn dispatch(
        &self,
        entry_id: &str,
        command: &str,
        params: &Value,
    ) -> Result<DispatchOutcome> {
        let device = self.get(entry_id).ok_or_else(|| {
            CoordinatorError::validation(format!("unknown device entry '{entry_id}'"))
        })?;
        device.dispatch(command, params).await
    }

    pub fn entry_ids(&self) -> Vec<&str> {
        self.devices.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Unload every device
    pub async fn unload_all(&mut self) {
        for (_, device) in self.devices.drain() {
            device.unload().await;
        }
    }
}
