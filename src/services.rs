//! Built-in ventilation commands
//!
//! Four commands are exposed to callers: switching the active profile and
//! changing the fan speed setting of the Home, Away and Boost profiles.
//! Handlers never fail loudly: a client error is logged and reported as
//! `false` so the dispatcher skips the follow-up refresh.

use crate::client::{
    DeviceClient, MetricMap, MetricValue, Profile, METRIC_KEY_PROFILE_FAN_SPEED_AWAY,
    METRIC_KEY_PROFILE_FAN_SPEED_BOOST, METRIC_KEY_PROFILE_FAN_SPEED_HOME,
};
use crate::dispatcher::{CommandHandler, CommandParams, Dispatcher, ParamSchema, ParamSpec};
use crate::error::{ErrorContext, ErrorReporter, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

pub const ATTR_PROFILE: &str = "profile";
pub const ATTR_PROFILE_FAN_SPEED: &str = "fan_speed";

const FAN_SPEED_MIN: i64 = 0;
const FAN_SPEED_MAX: i64 = 100;

/// The commands every ventilation device accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceCommand {
    SetProfile,
    SetProfileFanSpeedHome,
    SetProfileFanSpeedAway,
    SetProfileFanSpeedBoost,
}

impl ServiceCommand {
    pub const ALL: [ServiceCommand; 4] = [
        ServiceCommand::SetProfile,
        ServiceCommand::SetProfileFanSpeedHome,
        ServiceCommand::SetProfileFanSpeedAway,
        ServiceCommand::SetProfileFanSpeedBoost,
    ];

    /// Name the command is dispatched under
    pub fn name(&self) -> &'static str {
        match self {
            ServiceCommand::SetProfile => "set_profile",
            ServiceCommand::SetProfileFanSpeedHome => "set_profile_fan_speed_home",
            ServiceCommand::SetProfileFanSpeedAway => "set_profile_fan_speed_away",
            ServiceCommand::SetProfileFanSpeedBoost => "set_profile_fan_speed_boost",
        }
    }

    pub fn schema(&self) -> ParamSchema {
        match self {
            ServiceCommand::SetProfile => ParamSchema::empty()
                .with(ParamSpec::one_of(ATTR_PROFILE, &Profile::SETTABLE_NAMES)),
            _ => ParamSchema::empty().with(ParamSpec::integer(
                ATTR_PROFILE_FAN_SPEED,
                FAN_SPEED_MIN,
                FAN_SPEED_MAX,
            )),
        }
    }

    /// Device parameter written by the fan speed commands
    pub fn fan_speed_key(&self) -> Option<&'static str> {
        match self {
            ServiceCommand::SetProfile => None,
            ServiceCommand::SetProfileFanSpeedHome => Some(METRIC_KEY_PROFILE_FAN_SPEED_HOME),
            ServiceCommand::SetProfileFanSpeedAway => Some(METRIC_KEY_PROFILE_FAN_SPEED_AWAY),
            ServiceCommand::SetProfileFanSpeedBoost => Some(METRIC_KEY_PROFILE_FAN_SPEED_BOOST),
        }
    }
}

impl fmt::Display for ServiceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ServiceCommand {
    type Err = crate::error::CoordinatorError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| crate::error::CoordinatorError::unknown_command(s))
    }
}

/// Runs one [`ServiceCommand`] against a device client
pub struct ServiceHandler {
    command: ServiceCommand,
    client: Arc<dyn DeviceClient>,
}

impl ServiceHandler {
    pub fn new(command: ServiceCommand, client: Arc<dyn DeviceClient>) -> Self {
        Self { command, client }
    }

    async fn set_profile(&self, params: &CommandParams) -> bool {
        let Some(profile) = params
            .get_str(ATTR_PROFILE)
            .and_then(|p| p.parse::<Profile>().ok())
        else {
            warn!(command = %self.command, "Missing or unknown profile");
            return false;
        };

        warn!(
            "Setting the ventilation profile through '{}' is deprecated; \
             use the fan entity preset mode instead",
            self.command
        );
        info!(%profile, "Setting ventilation profile");

        match self.client.set_profile(profile).await {
            Ok(()) => true,
            Err(e) => {
                self.report(&e);
                false
            }
        }
    }

    async fn set_fan_speed(&self, key: &'static str, params: &CommandParams) -> bool {
        let Some(fan_speed) = params.get_i64(ATTR_PROFILE_FAN_SPEED) else {
            warn!(command = %self.command, "Missing fan speed");
            return false;
        };

        info!(setting = key, fan_speed, "Setting profile fan speed");
        let values = MetricMap::from([(key.to_string(), MetricValue::Int(fan_speed))]);

        match self.client.set_values(values).await {
            Ok(()) => true,
            Err(e) => {
                self.report(&e);
                false
            }
        }
    }

    fn report(&self, error: &crate::error::CoordinatorError) {
        ErrorReporter::log_error(
            error,
            Some(ErrorContext::new(
                error.to_error_code(),
                "services",
                self.command.name(),
            )),
        );
    }
}

#[async_trait]
impl CommandHandler for ServiceHandler {
    async fn execute(&self, params: &CommandParams) -> bool {
        match self.command.fan_speed_key() {
            Some(key) => self.set_fan_speed(key, params).await,
            None => self.set_profile(params).await,
        }
    }
}

/// Register every [`ServiceCommand`] on a dispatcher
pub fn register_default_commands(
    dispatcher: &mut Dispatcher,
    client: Arc<dyn DeviceClient>,
) -> Result<()> {
    for command in ServiceCommand::ALL {
        dispatcher.register(
            command.name(),
            Arc::new(ServiceHandler::new(command, client.clone())),
            command.schema(),
        )?;
    }
    Ok(())
}
