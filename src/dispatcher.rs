//! Named command dispatch
//!
//! Commands are registered once at start-up as a table of
//! `name -> (handler, parameter schema)`. A dispatch looks the name up,
//! validates the parameters against the schema, runs the handler and, when
//! the handler reports success, asks the coordinator for an immediate
//! refresh so the new device state becomes visible.
//!
//! Per call the dispatch moves through
//! `Received -> Validated -> Executing -> {Succeeded -> RefreshTriggered | Failed}`.

use crate::error::{CoordinatorError, ErrorContext, ErrorReporter, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Something that can refresh cached device state on demand
#[async_trait]
pub trait RefreshTrigger: Send + Sync {
    /// Refresh now and return the resulting generation
    async fn refresh_now(&self) -> Result<u64>;
}

/// Executes one command against the device
///
/// Handlers swallow transport and device errors: they log them and report
/// `false`.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn execute(&self, params: &CommandParams) -> bool;
}

/// Adapts an async closure into a [`CommandHandler`]
pub struct FnHandler<F>(F);

impl<F> FnHandler<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F, Fut> CommandHandler for FnHandler<F>
where
    F: Fn(CommandParams) -> Fut + Send + Sync,
    Fut: Future<Output = bool> + Send,
{
    async fn execute(&self, params: &CommandParams) -> bool {
        (self.0)(params.clone()).await
    }
}

/// Accepted shape of one parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamKind {
    /// Whole number within an inclusive range
    Integer { min: i64, max: i64 },
    /// One of a fixed set of strings (case-sensitive)
    OneOf(Vec<String>),
}

/// One named parameter of a command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    pub required: bool,
}

impl ParamSpec {
    /// Required integer in `min..=max`
    pub fn integer(name: impl Into<String>, min: i64, max: i64) -> Self {
        Self {
            name: name.into(),
            kind: ParamKind::Integer { min, max },
            required: true,
        }
    }

    /// Required string from a fixed set
    pub fn one_of(name: impl Into<String>, values: &[&str]) -> Self {
        Self {
            name: name.into(),
            kind: ParamKind::OneOf(values.iter().map(|v| v.to_string()).collect()),
            required: true,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    fn coerce(&self, value: &Value) -> Result<ParamValue> {
        match &self.kind {
            ParamKind::Integer { min, max } => {
                let number = match value {
                    Value::Number(n) => n.as_i64().or_else(|| {
                        n.as_f64()
                            .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                            .map(|f| f as i64)
                    }),
                    Value::String(s) => s.trim().parse::<i64>().ok(),
                    _ => None,
                }
                .ok_or_else(|| {
                    CoordinatorError::validation(format!(
                        "'{}' must be an integer, got {}",
                        self.name, value
                    ))
                })?;

                if number < *min || number > *max {
                    return Err(CoordinatorError::validation(format!(
                        "'{}' must be between {} and {}, got {}",
                        self.name, min, max, number
                    )));
                }
                Ok(ParamValue::Integer(number))
            }
            ParamKind::OneOf(choices) => match value {
                Value::String(s) if choices.iter().any(|c| c == s) => {
                    Ok(ParamValue::Choice(s.clone()))
                }
                _ => Err(CoordinatorError::validation(format!(
                    "'{}' must be one of [{}], got {}",
                    self.name,
                    choices.join(", "),
                    value
                ))),
            },
        }
    }
}

/// Parameter schema of one command
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamSchema {
    fields: Vec<ParamSpec>,
}

impl ParamSchema {
    /// Schema accepting no parameters
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with(mut self, spec: ParamSpec) -> Self {
        self.fields.push(spec);
        self
    }

    pub fn fields(&self) -> &[ParamSpec] {
        &self.fields
    }

    /// Check caller parameters and convert them into typed values
    ///
    /// `params` must be a JSON object, or null for "no parameters". Keys the
    /// schema does not declare are rejected.
    pub fn validate(&self, params: &Value) -> Result<CommandParams> {
        let empty = serde_json::Map::new();
        let object = match params {
            Value::Object(map) => map,
            Value::Null => &empty,
            other => {
                return Err(CoordinatorError::validation(format!(
                    "parameters must be an object, got {other}"
                )))
            }
        };

        if let Some(unknown) = object
            .keys()
            .find(|key| !self.fields.iter().any(|f| &f.name == *key))
        {
            return Err(CoordinatorError::validation(format!(
                "unexpected parameter '{unknown}'"
            )));
        }

        let mut values = BTreeMap::new();
        for spec in &self.fields {
            match object.get(&spec.name) {
                Some(value) => {
                    values.insert(spec.name.clone(), spec.coerce(value)?);
                }
                None if spec.required => {
                    return Err(CoordinatorError::validation(format!(
                        "missing required parameter '{}'",
                        spec.name
                    )));
                }
                None => {}
            }
        }

        Ok(CommandParams(values))
    }
}

/// A validated parameter value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamValue {
    Integer(i64),
    Choice(String),
}

/// Parameters that passed schema validation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandParams(BTreeMap<String, ParamValue>);

impl CommandParams {
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        match self.0.get(name)? {
            ParamValue::Integer(v) => Some(*v),
            ParamValue::Choice(_) => None,
        }
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.0.get(name)? {
            ParamValue::Choice(s) => Some(s),
            ParamValue::Integer(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Progress of a single dispatch call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchState {
    Received,
    Validated,
    Executing,
    Succeeded,
    RefreshTriggered,
    Failed,
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DispatchState::Received => "received",
            DispatchState::Validated => "validated",
            DispatchState::Executing => "executing",
            DispatchState::Succeeded => "succeeded",
            DispatchState::RefreshTriggered => "refresh_triggered",
            DispatchState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Result of a dispatch that got as far as running its handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub command: String,
    /// Terminal state: `RefreshTriggered` or `Failed`
    pub state: DispatchState,
    /// Generation reached by the follow-up refresh, if it succeeded
    pub generation: Option<u64>,
}

impl DispatchOutcome {
    /// Whether the device accepted the command
    pub fn succeeded(&self) -> bool {
        self.state == DispatchState::RefreshTriggered
    }
}

struct CommandDescriptor {
    handler: Arc<dyn CommandHandler>,
    schema: ParamSchema,
}

/// Routes named commands to their handlers
pub struct Dispatcher {
    commands: BTreeMap<String, CommandDescriptor>,
    refresher: Arc<dyn RefreshTrigger>,
}

impl Dispatcher {
    pub fn new(refresher: Arc<dyn RefreshTrigger>) -> Self {
        Self {
            commands: BTreeMap::new(),
            refresher,
        }
    }

    /// Associate a command name with its handler and schema
    ///
    /// Registering the same name twice is a configuration error.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        handler: Arc<dyn CommandHandler>,
        schema: ParamSchema,
    ) -> Result<()> {
        let name = name.into();
        if self.commands.contains_key(&name) {
            let error =
                CoordinatorError::configuration(format!("command '{name}' registered twice"));
            crate::log_structured_error!(error, "dispatcher", "register");
            return Err(error);
        }
        debug!(command = %name, "Registered command");
        self.commands
            .insert(name, CommandDescriptor { handler, schema });
        Ok(())
    }

    /// Register an async closure as a handler
    pub fn register_fn<F, Fut>(
        &mut self,
        name: impl Into<String>,
        schema: ParamSchema,
        handler: F,
    ) -> Result<()>
    where
        F: Fn(CommandParams) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.register(name, Arc::new(FnHandler::new(handler)), schema)
    }

    /// Registered command names, sorted
    pub fn command_names(&self) -> Vec<&str> {
        self.commands.keys().map(String::as_str).collect()
    }

    pub fn schema(&self, name: &str) -> Option<&ParamSchema> {
        self.commands.get(name).map(|c| &c.schema)
    }

    /// Validate and run a command
    ///
    /// Unknown names and invalid parameters are returned as errors before any
    /// device call. A handler that reports failure yields an outcome in the
    /// `Failed` state and no refresh.
    pub async fn dispatch(&self, name: &str, params: &Value) -> Result<DispatchOutcome> {
        debug!(command = name, state = %DispatchState::Received, "Dispatching command");

        let descriptor = match self.commands.get(name) {
            Some(descriptor) => descriptor,
            None => return Err(self.reject(name, CoordinatorError::unknown_command(name))),
        };

        let params = descriptor
            .schema
            .validate(params)
            .map_err(|e| self.reject(name, e))?;
        debug!(command = name, state = %DispatchState::Validated, ?params);

        debug!(command = name, state = %DispatchState::Executing);
        if !descriptor.handler.execute(&params).await {
            debug!(command = name, state = %DispatchState::Failed);
            return Ok(DispatchOutcome {
                command: name.to_string(),
                state: DispatchState::Failed,
                generation: None,
            });
        }
        debug!(command = name, state = %DispatchState::Succeeded);

        // The command changed device state; make it observable right away.
        let generation = match self.refresher.refresh_now().await {
            Ok(generation) => Some(generation),
            Err(e) => {
                warn!(command = name, "Refresh after command failed: {}", e);
                None
            }
        };
        debug!(command = name, state = %DispatchState::RefreshTriggered, ?generation);

        Ok(DispatchOutcome {
            command: name.to_string(),
            state: DispatchState::RefreshTriggered,
            generation,
        })
    }

    fn reject(&self, name: &str, error: CoordinatorError) -> CoordinatorError {
        ErrorReporter::log_error(
            &error,
            Some(
                ErrorContext::new(error.to_error_code(), "dispatcher", "dispatch")
                    .with_metadata("command", name),
            ),
        );
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    mock! {
        pub Refresher {}

        #[async_trait]
        impl RefreshTrigger for Refresher {
            async fn refresh_now(&self) -> Result<u64>;
        }
    }

    fn fan_speed_schema() -> ParamSchema {
        ParamSchema::empty().with(ParamSpec::integer("fan_speed", 0, 100))
    }

    fn dispatcher_with(refresher: MockRefresher, succeed: bool) -> (Dispatcher, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut dispatcher = Dispatcher::new(Arc::new(refresher));
        let counter = calls.clone();
        dispatcher
            .register_fn("set_speed", fan_speed_schema(), move |_params| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    succeed
                }
            })
            .unwrap();
        (dispatcher, calls)
    }

    #[tokio::test]
    async fn test_success_triggers_one_refresh() {
        let mut refresher = MockRefresher::new();
        refresher.expect_refresh_now().times(1).returning(|| Ok(7));
        let (dispatcher, calls) = dispatcher_with(refresher, true);

        let outcome = dispatcher
            .dispatch("set_speed", &json!({"fan_speed": 50}))
            .await
            .unwrap();

        assert_eq!(outcome.state, DispatchState::RefreshTriggered);
        assert_eq!(outcome.generation, Some(7));
        assert!(outcome.succeeded());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_handler_failure_skips_refresh() {
        let mut refresher = MockRefresher::new();
        refresher.expect_refresh_now().times(0);
        let (dispatcher, calls) = dispatcher_with(refresher, false);

        let outcome = dispatcher
            .dispatch("set_speed", &json!({"fan_speed": 50}))
            .await
            .unwrap();

        assert_eq!(outcome.state, DispatchState::Failed);
        assert!(!outcome.succeeded());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refresh_error_does_not_fail_command() {
        let mut refresher = MockRefresher::new();
        refresher
            .expect_refresh_now()
            .times(1)
            .returning(|| Err(CoordinatorError::transport("unreachable")));
        let (dispatcher, _) = dispatcher_with(refresher, true);

        let outcome = dispatcher
            .dispatch("set_speed", &json!({"fan_speed": 10}))
            .await
            .unwrap();

        assert_eq!(outcome.state, DispatchState::RefreshTriggered);
        assert_eq!(outcome.generation, None);
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let mut refresher = MockRefresher::new();
        refresher.expect_refresh_now().times(0);
        let (dispatcher, calls) = dispatcher_with(refresher, true);

        let err = dispatcher.dispatch("nonexistent", &json!({})).await.unwrap_err();

        assert_eq!(err, CoordinatorError::unknown_command("nonexistent"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[rstest]
    #[case::above_range(json!({"fan_speed": 150}))]
    #[case::below_range(json!({"fan_speed": -1}))]
    #[case::fractional(json!({"fan_speed": 50.5}))]
    #[case::not_a_number(json!({"fan_speed": "fast"}))]
    #[case::missing(json!({}))]
    #[case::unexpected_key(json!({"fan_speed": 50, "extra": 1}))]
    #[case::not_an_object(json!([50]))]
    #[tokio::test]
    async fn test_schema_rejection(#[case] params: Value) {
        let mut refresher = MockRefresher::new();
        refresher.expect_refresh_now().times(0);
        let (dispatcher, calls) = dispatcher_with(refresher, true);

        let err = dispatcher.dispatch("set_speed", &params).await.unwrap_err();

        assert!(matches!(err, CoordinatorError::Validation(_)), "{err:?}");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[rstest]
    #[case(json!(0), 0)]
    #[case(json!(100), 100)]
    #[case(json!(40.0), 40)]
    #[case(json!("65"), 65)]
    fn test_integer_coercion(#[case] raw: Value, #[case] expected: i64) {
        let params = fan_speed_schema()
            .validate(&json!({ "fan_speed": raw }))
            .unwrap();
        assert_eq!(params.get_i64("fan_speed"), Some(expected));
    }

    #[test]
    fn test_one_of_is_case_sensitive() {
        let schema = ParamSchema::empty().with(ParamSpec::one_of("profile", &["Home", "Away"]));
        assert_eq!(
            schema
                .validate(&json!({"profile": "Away"}))
                .unwrap()
                .get_str("profile"),
            Some("Away")
        );
        assert!(schema.validate(&json!({"profile": "away"})).is_err());
    }

    #[test]
    fn test_optional_parameter_and_null_params() {
        let schema = ParamSchema::empty().with(ParamSpec::integer("level", 1, 3).optional());
        assert!(schema.validate(&Value::Null).unwrap().is_empty());
        assert!(schema.validate(&json!({})).unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_registration_is_fatal() {
        let (mut dispatcher, _) = dispatcher_with(MockRefresher::new(), true);
        let err = dispatcher
            .register_fn("set_speed", ParamSchema::empty(), |_| async { true })
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::Configuration(_)));
        assert_eq!(dispatcher.command_names(), vec!["set_speed"]);
    }
}
