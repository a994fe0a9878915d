//! Polling state coordinator for home ventilation units
//!
//! This crate keeps a cached, periodically refreshed view of a ventilation
//! unit's state and routes named commands to it.
//!
//! # Features
//!
//! - Fixed-interval polling with on-demand refresh and fetch coalescing
//! - Last-good snapshot retention when the unit stops answering
//! - Rate metrics derived from consecutive snapshots (air flow from volume
//!   counters)
//! - Schema-validated command dispatch with an automatic refresh after every
//!   successful command
//! - Explicitly owned per-device contexts instead of global state

// Core modules
pub mod client;
pub mod config;
pub mod coordinator;
pub mod derived;
pub mod device;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod sensors;
pub mod services;
pub mod snapshot;

// Test support; also drives the command-line simulator
pub mod mock;

// Re-export main types for convenience
pub use client::{DeviceClient, MetricMap, MetricValue, Profile};
pub use config::ServerConfig;
pub use coordinator::{Coordinator, CoordinatorConfig, CoordinatorUpdate, Health};
pub use derived::{DerivedMetricEngine, RateMetric};
pub use device::{DeviceInstance, DeviceRegistry};
pub use dispatcher::{DispatchOutcome, DispatchState, Dispatcher, ParamSchema, ParamSpec};
pub use error::{CoordinatorError, Result};
pub use snapshot::Snapshot;
