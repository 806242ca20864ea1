//! Periodic photovoltaic generation forecasting.
//!
//! Each run gathers weather or PV forecasts from the configured providers,
//! models the expected output of the PV installation and stores the result.

pub mod config;
pub mod domain;
pub mod error;
pub mod forecast;
pub mod lock;
pub mod manager;
pub mod pvmodel;
pub mod repo;
pub mod solar;
pub mod telemetry;

pub use error::{ForecastError, ForecastResult};
pub use manager::{ForecastManager, Outcome, RunSummary};
