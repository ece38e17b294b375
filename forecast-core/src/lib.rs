//! Core library for the `forecast` tool.
//!
//! This crate defines:
//! - The forecast controller: query lifecycle, cancellation of superseded fetches
//! - Remote collaborators (geocoding, daily forecast) and their Open-Meteo client
//! - Shared domain models and display helpers
//! - Configuration and persistence of the last searched location
//!
//! It is used by `forecast-cli`, but any presentation layer can drive a
//! [`ForecastController`] and read its [`SessionState`].

pub mod config;
pub mod controller;
pub mod display;
pub mod error;
pub mod model;
pub mod provider;
pub mod storage;

pub use config::Config;
pub use controller::{ForecastController, Generation};
pub use error::ForecastError;
pub use model::{
    DailySeries, ForecastDay, ForecastResult, GeocodedPlace, MIN_QUERY_LEN, ResolvedPlace,
    SessionState,
};
pub use provider::{ForecastService, GeocodingService, OpenMeteoClient};
pub use storage::{FileQueryStore, MemoryQueryStore, QueryStore};
