use async_trait::async_trait;
use std::fmt::Debug;

use crate::{
    error::ForecastError,
    model::{DailySeries, GeocodedPlace},
};

pub mod open_meteo;

pub use open_meteo::OpenMeteoClient;

/// Resolves a free-text place name into candidate places, best match first.
#[async_trait]
pub trait GeocodingService: Send + Sync + Debug {
    async fn search(&self, name: &str) -> Result<Vec<GeocodedPlace>, ForecastError>;
}

/// Daily forecast for a fixed multi-day window starting today.
#[async_trait]
pub trait ForecastService: Send + Sync + Debug {
    async fn daily(
        &self,
        latitude: f64,
        longitude: f64,
        timezone: &str,
    ) -> Result<DailySeries, ForecastError>;
}

pub(crate) fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
