use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ForecastError;

/// Queries shorter than this (in characters) never hit the network.
pub const MIN_QUERY_LEN: usize = 2;

pub fn is_searchable(query: &str) -> bool {
    query.chars().count() >= MIN_QUERY_LEN
}

/// A candidate returned by the geocoding service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocodedPlace {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub timezone: String,
    /// ISO 3166-1 alpha-2, e.g. "IR".
    pub country_code: Option<String>,
}

/// The place a forecast was fetched for, ready for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedPlace {
    pub latitude: f64,
    pub longitude: f64,
    pub timezone: String,
    /// "<name> <flag>", or just the name when there is no usable country code.
    pub display_label: String,
}

impl From<GeocodedPlace> for ResolvedPlace {
    fn from(place: GeocodedPlace) -> Self {
        let flag = place
            .country_code
            .as_deref()
            .map(flag_emoji)
            .unwrap_or_default();

        let display_label = if flag.is_empty() {
            place.name
        } else {
            format!("{} {}", place.name, flag)
        };

        Self {
            latitude: place.latitude,
            longitude: place.longitude,
            timezone: place.timezone,
            display_label,
        }
    }
}

/// Map a two-letter country code to its flag glyph.
///
/// Each letter becomes a regional-indicator symbol (U+1F1E6 + offset from 'A').
/// Anything other than exactly two ASCII letters yields an empty string.
pub fn flag_emoji(country_code: &str) -> String {
    let code = country_code.trim();
    if code.len() != 2 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return String::new();
    }

    code.chars()
        .filter_map(|c| {
            let offset = u32::from(c.to_ascii_uppercase()) - u32::from('A');
            char::from_u32(0x1F1E6 + offset)
        })
        .collect()
}

/// Parallel per-day arrays as returned by the forecast service. The service
/// reports `null` for values it has no data for.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DailySeries {
    pub time: Vec<NaiveDate>,
    pub weather_code: Vec<Option<u8>>,
    pub temperature_min: Vec<Option<f64>>,
    pub temperature_max: Vec<Option<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastDay {
    pub date: NaiveDate,
    pub weather_code: u8,
    pub min_temperature_c: f64,
    pub max_temperature_c: f64,
}

impl ForecastDay {
    /// Display range: `(floor(min), ceil(max))`.
    pub fn temperature_range(&self) -> (i64, i64) {
        (
            self.min_temperature_c.floor() as i64,
            self.max_temperature_c.ceil() as i64,
        )
    }
}

/// Days in ascending date order; index 0 is today.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForecastResult {
    days: Vec<ForecastDay>,
}

impl ForecastResult {
    pub fn new(mut days: Vec<ForecastDay>) -> Self {
        days.sort_by_key(|d| d.date);
        Self { days }
    }

    /// Zip the parallel arrays into days. Arrays of different length mean the
    /// body was malformed; days with a missing value are skipped.
    pub fn from_series(series: DailySeries) -> Result<Self, ForecastError> {
        let n = series.time.len();
        if series.weather_code.len() != n
            || series.temperature_min.len() != n
            || series.temperature_max.len() != n
        {
            return Err(ForecastError::transport(format!(
                "daily arrays differ in length (time={}, weathercode={}, min={}, max={})",
                n,
                series.weather_code.len(),
                series.temperature_min.len(),
                series.temperature_max.len(),
            )));
        }

        let days = series
            .time
            .into_iter()
            .zip(series.weather_code)
            .zip(series.temperature_min.into_iter().zip(series.temperature_max))
            .filter_map(|((date, weather_code), (min, max))| {
                match (weather_code, min, max) {
                    (Some(weather_code), Some(min), Some(max)) => Some(ForecastDay {
                        date,
                        weather_code,
                        min_temperature_c: min,
                        max_temperature_c: max,
                    }),
                    _ => {
                        debug!(%date, "skipping forecast day with missing values");
                        None
                    }
                }
            })
            .collect();

        Ok(Self::new(days))
    }

    pub fn days(&self) -> &[ForecastDay] {
        &self.days
    }

    pub fn today(&self) -> Option<&ForecastDay> {
        self.days.first()
    }

    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }
}

/// Everything the presentation layer reads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    pub query: String,
    pub resolved_place: Option<ResolvedPlace>,
    pub forecast: ForecastResult,
    pub is_loading: bool,
    /// Last reported failure; cleared on success and on short queries.
    pub last_error: Option<ForecastError>,
}

impl SessionState {
    pub fn seeded(query: String) -> Self {
        Self {
            query,
            ..Self::default()
        }
    }

    pub(crate) fn clear_results(&mut self) {
        self.resolved_place = None;
        self.forecast = ForecastResult::default();
    }
}
