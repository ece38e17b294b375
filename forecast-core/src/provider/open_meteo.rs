use anyhow::Context;
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::{
    config::Config,
    error::ForecastError,
    model::{DailySeries, GeocodedPlace},
};

use super::{ForecastService, GeocodingService, truncate_body};

const DAILY_FIELDS: &str = "weathercode,temperature_2m_max,temperature_2m_min";

/// Open-Meteo geocoding and forecast APIs. No API key required.
#[derive(Debug, Clone)]
pub struct OpenMeteoClient {
    geocoding_url: String,
    forecast_url: String,
    http: Client,
}

impl OpenMeteoClient {
    pub fn new(geocoding_url: impl Into<String>, forecast_url: impl Into<String>) -> Self {
        Self::with_client(geocoding_url, forecast_url, Client::new())
    }

    pub fn with_client(
        geocoding_url: impl Into<String>,
        forecast_url: impl Into<String>,
        http: Client,
    ) -> Self {
        Self {
            geocoding_url: geocoding_url.into(),
            forecast_url: forecast_url.into(),
            http,
        }
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(config.timeout())
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self::with_client(
            config.geocoding_url.clone(),
            config.forecast_url.clone(),
            http,
        ))
    }

    async fn get_body(
        &self,
        what: &str,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<String, ForecastError> {
        let res = self
            .http
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| {
                ForecastError::transport(format!("Failed to send request to Open-Meteo ({what}): {e}"))
            })?;

        let status = res.status();
        let body = res.text().await.map_err(|e| {
            ForecastError::transport(format!("Failed to read Open-Meteo {what} response body: {e}"))
        })?;

        if !status.is_success() {
            return Err(ForecastError::transport(format!(
                "Open-Meteo {what} request failed with status {}: {}",
                status,
                truncate_body(&body),
            )));
        }

        Ok(body)
    }
}

#[derive(Debug, Deserialize)]
struct OmGeocodingResponse {
    // Absent when nothing matched.
    #[serde(default)]
    results: Option<Vec<OmPlace>>,
}

#[derive(Debug, Deserialize)]
struct OmPlace {
    name: String,
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    timezone: Option<String>,
    #[serde(default)]
    country_code: Option<String>,
}

impl From<OmPlace> for GeocodedPlace {
    fn from(p: OmPlace) -> Self {
        Self {
            name: p.name,
            latitude: p.latitude,
            longitude: p.longitude,
            timezone: p.timezone.unwrap_or_else(|| "auto".to_string()),
            country_code: p.country_code,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OmForecastResponse {
    daily: OmDaily,
}

#[derive(Debug, Deserialize)]
struct OmDaily {
    time: Vec<NaiveDate>,
    #[serde(alias = "weather_code")]
    weathercode: Vec<Option<u8>>,
    temperature_2m_max: Vec<Option<f64>>,
    temperature_2m_min: Vec<Option<f64>>,
}

#[async_trait]
impl GeocodingService for OpenMeteoClient {
    async fn search(&self, name: &str) -> Result<Vec<GeocodedPlace>, ForecastError> {
        debug!(query = name, "geocoding");

        let body = self
            .get_body("geocoding", &self.geocoding_url, &[("name", name.to_string())])
            .await?;

        let parsed: OmGeocodingResponse = serde_json::from_str(&body).map_err(|e| {
            ForecastError::transport(format!("Failed to parse Open-Meteo geocoding JSON: {e}"))
        })?;

        Ok(parsed
            .results
            .unwrap_or_default()
            .into_iter()
            .map(GeocodedPlace::from)
            .collect())
    }
}

#[async_trait]
impl ForecastService for OpenMeteoClient {
    async fn daily(
        &self,
        latitude: f64,
        longitude: f64,
        timezone: &str,
    ) -> Result<DailySeries, ForecastError> {
        debug!(latitude, longitude, timezone, "fetching daily forecast");

        let body = self
            .get_body(
                "forecast",
                &self.forecast_url,
                &[
                    ("latitude", latitude.to_string()),
                    ("longitude", longitude.to_string()),
                    ("timezone", timezone.to_string()),
                    ("daily", DAILY_FIELDS.to_string()),
                ],
            )
            .await?;

        let parsed: OmForecastResponse = serde_json::from_str(&body).map_err(|e| {
            ForecastError::transport(format!("Failed to parse Open-Meteo forecast JSON: {e}"))
        })?;

        Ok(DailySeries {
            time: parsed.daily.time,
            weather_code: parsed.daily.weathercode,
            temperature_min: parsed.daily.temperature_2m_min,
            temperature_max: parsed.daily.temperature_2m_max,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geocoding_without_results_parses_as_none() {
        let parsed: OmGeocodingResponse =
            serde_json::from_str(r#"{"generationtime_ms":0.5}"#).expect("valid json");
        assert!(parsed.results.is_none());
    }

    #[test]
    fn geocoding_place_without_timezone_falls_back_to_auto() {
        let parsed: OmGeocodingResponse = serde_json::from_str(
            r#"{"results":[{"name":"Kashan","latitude":33.98,"longitude":51.43}]}"#,
        )
        .expect("valid json");

        let place = GeocodedPlace::from(parsed.results.expect("results").remove(0));
        assert_eq!(place.timezone, "auto");
        assert_eq!(place.country_code, None);
    }

    #[test]
    fn daily_accepts_both_weather_code_spellings() {
        let old = r#"{"daily":{"time":["2024-05-01"],"weathercode":[3],"temperature_2m_max":[20.0],"temperature_2m_min":[9.0]}}"#;
        let new = r#"{"daily":{"time":["2024-05-01"],"weather_code":[3],"temperature_2m_max":[20.0],"temperature_2m_min":[9.0]}}"#;

        for body in [old, new] {
            let parsed: OmForecastResponse = serde_json::from_str(body).expect("valid json");
            assert_eq!(parsed.daily.weathercode, vec![Some(3)]);
            assert_eq!(
                parsed.daily.time,
                vec![NaiveDate::from_ymd_opt(2024, 5, 1).expect("valid date")]
            );
        }
    }

    #[test]
    fn daily_with_null_values_still_parses() {
        let body = r#"{"daily":{"time":["2024-05-01","2024-05-02"],"weathercode":[3,null],"temperature_2m_max":[20.0,null],"temperature_2m_min":[9.0,8.0]}}"#;

        let parsed: OmForecastResponse = serde_json::from_str(body).expect("valid json");
        assert_eq!(parsed.daily.weathercode, vec![Some(3), None]);
        assert_eq!(parsed.daily.temperature_2m_max, vec![Some(20.0), None]);
    }
}
