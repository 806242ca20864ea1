//! OpenWeatherMap One Call hourly forecast

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

use super::{get_json, records_to_table, WeatherProvider};
use crate::config::WeatherApiConfig;
use crate::domain::forecast::{Forecast, ForecastSource};
use crate::domain::weather::{CLOUDS, PRESSURE, TEMP_AIR, TEMP_DEW, WIND_SPEED};
use crate::error::{ForecastError, ForecastResult};

pub const DEFAULT_URL: &str = "https://api.openweathermap.org/data/2.5/onecall";

/// Source keys and their standard column names
const FIELDS: [(&str, &str); 5] = [
    ("temp", TEMP_AIR),
    ("wind_speed", WIND_SPEED),
    ("pressure", PRESSURE),
    ("dew_point", TEMP_DEW),
    ("clouds", CLOUDS),
];

#[derive(Debug, Deserialize)]
struct OneCallResponse {
    current: Current,
    hourly: Vec<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct Current {
    dt: i64,
}

fn timestamp(secs: i64) -> ForecastResult<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| ForecastError::parse(format!("invalid epoch {secs}")))
}

fn parse_response(response: OneCallResponse, drop_weather: bool) -> ForecastResult<Forecast> {
    let issue_time = timestamp(response.current.dt)?;
    let records = response
        .hourly
        .into_iter()
        .map(|hour| {
            let dt = hour
                .get("dt")
                .and_then(serde_json::Value::as_i64)
                .ok_or_else(|| ForecastError::parse("hourly entry without 'dt'"))?;
            Ok((timestamp(dt)?, hour))
        })
        .collect::<ForecastResult<Vec<_>>>()?;
    if records.is_empty() {
        return Err(ForecastError::parse("OpenWeatherMap returned no hourly data"));
    }

    let mut table = records_to_table(records, &FIELDS, &["dt"], !drop_weather)?;
    // hPa
    table.scale(PRESSURE, 100.0);

    let mut forecast = Forecast::new(ForecastSource::OpenWeatherMap, issue_time, table);
    forecast.csv_name = Some(forecast.csv_name_from_issue("owm"));
    Ok(forecast)
}

pub struct OpenWeatherClient {
    client: Client,
    url: String,
    api_key: String,
    latitude: f64,
    longitude: f64,
    drop_weather: bool,
}

impl OpenWeatherClient {
    pub fn new(client: Client, cfg: &WeatherApiConfig, latitude: f64, longitude: f64) -> Self {
        Self {
            client,
            url: cfg.base_url.clone().unwrap_or_else(|| DEFAULT_URL.to_string()),
            api_key: cfg.api_key.clone(),
            latitude,
            longitude,
            drop_weather: cfg.drop_weather.unwrap_or(true),
        }
    }
}

#[async_trait]
impl WeatherProvider for OpenWeatherClient {
    fn source(&self) -> ForecastSource {
        ForecastSource::OpenWeatherMap
    }

    async fn fetch_forecast(&self) -> ForecastResult<Forecast> {
        let url = format!(
            "{}?lat={}&lon={}&exclude=minutely,daily,alerts&appid={}",
            self.url, self.latitude, self.longitude, self.api_key
        );
        debug!(latitude = self.latitude, longitude = self.longitude, "Fetching OpenWeatherMap forecast");
        let response: OneCallResponse = get_json(&self.client, &url, None).await?;
        let forecast = parse_response(response, self.drop_weather)?;
        info!(
            issue_time = %forecast.issue_time_str(),
            hours = forecast.table.len(),
            "Fetched OpenWeatherMap forecast"
        );
        Ok(forecast)
    }
}
