//! VisualCrossing timeline API, hourly forecast values only

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

use super::{get_json, records_to_table, WeatherProvider};
use crate::config::WeatherApiConfig;
use crate::domain::forecast::{Forecast, ForecastSource};
use crate::domain::weather::{
    CLOUDS, GHI, KELVIN_OFFSET, PRESSURE, TEMP_AIR, TEMP_DEW, WIND_SPEED,
};
use crate::error::{ForecastError, ForecastResult};

pub const DEFAULT_URL: &str =
    "https://weather.visualcrossing.com/VisualCrossingWebServices/rest/services/timeline";

const FIELDS: [(&str, &str); 6] = [
    ("temp", TEMP_AIR),
    ("dew", TEMP_DEW),
    ("windspeed", WIND_SPEED),
    ("pressure", PRESSURE),
    ("cloudcover", CLOUDS),
    ("solarradiation", GHI),
];

const SKIP: [&str; 3] = ["source", "datetime", "datetimeEpoch"];

#[derive(Debug, Deserialize)]
struct TimelineResponse {
    days: Vec<Day>,
}

#[derive(Debug, Deserialize)]
struct Day {
    #[serde(default)]
    hours: Vec<serde_json::Map<String, serde_json::Value>>,
}

/// Forecast hours only; observations of the current day are skipped.
///
/// Radiation is reported at the full hour, so the period end is set 30 min
/// later and the issue time 30 min before the first forecast hour.
fn parse_response(response: TimelineResponse, drop_weather: bool) -> ForecastResult<Forecast> {
    let half_hour = Duration::minutes(30);
    let mut issue_time: Option<DateTime<Utc>> = None;
    let mut records = Vec::new();

    for hour in response.days.into_iter().flat_map(|d| d.hours) {
        if hour.get("source").and_then(serde_json::Value::as_str) != Some("fcst") {
            continue;
        }
        let epoch = hour
            .get("datetimeEpoch")
            .and_then(serde_json::Value::as_i64)
            .ok_or_else(|| ForecastError::parse("hour without 'datetimeEpoch'"))?;
        let t = DateTime::from_timestamp(epoch, 0)
            .ok_or_else(|| ForecastError::parse(format!("invalid epoch {epoch}")))?;
        issue_time.get_or_insert(t - half_hour);
        records.push((t + half_hour, hour));
    }

    let issue_time =
        issue_time.ok_or_else(|| ForecastError::parse("VisualCrossing returned no forecast hours"))?;
    let mut table = records_to_table(records, &FIELDS, &SKIP, !drop_weather)?;
    for name in [TEMP_AIR, TEMP_DEW] {
        if let Some(values) = table.column(name).map(<[f64]>::to_vec) {
            table.insert(name, values.into_iter().map(|v| v + KELVIN_OFFSET).collect())?;
        }
    }
    // mbar, km/h
    table.scale(PRESSURE, 100.0);
    table.scale(WIND_SPEED, 1.0 / 3.6);

    let mut forecast = Forecast::new(ForecastSource::VisualCrossing, issue_time, table);
    forecast.csv_name = Some(forecast.csv_name_from_issue("visualcrossing"));
    Ok(forecast)
}

pub struct VisualCrossingClient {
    client: Client,
    url: String,
    api_key: String,
    latitude: f64,
    longitude: f64,
    drop_weather: bool,
}

impl VisualCrossingClient {
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
impl WeatherProvider for VisualCrossingClient {
    fn source(&self) -> ForecastSource {
        ForecastSource::VisualCrossing
    }

    async fn fetch_forecast(&self) -> ForecastResult<Forecast> {
        let url = format!(
            "{}/{}%2C{}?unitGroup=metric&include=hours&key={}&contentType=json",
            self.url.trim_end_matches('/'),
            self.latitude,
            self.longitude,
            self.api_key
        );
        debug!(latitude = self.latitude, longitude = self.longitude, "Fetching VisualCrossing forecast");
        let response: TimelineResponse = get_json(&self.client, &url, None).await?;
        let forecast = parse_response(response, self.drop_weather)?;
        info!(
            issue_time = %forecast.issue_time_str(),
            hours = forecast.table.len(),
            "Fetched VisualCrossing forecast"
        );
        Ok(forecast)
    }
}
