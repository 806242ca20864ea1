//! Forecast providers
//!
//! Each provider downloads (or reads) a forecast and converts it into a
//! [`Forecast`] with the standard weather columns, or with PV estimates for
//! SolCast.

pub mod csv_input;
pub mod dwd;
pub mod openweather;
pub mod solcast;
pub mod visualcrossing;

pub use dwd::{DwdClient, DwdSource, KmlDocument};
pub use openweather::OpenWeatherClient;
pub use solcast::{DownloadPlanner, PollingInterval, SolCastClient};
pub use visualcrossing::VisualCrossingClient;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header, Client, Response};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::error;

use crate::config::HttpConfig;
use crate::domain::forecast::{Forecast, ForecastSource};
use crate::domain::table::ForecastTable;
use crate::error::{ForecastError, ForecastResult};

/// Hourly weather API whose output feeds the PV model
#[async_trait]
pub trait WeatherProvider: Send + Sync {
    fn source(&self) -> ForecastSource;

    /// Download the current forecast with standard weather columns
    async fn fetch_forecast(&self) -> ForecastResult<Forecast>;
}

/// HTTP client shared by all providers of a run
pub fn http_client(cfg: &HttpConfig) -> ForecastResult<Client> {
    let mut headers = header::HeaderMap::new();
    headers.insert(
        header::USER_AGENT,
        header::HeaderValue::from_str(&cfg.user_agent)
            .map_err(|e| ForecastError::config(format!("invalid user agent: {e}")))?,
    );
    Client::builder()
        .timeout(Duration::from_secs(cfg.timeout_seconds))
        .default_headers(headers)
        .build()
        .map_err(|e| ForecastError::config(format!("cannot build HTTP client: {e}")))
}

/// URL without query string, safe to log when the API key is a query parameter
pub(crate) fn redact(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

/// GET `url`, failing on non-success status
pub(crate) async fn get(client: &Client, url: &str, bearer: Option<&str>) -> ForecastResult<Response> {
    let mut request = client.get(url);
    if let Some(token) = bearer {
        request = request.bearer_auth(token);
    }
    let response = request.send().await.map_err(|e| ForecastError::Request {
        url: redact(url).to_string(),
        source: e.without_url(),
    })?;

    let status = response.status();
    if !status.is_success() {
        error!(url = redact(url), status = status.as_u16(), "Provider returned error status");
        return Err(ForecastError::Http {
            status: status.as_u16(),
            url: redact(url).to_string(),
        });
    }
    Ok(response)
}

/// GET `url` and decode a JSON body
pub(crate) async fn get_json<T: serde::de::DeserializeOwned>(
    client: &Client,
    url: &str,
    bearer: Option<&str>,
) -> ForecastResult<T> {
    get(client, url, bearer)
        .await?
        .json::<T>()
        .await
        .map_err(|e| ForecastError::parse(format!("{}: {}", redact(url), e.without_url())))
}

/// Build a table from per-hour JSON objects.
///
/// `fields` maps source keys to column names and always produce a column
/// (NaN where absent). With `extra = true` every other numeric key not in
/// `skip` is kept under its own name.
pub(crate) fn records_to_table(
    records: Vec<(DateTime<Utc>, serde_json::Map<String, serde_json::Value>)>,
    fields: &[(&str, &str)],
    skip: &[&str],
    extra: bool,
) -> ForecastResult<ForecastTable> {
    let is_known = |k: &str| fields.iter().any(|(src, _)| *src == k) || skip.contains(&k);
    let extra_keys: BTreeSet<String> = if extra {
        records
            .iter()
            .flat_map(|(_, r)| r.iter())
            .filter(|(k, v)| v.is_number() && !is_known(k))
            .map(|(k, _)| k.clone())
            .collect()
    } else {
        BTreeSet::new()
    };

    let mut names: Vec<String> = fields.iter().map(|(_, to)| to.to_string()).collect();
    names.extend(extra_keys.iter().cloned());
    let keys: Vec<&str> = fields
        .iter()
        .map(|(src, _)| *src)
        .chain(extra_keys.iter().map(String::as_str))
        .collect();

    let rows = records
        .into_iter()
        .map(|(t, r)| {
            let values = keys
                .iter()
                .map(|k| r.get(*k).and_then(serde_json::Value::as_f64).unwrap_or(f64::NAN))
                .collect();
            (t, values)
        })
        .collect();
    ForecastTable::from_rows(&names, rows)
}
