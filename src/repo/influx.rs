//! InfluxDB 1.x sink using the HTTP line protocol
//!
//! Every point carries an integer `issue_time` field (epoch seconds) so the
//! latest stored issue can be queried back with `max(issue_time)`.

use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use tracing::{debug, error};

use super::sqlite::no_issue_time;
use crate::config::InfluxConfig;
use crate::domain::forecast::Forecast;
use crate::error::{ForecastError, ForecastResult};

pub const ISSUE_TIME_FIELD: &str = "issue_time";

fn escape_measurement(s: &str) -> String {
    s.replace(',', "\\,").replace(' ', "\\ ")
}

fn escape_key(s: &str) -> String {
    s.replace(',', "\\,").replace('=', "\\=").replace(' ', "\\ ")
}

/// Line protocol for the forecast's Influx fields, one line per period.
/// NaN values are left out.
pub fn to_line_protocol(forecast: &Forecast) -> String {
    let measurement = escape_measurement(&forecast.sql_table);
    let fields: Vec<(String, &[f64])> = forecast
        .influx_fields
        .iter()
        .filter_map(|f| forecast.table.column(f).map(|v| (escape_key(f), v)))
        .collect();
    let issue = forecast.issue_time.timestamp();

    let mut out = String::new();
    for (row, t) in forecast.table.index().iter().enumerate() {
        out.push_str(&measurement);
        out.push(' ');
        for (name, values) in &fields {
            let v = values[row];
            if v.is_finite() {
                out.push_str(&format!("{name}={v},"));
            }
        }
        out.push_str(&format!("{ISSUE_TIME_FIELD}={issue}i {}\n", t.timestamp()));
    }
    out
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
}

#[derive(Debug, Deserialize)]
struct StatementResult {
    #[serde(default)]
    series: Vec<Series>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Series {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

pub struct InfluxRepo {
    client: Client,
    base_url: String,
    database: String,
    credentials: Option<(String, Option<String>)>,
}

impl InfluxRepo {
    pub fn new(client: Client, cfg: &InfluxConfig) -> Self {
        Self {
            client,
            base_url: cfg.base_url(),
            database: cfg.database.clone(),
            credentials: cfg
                .username
                .clone()
                .map(|u| (u, cfg.password.clone())),
        }
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Some((user, password)) => request.basic_auth(user, password.as_ref()),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, url: &str) -> ForecastResult<reqwest::Response> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| ForecastError::Request {
                url: url.to_string(),
                source: e.without_url(),
            })?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(url, status = status.as_u16(), body = %body.trim(), "InfluxDB request failed");
            return Err(ForecastError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response)
    }

    /// Write the forecast's Influx fields to measurement `forecast.sql_table`
    pub async fn write_forecast(&self, forecast: &Forecast) -> ForecastResult<usize> {
        if forecast.influx_fields.is_empty() {
            return Err(ForecastError::Storage(format!(
                "no Influx fields defined for {}",
                forecast.sql_table
            )));
        }
        let body = to_line_protocol(forecast);
        let url = format!("{}/write", self.base_url);
        let request = self
            .client
            .post(&url)
            .query(&[("db", self.database.as_str()), ("precision", "s")])
            .body(body);
        self.send(request, &url).await?;

        debug!(
            measurement = %forecast.sql_table,
            points = forecast.table.len(),
            "Wrote forecast to InfluxDB"
        );
        Ok(forecast.table.len())
    }

    /// Latest `issue_time` in `measurement`, 1990-01-01 when there is none
    pub async fn last_issue_time(&self, measurement: &str) -> ForecastResult<DateTime<Utc>> {
        let url = format!("{}/query", self.base_url);
        let query = format!(
            "SELECT max(\"{ISSUE_TIME_FIELD}\") FROM \"{}\"",
            measurement.replace('"', "\\\"")
        );
        let request = self
            .client
            .get(&url)
            .query(&[("db", self.database.as_str()), ("q", query.as_str())]);
        let response: QueryResponse = self
            .send(request, &url)
            .await?
            .json()
            .await
            .map_err(|e| ForecastError::parse(format!("InfluxDB query response: {e}")))?;

        let Some(result) = response.results.into_iter().next() else {
            return Ok(no_issue_time());
        };
        if let Some(e) = result.error {
            return Err(ForecastError::Storage(format!("InfluxDB query failed: {e}")));
        }
        let last = result
            .series
            .first()
            .and_then(|s| s.values.first())
            .and_then(|row| row.get(1))
            .and_then(serde_json::Value::as_i64);
        match last {
            Some(secs) => DateTime::from_timestamp(secs, 0)
                .ok_or_else(|| ForecastError::Storage(format!("invalid issue_time {secs}"))),
            None => Ok(no_issue_time()),
        }
    }
}
