//! SolCast rooftop site forecasts and the download planner that keeps the
//! daily API budget.

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use std::str::FromStr;
use tracing::{debug, info};

use super::get_json;
use crate::config::SolCastConfig;
use crate::domain::forecast::{parse_timestamp, Forecast, ForecastSource};
use crate::domain::table::ForecastTable;
use crate::error::{ForecastError, ForecastResult};
use crate::solar::Daylight;

/// Hobbyist accounts get this many API calls per day
pub const API_CALLS_PER_DAY: u32 = 50;
/// Download cadence (minutes) when the budget allows it
pub const OPTIMAL_INTERVAL: f64 = 15.0;
/// `allday` polls this many times less often at night
pub const NIGHT_FACTOR: f64 = 4.0;

const ESTIMATES: [&str; 3] = ["pv_estimate", "pv_estimate10", "pv_estimate90"];

/// Polling policy from `[solcast].interval`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollingInterval {
    /// Explicit interval in minutes
    Fixed(i64),
    /// Optimal cadence around noon, slower near sunrise and sunset
    Midday,
    /// Slower early in the day
    Late,
    /// Slower late in the day
    Early,
    /// Around the clock, slower at night
    AllDay,
}

impl FromStr for PollingInterval {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        Ok(match s.parse::<i64>() {
            Ok(n) if n > 0 => Self::Fixed(n),
            Ok(-1) => Self::Late,
            Ok(-2) => Self::Early,
            Ok(-3) => Self::AllDay,
            Ok(_) => Self::Midday,
            Err(_) => match s.as_str() {
                "late" => Self::Late,
                "early" => Self::Early,
                "allday" => Self::AllDay,
                _ => Self::Midday,
            },
        })
    }
}

/// Decides whether a SolCast download is due
#[derive(Debug, Clone)]
pub struct DownloadPlanner {
    pub interval: PollingInterval,
    pub dual_site: bool,
    pub force: bool,
    pub api_calls: u32,
}

impl DownloadPlanner {
    pub fn new(interval: PollingInterval, dual_site: bool, force: bool) -> Self {
        Self {
            interval,
            dual_site,
            force,
            api_calls: API_CALLS_PER_DAY,
        }
    }

    pub fn from_config(cfg: &SolCastConfig) -> Self {
        let interval = cfg
            .interval
            .parse()
            .unwrap_or(PollingInterval::Midday);
        Self::new(interval, cfg.resource_id_2.is_some(), cfg.force)
    }

    /// Minutes to wait between downloads at `now` for the budget driven policies
    pub fn interval_minutes(&self, now: DateTime<Utc>, day: &Daylight) -> f64 {
        let in_day = day.contains(now);
        let day_period = day.day_minutes();
        let mut optimal = OPTIMAL_INTERVAL;
        // one call kept in reserve
        let mut have = i64::from(self.api_calls) - 1;
        if self.dual_site {
            optimal *= 2.0;
            have /= 2;
        }
        let need = ((day_period + 1.0).floor() / optimal).floor() as i64 + 1;
        let long = (need - have) as f64;
        let since_sunrise = (now - day.sunrise).num_seconds() as f64 / 60.0;
        let until_sunset = (day.sunset - now).num_seconds() as f64 / 60.0;

        match self.interval {
            PollingInterval::Fixed(n) => n as f64,
            PollingInterval::Midday
                if since_sunrise < long * optimal || until_sunset < long * optimal =>
            {
                optimal * 2.0
            }
            PollingInterval::Late if since_sunrise < long * optimal * 2.0 => optimal * 2.0,
            PollingInterval::Early if until_sunset < long * optimal * 2.0 => optimal * 2.0,
            PollingInterval::AllDay => {
                let night_period = 1440.0 - day_period;
                let interval = (night_period / NIGHT_FACTOR + day_period) / have as f64;
                if in_day {
                    interval
                } else {
                    interval * NIGHT_FACTOR
                }
            }
            _ => optimal,
        }
    }

    /// Whether to download now given the last stored issue time
    pub fn should_download(
        &self,
        now: DateTime<Utc>,
        day: &Daylight,
        last_issue: DateTime<Utc>,
    ) -> bool {
        let in_day = day.contains(now);
        if !(self.force || in_day || self.interval == PollingInterval::AllDay) {
            debug!(in_day, "SolCast download skipped outside daylight");
            return false;
        }
        if self.force {
            return true;
        }
        let delta_t = ((now - last_issue).num_seconds() as f64 / 60.0).round();
        let interval = self.interval_minutes(now, day);
        debug!(delta_t, interval, in_day, "SolCast download planner");
        delta_t > interval - 2.0
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SolCastPeriod {
    pub period_end: String,
    pub period: String,
    pub pv_estimate: Option<f64>,
    pub pv_estimate10: Option<f64>,
    pub pv_estimate90: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct SolCastResponse {
    forecasts: Vec<SolCastPeriod>,
}

/// ISO 8601 duration such as `PT30M`
pub fn parse_period(s: &str) -> ForecastResult<Duration> {
    let re = Regex::new(r"^PT(?:(\d+)H)?(?:(\d+)M)?(?:(\d+)S)?$")
        .map_err(|e| ForecastError::parse(e.to_string()))?;
    let caps = re
        .captures(s)
        .ok_or_else(|| ForecastError::parse(format!("invalid period '{s}'")))?;
    let part = |i: usize| {
        caps.get(i)
            .and_then(|m| m.as_str().parse::<i64>().ok())
            .unwrap_or(0)
    };
    let d = Duration::hours(part(1)) + Duration::minutes(part(2)) + Duration::seconds(part(3));
    if d <= Duration::zero() {
        return Err(ForecastError::parse(format!("invalid period '{s}'")));
    }
    Ok(d)
}

/// Estimates of one site in W, suffixing column names with `suffix`
fn site_table(periods: &[SolCastPeriod], suffix: &str) -> ForecastResult<ForecastTable> {
    let names: Vec<String> = ESTIMATES.iter().map(|c| format!("{c}{suffix}")).collect();
    let rows = periods
        .iter()
        .map(|p| {
            let t = parse_timestamp(&p.period_end).ok_or_else(|| {
                ForecastError::parse(format!("invalid period_end '{}'", p.period_end))
            })?;
            let kw = [p.pv_estimate, p.pv_estimate10, p.pv_estimate90];
            Ok((t, kw.iter().map(|v| v.map_or(f64::NAN, |v| v * 1000.0)).collect()))
        })
        .collect::<ForecastResult<Vec<_>>>()?;
    ForecastTable::from_rows(&names, rows)
}

/// Build the SolCast forecast from one or two sites.
///
/// Issue time is the start of the first period, moved 15 minutes later when
/// the download is more than 8 minutes past it.
pub fn build_forecast(
    site_1: &[SolCastPeriod],
    site_2: Option<&[SolCastPeriod]>,
    now: DateTime<Utc>,
) -> ForecastResult<Forecast> {
    let first = site_1
        .first()
        .ok_or_else(|| ForecastError::parse("SolCast returned no forecasts"))?;
    let period = parse_period(&first.period)?;

    let table = match site_2 {
        None => site_table(site_1, "")?,
        Some(site_2) => {
            let t1 = site_table(site_1, "_1")?;
            let t2 = site_table(site_2, "_2")?;
            let mut table = t1.inner_join(&t2);
            let t2 = t2.inner_join(&table);
            table.merge(&t2)?;
            for c in ESTIMATES {
                let sum = table
                    .column(&format!("{c}_1"))
                    .zip(table.column(&format!("{c}_2")))
                    .map(|(a, b)| a.iter().zip(b).map(|(a, b)| a + b).collect::<Vec<_>>())
                    .ok_or_else(|| ForecastError::model(format!("missing SolCast column {c}")))?;
                table.insert(c, sum)?;
            }
            table
        }
    };

    let start = *table
        .index()
        .first()
        .ok_or_else(|| ForecastError::parse("SolCast sites share no periods"))?;
    let mut issue_time = start - period;
    if now - issue_time > Duration::minutes(8) {
        issue_time += Duration::minutes(15);
    }

    let mut forecast = Forecast::new(ForecastSource::SolCast, issue_time, table);
    forecast.influx_fields = forecast.table.names();
    forecast.csv_name = Some(forecast.csv_name_from_issue("solcast"));
    Ok(forecast)
}

/// Client for the SolCast rooftop sites API
pub struct SolCastClient {
    client: Client,
    cfg: SolCastConfig,
}

impl SolCastClient {
    pub fn new(client: Client, cfg: SolCastConfig) -> Self {
        Self { client, cfg }
    }

    async fn fetch_site(&self, resource_id: &str) -> ForecastResult<Vec<SolCastPeriod>> {
        let url = format!(
            "{}/rooftop_sites/{resource_id}/forecasts?format=json&hours={}",
            self.cfg.base_url.trim_end_matches('/'),
            self.cfg.hours
        );
        debug!(resource_id, "Fetching SolCast forecast");
        let response: SolCastResponse = get_json(&self.client, &url, Some(&self.cfg.api_key)).await?;
        Ok(response.forecasts)
    }

    /// Download all configured sites and build the forecast
    pub async fn fetch_forecast(&self, now: DateTime<Utc>) -> ForecastResult<Forecast> {
        info!(at = %now, "Downloading SolCast data");
        let site_1 = self.fetch_site(&self.cfg.resource_id).await?;
        let site_2 = match &self.cfg.resource_id_2 {
            Some(id) => Some(self.fetch_site(id).await?),
            None => None,
        };
        build_forecast(&site_1, site_2.as_deref(), now)
    }
}
