use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::table::ForecastTable;
use crate::error::ForecastResult;

/// Origin of a forecast
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ForecastSource {
    /// DWD MOSMIX_L, per station, six-hourly issue
    DwdL,
    /// DWD MOSMIX_S, all stations, hourly issue
    DwdS,
    SolCast,
    OpenWeatherMap,
    VisualCrossing,
    CsvInput,
}

impl ForecastSource {
    /// Default database table / Influx measurement for this source
    pub fn default_table(&self) -> &'static str {
        match self {
            Self::DwdL => "dwd",
            Self::DwdS => "dwd_s",
            Self::SolCast => "solcast",
            Self::OpenWeatherMap => "owm",
            Self::VisualCrossing => "visualcrossing",
            Self::CsvInput => "csvinput",
        }
    }
}

/// A forecast issued at a point in time, ready to be modelled and stored
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Forecast {
    pub source: ForecastSource,
    pub issue_time: DateTime<Utc>,
    pub table: ForecastTable,
    /// Database table / Influx measurement name
    pub sql_table: String,
    /// Columns exported to Influx
    pub influx_fields: Vec<String>,
    /// File name used when written as CSV
    pub csv_name: Option<String>,
}

impl Forecast {
    pub fn new(source: ForecastSource, issue_time: DateTime<Utc>, table: ForecastTable) -> Self {
        Self {
            source,
            issue_time,
            table,
            sql_table: source.default_table().to_string(),
            influx_fields: Vec::new(),
            csv_name: None,
        }
    }

    /// Issue time in the `YYYY-MM-DD HH:MM:SS+00:00` form used as storage key
    pub fn issue_time_str(&self) -> String {
        format_timestamp(&self.issue_time)
    }

    /// Append simulated PV output and adopt its Influx fields
    pub fn merge_pv(&mut self, pv: &ForecastTable, influx_fields: Vec<String>) -> ForecastResult<()> {
        self.table.merge(pv)?;
        self.influx_fields = influx_fields;
        Ok(())
    }

    /// `<prefix>_YYYY-MM-DD_HH-MM.csv.gz` based on the issue time
    pub fn csv_name_from_issue(&self, prefix: &str) -> String {
        format!(
            "{prefix}_{}.csv.gz",
            self.issue_time.format("%Y-%m-%d_%H-%M")
        )
    }
}

pub fn format_timestamp(t: &DateTime<Utc>) -> String {
    t.format("%Y-%m-%d %H:%M:%S+00:00").to_string()
}

/// Parse timestamps as written by [`format_timestamp`] or RFC 3339
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Some(t.with_timezone(&Utc));
    }
    if let Ok(t) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%:z") {
        return Some(t.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|n| Utc.from_utc_datetime(&n))
}
