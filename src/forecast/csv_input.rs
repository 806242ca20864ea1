//! Weather forecast from a local CSV file with a `PeriodEnd` column

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use regex::Regex;
use std::io::Read;
use std::path::Path;

use crate::domain::forecast::{parse_timestamp, Forecast, ForecastSource};
use crate::domain::table::ForecastTable;
use crate::error::{ForecastError, ForecastResult};

pub const PERIOD_END: &str = "PeriodEnd";

/// Parse CSV text: `PeriodEnd` plus numeric columns; empty cells are NaN
pub fn parse_csv<R: Read>(reader: R) -> ForecastResult<ForecastTable> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let headers = rdr.headers()?.clone();
    let time_col = headers
        .iter()
        .position(|h| h == PERIOD_END)
        .ok_or_else(|| ForecastError::parse(format!("CSV input has no '{PERIOD_END}' column")))?;
    let names: Vec<String> = headers
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != time_col)
        .map(|(_, h)| h.to_string())
        .collect();

    let mut rows = Vec::new();
    for (line, record) in rdr.records().enumerate() {
        let record = record?;
        let raw = record.get(time_col).unwrap_or_default();
        let t = parse_timestamp(raw).ok_or_else(|| {
            ForecastError::parse(format!("row {}: invalid {PERIOD_END} '{raw}'", line + 1))
        })?;
        let values = record
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != time_col)
            .map(|(_, v)| {
                if v.is_empty() {
                    Ok(f64::NAN)
                } else {
                    v.parse::<f64>().map_err(|_| {
                        ForecastError::parse(format!("row {}: non-numeric value '{v}'", line + 1))
                    })
                }
            })
            .collect::<ForecastResult<Vec<_>>>()?;
        rows.push((t, values));
    }
    ForecastTable::from_rows(&names, rows)
}

/// `<stem>_out.csv.gz` for `<stem>.csv[...]`
pub fn output_name(path: &Path) -> ForecastResult<String> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| ForecastError::config(format!("invalid file name '{}'", path.display())))?;
    let re = Regex::new(r"\.csv.*$").map_err(|e| ForecastError::parse(e.to_string()))?;
    if re.is_match(file_name) {
        Ok(re.replace(file_name, "_out.csv.gz").into_owned())
    } else {
        Ok(format!("{file_name}_out.csv.gz"))
    }
}

/// Read a (possibly gzipped) CSV forecast; the issue time is `now`
pub fn read_csv_file(path: &Path, now: DateTime<Utc>) -> ForecastResult<Forecast> {
    let file = std::fs::File::open(path)?;
    let table = if path.extension().is_some_and(|e| e.eq_ignore_ascii_case("gz")) {
        parse_csv(GzDecoder::new(file))?
    } else {
        parse_csv(file)?
    };
    if table.is_empty() {
        return Err(ForecastError::parse(format!("'{}' holds no rows", path.display())));
    }
    let mut forecast = Forecast::new(ForecastSource::CsvInput, now, table);
    forecast.csv_name = Some(output_name(path)?);
    Ok(forecast)
}
