//! Gzipped CSV export

use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::domain::forecast::{format_timestamp, Forecast};
use crate::error::{ForecastError, ForecastResult};
use crate::forecast::csv_input::PERIOD_END;

/// Write the whole forecast table to `dir/<csv_name>`; NaN becomes an empty cell
pub fn write_csv(dir: &Path, forecast: &Forecast) -> ForecastResult<PathBuf> {
    let name = forecast
        .csv_name
        .clone()
        .unwrap_or_else(|| forecast.csv_name_from_issue(forecast.source.default_table()));
    std::fs::create_dir_all(dir)?;
    let path = dir.join(name);

    let file = File::create(&path)?;
    let mut writer = csv::Writer::from_writer(GzEncoder::new(file, Compression::default()));
    let names = forecast.table.names();

    let mut header = vec![PERIOD_END.to_string()];
    header.extend(names.iter().cloned());
    writer.write_record(&header)?;

    for (row, t) in forecast.table.index().iter().enumerate() {
        let mut record = vec![format_timestamp(t)];
        record.extend(forecast.table.row(row, &names).into_iter().map(|v| {
            if v.is_nan() {
                String::new()
            } else {
                v.to_string()
            }
        }));
        writer.write_record(&record)?;
    }

    writer
        .into_inner()
        .map_err(|e| ForecastError::Storage(format!("{}: {}", path.display(), e.error())))?
        .finish()?;
    debug!(path = %path.display(), rows = forecast.table.len(), "Wrote forecast CSV");
    Ok(path)
}
