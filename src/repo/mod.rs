pub mod csv_store;
pub mod influx;
pub mod sqlite;

pub use csv_store::write_csv;
pub use influx::InfluxRepo;
pub use sqlite::{no_issue_time, LoadOutcome, SqliteRepo};

use chrono::{DateTime, Utc};
use reqwest::Client;
use std::path::{Path, PathBuf};
use tokio::sync::OnceCell;
use tracing::info;

use crate::config::Config;
use crate::domain::forecast::Forecast;
use crate::error::ForecastResult;

/// Sinks a provider section enables
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreTargets {
    pub csv: bool,
    pub db: bool,
    pub influx: bool,
}

impl StoreTargets {
    pub fn any(&self) -> bool {
        self.csv || self.db || self.influx
    }
}

/// Storage backends of a run. The database is opened on first use.
pub struct Repositories {
    db_path: PathBuf,
    db: OnceCell<SqliteRepo>,
    influx: InfluxRepo,
}

impl Repositories {
    pub fn new(cfg: &Config, client: Client) -> Self {
        Self {
            db_path: cfg.db.path(),
            db: OnceCell::new(),
            influx: InfluxRepo::new(client, &cfg.influx),
        }
    }

    pub async fn sqlite(&self) -> ForecastResult<&SqliteRepo> {
        self.db
            .get_or_try_init(|| SqliteRepo::connect(&self.db_path))
            .await
    }

    pub fn influx(&self) -> &InfluxRepo {
        &self.influx
    }

    /// Latest stored issue time for `table`: InfluxDB first, then the
    /// database, else the Unix epoch so that the next forecast is processed.
    /// Callers that want the database to win clear `targets.influx`.
    pub async fn last_issue_time(
        &self,
        table: &str,
        targets: StoreTargets,
    ) -> ForecastResult<DateTime<Utc>> {
        if targets.influx {
            self.influx.last_issue_time(table).await
        } else if targets.db {
            self.sqlite().await?.last_issue_time(table).await
        } else {
            Ok(DateTime::UNIX_EPOCH)
        }
    }

    /// Write `forecast` to every enabled sink; CSV files go to `csv_dir`
    pub async fn store(
        &self,
        forecast: &Forecast,
        targets: StoreTargets,
        csv_dir: &Path,
    ) -> ForecastResult<()> {
        if targets.csv {
            let path = write_csv(csv_dir, forecast)?;
            info!(path = %path.display(), "Forecast written to CSV");
        }
        if targets.db {
            match self.sqlite().await?.load_forecast(forecast).await? {
                LoadOutcome::Inserted { rows, columns } => {
                    info!(table = %forecast.sql_table, rows, columns, "Forecast stored in database")
                }
                LoadOutcome::Skipped => {}
            }
        }
        if targets.influx {
            let points = self.influx.write_forecast(forecast).await?;
            info!(measurement = %forecast.sql_table, points, "Forecast written to InfluxDB");
        }
        Ok(())
    }

    pub async fn close(self) {
        if let Some(db) = self.db.into_inner() {
            info!("Closing forecast database");
            db.close().await;
        }
    }
}
