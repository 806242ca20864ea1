//! Orchestrates one forecast run over all enabled providers

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::Client;
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::{Config, FileInputType, WeatherApiConfig};
use crate::domain::forecast::{Forecast, ForecastSource};
use crate::error::ForecastResult;
use crate::forecast::{
    csv_input, dwd, http_client, DownloadPlanner, DwdClient, DwdSource, OpenWeatherClient,
    SolCastClient, VisualCrossingClient, WeatherProvider,
};
use crate::pvmodel::{ModelSelection, PvModel};
use crate::repo::{write_csv, Repositories, StoreTargets};
use crate::solar::sun_times;

/// Weather APIs publish hourly, two minutes of slack
const MIN_ISSUE_DELTA_MINUTES: i64 = 58;

/// Minutes between two issue times, rounded to the nearest minute
fn issue_delta_minutes(issue: DateTime<Utc>, last_issue: DateTime<Utc>) -> i64 {
    ((issue - last_issue).num_seconds() as f64 / 60.0).round() as i64
}

/// What a `process_*` call did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A forecast was modelled and stored
    Processed,
    /// Nothing new, or nothing to do
    Skipped,
}

/// Per-provider results of `run_forecasts`
#[derive(Debug, Default)]
pub struct RunSummary {
    pub processed: Vec<&'static str>,
    pub skipped: Vec<&'static str>,
    pub failed: Vec<(&'static str, String)>,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    fn record(&mut self, provider: &'static str, result: Result<Outcome>) {
        match result {
            Ok(Outcome::Processed) => self.processed.push(provider),
            Ok(Outcome::Skipped) => self.skipped.push(provider),
            Err(e) => {
                error!(provider, "Forecast failed: {e:#}");
                self.failed.push((provider, format!("{e:#}")));
            }
        }
    }
}

pub struct ForecastManager {
    cfg: Config,
    client: Client,
    repos: Repositories,
}

impl ForecastManager {
    pub fn new(cfg: Config) -> Result<Self> {
        let client = http_client(&cfg.http).context("creating HTTP client")?;
        let repos = Repositories::new(&cfg, client.clone());
        Ok(Self { cfg, client, repos })
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Process every enabled provider in a fixed order. A failing provider
    /// does not stop the others.
    pub async fn run_forecasts(&self) -> RunSummary {
        let enabled = &self.cfg.forecasts;
        let mut summary = RunSummary::default();

        if enabled.mosmix_l {
            summary.record("mosmix_l", self.process_dwd(&DwdSource::MosmixL).await);
        }
        if enabled.mosmix_s {
            summary.record("mosmix_s", self.process_dwd(&DwdSource::MosmixS).await);
        }
        if enabled.solcast {
            summary.record("solcast", self.process_solcast(Utc::now()).await);
        }
        if enabled.visualcrossing {
            summary.record("visualcrossing", self.process_visualcrossing().await);
        }
        if enabled.owm {
            summary.record("owm", self.process_openweather().await);
        }
        if enabled.file_input {
            summary.record("file_input", self.process_file_input(Utc::now()).await);
        }

        info!(
            processed = ?summary.processed,
            skipped = ?summary.skipped,
            failed = summary.failed.len(),
            "Forecast run finished"
        );
        summary
    }

    /// Run `op`, trying again after transient failures with a doubling delay
    async fn with_retry<T, F, Fut>(&self, what: &str, mut op: F) -> ForecastResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ForecastResult<T>>,
    {
        let http = &self.cfg.http;
        let mut delay = Duration::from_millis(http.retry_backoff_ms);
        let mut attempt = 0;
        loop {
            match op().await {
                Err(e) if e.is_transient() && attempt < http.retries => {
                    attempt += 1;
                    warn!(what, attempt, "Download failed: {e}, retrying in {delay:?}");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                result => return result,
            }
        }
    }

    /// Run the split-array PV model over `forecast` and merge its output
    fn model_pv(&self, forecast: &mut Forecast, models: &str) -> Result<()> {
        let selection: ModelSelection = models.parse()?;
        let pv = PvModel::new(&self.cfg.pv_system)?;
        let output = pv
            .run_split_array(&forecast.table, &selection)
            .with_context(|| format!("PV model for {}", forecast.source))?;
        forecast.merge_pv(&output.table, output.influx_fields)?;
        Ok(())
    }

    /// Download or read one MOSMIX document, model PV output and store it per `[dwd]`
    pub async fn process_dwd(&self, source: &DwdSource) -> Result<Outcome> {
        let dwd_cfg = &self.cfg.dwd;
        let (doc, kind) = match source {
            DwdSource::MosmixL => {
                let client = DwdClient::new(self.client.clone(), dwd_cfg.clone());
                let doc = self.with_retry("MOSMIX_L", || client.fetch_mosmix_l()).await?;
                (doc, ForecastSource::DwdL)
            }
            DwdSource::MosmixS => {
                let client = DwdClient::new(self.client.clone(), dwd_cfg.clone());
                match self.with_retry("MOSMIX_S", || client.fetch_mosmix_s()).await? {
                    Some(doc) => (doc, ForecastSource::DwdS),
                    None => return Ok(Outcome::Skipped),
                }
            }
            DwdSource::File(path) => {
                let doc = dwd::read_kml_file(path)
                    .with_context(|| format!("reading '{}'", path.display()))?;
                (doc, ForecastSource::DwdL)
            }
        };

        let mut forecast = dwd::to_forecast(&doc, kind, dwd_cfg.drop_weather)
            .with_context(|| format!("parsing {}", doc.name))?;
        info!(
            document = %doc.name,
            issue_time = %forecast.issue_time_str(),
            steps = forecast.table.len(),
            "Parsed MOSMIX forecast"
        );
        self.model_pv(&mut forecast, &dwd_cfg.irradiance)?;

        let targets = StoreTargets {
            csv: dwd_cfg.store_csv,
            db: dwd_cfg.store_db,
            influx: dwd_cfg.store_influx,
        };
        self.repos
            .store(&forecast, targets, &dwd_cfg.store_path)
            .await?;
        Ok(Outcome::Processed)
    }

    /// Process every file in `dir` ending with `extension`; returns the count
    pub async fn process_dwd_directory(&self, dir: &Path, extension: &str) -> Result<usize> {
        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .with_context(|| format!("reading directory '{}'", dir.display()))?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let matches = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(extension));
            if matches && entry.file_type().await?.is_file() {
                files.push(path);
            }
        }
        files.sort();

        for file in &files {
            self.process_dwd(&DwdSource::File(file.clone())).await?;
        }
        info!(directory = %dir.display(), count = files.len(), "Processed MOSMIX files");
        Ok(files.len())
    }

    /// Download SolCast estimates when the planner allows it
    pub async fn process_solcast(&self, now: DateTime<Utc>) -> Result<Outcome> {
        let sc = &self.cfg.solcast;
        if !(sc.store_db || sc.store_influx) {
            warn!("SolCast download requires store_db or store_influx, skipped");
            return Ok(Outcome::Skipped);
        }
        if sc.force {
            warn!("SolCast download forced, mind the daily API call limit");
        }
        let targets = StoreTargets {
            csv: sc.store_csv,
            db: sc.store_db,
            influx: sc.store_influx,
        };

        let latitude = sc.latitude.unwrap_or(self.cfg.pv_system.latitude);
        let longitude = sc.longitude.unwrap_or(self.cfg.pv_system.longitude);
        let daylight = sun_times(now.date_naive(), latitude, longitude);
        let table = ForecastSource::SolCast.default_table();
        // the database wins over InfluxDB when both are written
        let lookup = StoreTargets {
            influx: sc.store_influx && !sc.store_db,
            ..targets
        };
        let last_issue = self
            .repos
            .last_issue_time(table, lookup)
            .await
            .context("reading last SolCast issue time")?;

        if !DownloadPlanner::from_config(sc).should_download(now, &daylight, last_issue) {
            return Ok(Outcome::Skipped);
        }

        let forecast = SolCastClient::new(self.client.clone(), sc.clone())
            .fetch_forecast(now)
            .await?;
        self.repos.store(&forecast, targets, &sc.store_path).await?;
        Ok(Outcome::Processed)
    }

    pub async fn process_visualcrossing(&self) -> Result<Outcome> {
        let vc = &self.cfg.visualcrossing;
        let (lat, lon) = self.coordinates(vc);
        let provider = VisualCrossingClient::new(self.client.clone(), vc, lat, lon);
        self.process_weather_api(&provider, vc, "disc").await
    }

    pub async fn process_openweather(&self) -> Result<Outcome> {
        let owm = &self.cfg.openweathermap;
        let (lat, lon) = self.coordinates(owm);
        let provider = OpenWeatherClient::new(self.client.clone(), owm, lat, lon);
        self.process_weather_api(&provider, owm, "clearsky_scaling").await
    }

    fn coordinates(&self, cfg: &WeatherApiConfig) -> (f64, f64) {
        (
            cfg.latitude.unwrap_or(self.cfg.pv_system.latitude),
            cfg.longitude.unwrap_or(self.cfg.pv_system.longitude),
        )
    }

    /// Fetch an hourly weather forecast and model it when it is newer than the
    /// last stored one
    async fn process_weather_api(
        &self,
        provider: &dyn WeatherProvider,
        cfg: &WeatherApiConfig,
        default_models: &str,
    ) -> Result<Outcome> {
        let source = provider.source();
        if !cfg.any_sink() {
            warn!(%source, "No storage enabled (store_db, store_influx or store_csv), skipped");
            return Ok(Outcome::Skipped);
        }
        let targets = StoreTargets {
            csv: cfg.store_csv,
            db: cfg.store_db,
            influx: cfg.store_influx,
        };

        let mut forecast = self
            .with_retry(&source.to_string(), || provider.fetch_forecast())
            .await?;
        let last_issue = self
            .repos
            .last_issue_time(&forecast.sql_table, targets)
            .await
            .with_context(|| format!("reading last {source} issue time"))?;
        let delta_t = issue_delta_minutes(forecast.issue_time, last_issue);
        if delta_t <= MIN_ISSUE_DELTA_MINUTES && !cfg.force {
            info!(%source, delta_t, "Forecast not newer than the stored one");
            return Ok(Outcome::Skipped);
        }

        let models = cfg.irradiance.as_deref().unwrap_or(default_models);
        self.model_pv(&mut forecast, models)?;
        self.repos.store(&forecast, targets, &cfg.store_path).await?;
        Ok(Outcome::Processed)
    }

    /// Process `[file_input]`: a CSV weather file, or MOSMIX file(s) on disk
    pub async fn process_file_input(&self, now: DateTime<Utc>) -> Result<Outcome> {
        let fi = &self.cfg.file_input;
        let path = fi.file.as_path();
        match fi.kind {
            FileInputType::Kml => {
                if path.is_file() {
                    self.process_dwd(&DwdSource::File(path.to_path_buf())).await
                } else if path.is_dir() {
                    let extension = if fi.extension.starts_with('.') {
                        fi.extension.clone()
                    } else {
                        format!(".{}", fi.extension)
                    };
                    let count = self.process_dwd_directory(path, &extension).await?;
                    Ok(if count > 0 {
                        Outcome::Processed
                    } else {
                        Outcome::Skipped
                    })
                } else {
                    anyhow::bail!("'{}' is neither a file nor a directory", path.display())
                }
            }
            FileInputType::Csv => {
                if !path.is_file() {
                    anyhow::bail!("file '{}' not found", path.display());
                }
                let mut forecast = csv_input::read_csv_file(path, now)
                    .with_context(|| format!("reading '{}'", path.display()))?;
                self.model_pv(&mut forecast, &fi.irradiance)?;
                let written = write_csv(&fi.store_path, &forecast)?;
                info!(path = %written.display(), "Forecast written to CSV");
                Ok(Outcome::Processed)
            }
        }
    }

    pub async fn close(self) {
        self.repos.close().await;
    }
}
