use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use pv_forecast::config::{Config, LogConfig, DEFAULT_CONFIG_FILE};
use pv_forecast::lock::RunLock;
use pv_forecast::{telemetry, ForecastManager};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

/// Photovoltaic generation forecast
#[derive(Debug, Parser)]
#[command(name = "pvforecast", version, about)]
struct Cli {
    /// Configuration file
    #[arg(short = 'c', long = "cfg", value_name = "FILE", default_value = DEFAULT_CONFIG_FILE)]
    cfg: PathBuf,

    /// Keep running and start a forecast every `[run].interval_minutes`
    #[arg(long)]
    watch: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let cfg = Config::load(&cli.cfg);

    let log_cfg = cfg.as_ref().map(|c| c.log.clone()).unwrap_or_else(|_| LogConfig::default());
    let _guard = match telemetry::init_tracing(&log_cfg) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("cannot initialize logging: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.cfg.display(),
        local_time = %Local::now().format("%Y-%m-%d, %H:%M:%S"),
        "Start"
    );

    let result = match cfg {
        Ok(cfg) if cli.watch => watch(cfg).await,
        Ok(cfg) => run_once(&cfg).await,
        Err(e) => Err(e),
    };

    let code = match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    };
    info!(local_time = %Local::now().format("%Y-%m-%d, %H:%M:%S"), "End");
    code
}

/// One forecast run under the run lock. `Ok(false)` when a provider failed.
async fn run_once(cfg: &Config) -> Result<bool> {
    let stale_after = Duration::from_secs(cfg.run.stale_after_minutes * 60);
    let Some(_lock) = RunLock::acquire(&cfg.run.lock_file, stale_after)
        .with_context(|| format!("acquiring run lock '{}'", cfg.run.lock_file.display()))?
    else {
        warn!(
            lock = %cfg.run.lock_file.display(),
            "Another forecast run is active, nothing done"
        );
        return Ok(true);
    };

    let manager = ForecastManager::new(cfg.clone())?;
    let summary = manager.run_forecasts().await;
    manager.close().await;
    Ok(summary.is_success())
}

async fn watch(cfg: Config) -> Result<bool> {
    let period = Duration::from_secs(cfg.run.interval_minutes * 60);
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let shutdown = telemetry::shutdown_signal();
    tokio::pin!(shutdown);

    info!(interval_minutes = cfg.run.interval_minutes, "Watch mode");
    let mut all_ok = true;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match run_once(&cfg).await {
                    Ok(ok) => all_ok &= ok,
                    Err(e) => {
                        error!("{e:#}");
                        all_ok = false;
                    }
                }
            }
            _ = &mut shutdown => break,
        }
    }
    warn!("shutdown complete");
    Ok(all_ok)
}
