use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::pvmodel::{SplitStorage, TemperatureModel};
use crate::solar::ClearSkyModel;

pub const DEFAULT_CONFIG_FILE: &str = "config.toml";
pub const ENV_PREFIX: &str = "PVFORECAST__";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub forecasts: ForecastsConfig,
    pub pv_system: PvSystemConfig,
    #[serde(default)]
    pub dwd: DwdConfig,
    #[serde(default)]
    pub solcast: SolCastConfig,
    #[serde(default)]
    pub openweathermap: WeatherApiConfig,
    #[serde(default)]
    pub visualcrossing: WeatherApiConfig,
    #[serde(default)]
    pub file_input: FileInputConfig,
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub influx: InfluxConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// Which providers a run processes
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ForecastsConfig {
    pub mosmix_l: bool,
    pub mosmix_s: bool,
    pub solcast: bool,
    pub visualcrossing: bool,
    pub owm: bool,
    pub file_input: bool,
}

/// Lead PV array; followers override individual fields for split arrays
#[derive(Debug, Clone, Deserialize)]
pub struct PvSystemConfig {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub altitude: f64,
    pub tilt: f64,
    pub azimuth: f64,
    /// DC nameplate power (W)
    pub system_power: f64,
    /// Inverter DC input rating (W)
    pub inverter_power: f64,
    #[serde(default = "default_temperature_coeff")]
    pub temperature_coeff: f64,
    #[serde(default = "default_nominal_efficiency")]
    pub nominal_efficiency: f64,
    #[serde(default = "default_temperature_model")]
    pub temperature_model: TemperatureModel,
    #[serde(default = "default_clearsky_model")]
    pub clearsky_model: ClearSkyModel,
    #[serde(default = "default_linke_turbidity")]
    pub linke_turbidity: f64,
    #[serde(default = "default_albedo")]
    pub albedo: f64,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub storage: SplitStorage,
    #[serde(default = "default_suffix")]
    pub suffix: String,
    #[serde(default)]
    pub followers: Vec<PvArrayOverride>,
}

/// Follower array of a split-array installation
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PvArrayOverride {
    pub suffix: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,
    pub tilt: Option<f64>,
    pub azimuth: Option<f64>,
    pub system_power: Option<f64>,
    pub inverter_power: Option<f64>,
    pub temperature_coeff: Option<f64>,
    pub nominal_efficiency: Option<f64>,
    pub temperature_model: Option<TemperatureModel>,
}

fn default_temperature_coeff() -> f64 {
    -0.005
}
fn default_nominal_efficiency() -> f64 {
    0.96
}
fn default_temperature_model() -> TemperatureModel {
    TemperatureModel::OpenRackGlassGlass
}
fn default_clearsky_model() -> ClearSkyModel {
    ClearSkyModel::SimplifiedSolis
}
fn default_linke_turbidity() -> f64 {
    crate::solar::clearsky::DEFAULT_LINKE_TURBIDITY
}
fn default_albedo() -> f64 {
    0.25
}
fn default_model() -> String {
    "PVWatts".to_string()
}
fn default_suffix() -> String {
    "1".to_string()
}

impl PvSystemConfig {
    /// Lead array merged with a follower's overrides
    pub fn follower(&self, o: &PvArrayOverride) -> PvSystemConfig {
        PvSystemConfig {
            latitude: o.latitude.unwrap_or(self.latitude),
            longitude: o.longitude.unwrap_or(self.longitude),
            altitude: o.altitude.unwrap_or(self.altitude),
            tilt: o.tilt.unwrap_or(self.tilt),
            azimuth: o.azimuth.unwrap_or(self.azimuth),
            system_power: o.system_power.unwrap_or(self.system_power),
            inverter_power: o.inverter_power.unwrap_or(self.inverter_power),
            temperature_coeff: o.temperature_coeff.unwrap_or(self.temperature_coeff),
            nominal_efficiency: o.nominal_efficiency.unwrap_or(self.nominal_efficiency),
            temperature_model: o.temperature_model.unwrap_or(self.temperature_model),
            suffix: o.suffix.clone(),
            followers: Vec::new(),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DwdConfig {
    pub station: String,
    pub url_l: String,
    pub url_s: String,
    pub irradiance: String,
    pub store_path: PathBuf,
    pub store_csv: bool,
    pub store_db: bool,
    pub store_influx: bool,
    /// Keep the downloaded KML (gzipped) in `store_path`
    pub store_kmz: bool,
    /// Keep older MOSMIX_S archives instead of deleting them
    pub keep_kmz_s: bool,
    pub drop_weather: bool,
}

impl Default for DwdConfig {
    fn default() -> Self {
        Self {
            station: String::new(),
            url_l: "https://opendata.dwd.de/weather/local_forecasts/mos/MOSMIX_L/single_stations/"
                .to_string(),
            url_s: "https://opendata.dwd.de/weather/local_forecasts/mos/MOSMIX_S/all_stations/kml/"
                .to_string(),
            irradiance: "disc".to_string(),
            store_path: PathBuf::from("."),
            store_csv: false,
            store_db: false,
            store_influx: false,
            store_kmz: false,
            keep_kmz_s: false,
            drop_weather: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SolCastConfig {
    pub api_key: String,
    pub resource_id: String,
    /// Second rooftop site for split-array installations
    pub resource_id_2: Option<String>,
    pub base_url: String,
    /// Minutes between downloads, or `late`, `early`, `allday`; anything else picks the midday policy
    pub interval: String,
    pub hours: u32,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub store_path: PathBuf,
    pub store_csv: bool,
    pub store_db: bool,
    pub store_influx: bool,
    pub force: bool,
}

impl Default for SolCastConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            resource_id: String::new(),
            resource_id_2: None,
            base_url: "https://api.solcast.com.au".to_string(),
            interval: "0".to_string(),
            hours: 168,
            latitude: None,
            longitude: None,
            store_path: PathBuf::from("."),
            store_csv: false,
            store_db: false,
            store_influx: false,
            force: false,
        }
    }
}

/// Shared by the OpenWeatherMap and VisualCrossing sections
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WeatherApiConfig {
    pub api_key: String,
    pub base_url: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Irradiance model list; provider specific default when empty
    pub irradiance: Option<String>,
    pub store_path: PathBuf,
    pub store_csv: bool,
    pub store_db: bool,
    pub store_influx: bool,
    pub drop_weather: Option<bool>,
    pub force: bool,
}

impl WeatherApiConfig {
    pub fn any_sink(&self) -> bool {
        self.store_db || self.store_influx || self.store_csv
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileInputType {
    #[default]
    Csv,
    Kml,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FileInputConfig {
    #[serde(rename = "type")]
    pub kind: FileInputType,
    pub file: PathBuf,
    pub extension: String,
    pub irradiance: String,
    pub store_path: PathBuf,
}

impl Default for FileInputConfig {
    fn default() -> Self {
        Self {
            kind: FileInputType::Csv,
            file: PathBuf::new(),
            extension: ".zip".to_string(),
            irradiance: "disc".to_string(),
            store_path: PathBuf::from("."),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    pub store_path: PathBuf,
    pub db_name: String,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from("."),
            db_name: "pvforecast.db".to_string(),
        }
    }
}

impl DbConfig {
    pub fn path(&self) -> PathBuf {
        self.store_path.join(&self.db_name)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InfluxConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for InfluxConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8086,
            database: "pvforecast".to_string(),
            username: None,
            password: None,
        }
    }
}

impl InfluxConfig {
    pub fn base_url(&self) -> String {
        if self.host.starts_with("http://") || self.host.starts_with("https://") {
            format!("{}:{}", self.host.trim_end_matches('/'), self.port)
        } else {
            format!("http://{}:{}", self.host, self.port)
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_seconds: u64,
    pub user_agent: String,
    /// Extra attempts after a timeout, 429 or 5xx (not used for SolCast)
    pub retries: u32,
    /// First retry delay, doubled on each further attempt
    pub retry_backoff_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 60,
            user_agent: concat!("pv-forecast/", env!("CARGO_PKG_VERSION")).to_string(),
            retries: 2,
            retry_backoff_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub lock_file: PathBuf,
    pub stale_after_minutes: u64,
    /// Cadence of `--watch` mode
    pub interval_minutes: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            lock_file: PathBuf::from("pvforecast.lock"),
            stale_after_minutes: 60,
            interval_minutes: 15,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub format: LogFormat,
    /// Append log records to this file in addition to stdout
    pub file: Option<PathBuf>,
    /// Default filter when `RUST_LOG` is unset
    pub filter: Option<String>,
}

impl Config {
    /// Load `path` merged with `PVFORECAST__SECTION__KEY` environment overrides
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            anyhow::bail!("config file '{}' does not exist", path.display());
        }
        let figment = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        let cfg: Config = figment
            .extract()
            .with_context(|| format!("reading config file '{}'", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: Config = Figment::new().merge(Toml::string(s)).extract()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let pv = &self.pv_system;
        if !(-90.0..=90.0).contains(&pv.latitude) || !(-180.0..=180.0).contains(&pv.longitude) {
            anyhow::bail!(
                "pv_system: invalid coordinates ({}, {})",
                pv.latitude,
                pv.longitude
            );
        }
        if !pv.model.eq_ignore_ascii_case("pvwatts") {
            anyhow::bail!(
                "pv_system.model '{}' is not supported, only PVWatts is available",
                pv.model
            );
        }
        if pv.system_power <= 0.0 || pv.inverter_power <= 0.0 {
            anyhow::bail!("pv_system: system_power and inverter_power must be positive");
        }
        let mut suffixes = vec![pv.suffix.as_str()];
        for f in &pv.followers {
            if f.suffix.is_empty() || suffixes.contains(&f.suffix.as_str()) {
                anyhow::bail!("pv_system.followers: suffix '{}' is empty or duplicated", f.suffix);
            }
            suffixes.push(&f.suffix);
        }
        if (self.forecasts.mosmix_l || self.forecasts.mosmix_s) && self.dwd.station.is_empty() {
            anyhow::bail!("dwd.station is required for MOSMIX downloads");
        }
        if self.forecasts.solcast
            && (self.solcast.api_key.is_empty() || self.solcast.resource_id.is_empty())
        {
            anyhow::bail!("solcast.api_key and solcast.resource_id are required");
        }
        if self.run.interval_minutes == 0 {
            anyhow::bail!("run.interval_minutes must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [forecasts]
        mosmix_l = true

        [pv_system]
        latitude = 50.2
        longitude = 8.7
        tilt = 30
        azimuth = 180
        system_power = 5000
        inverter_power = 4500

        [[pv_system.followers]]
        suffix = "2"
        azimuth = 90
        system_power = 2000

        [dwd]
        station = "10637"
        store_db = true
    "#;

    #[test]
    fn test_defaults_applied() {
        let cfg = Config::from_toml_str(MINIMAL).unwrap();
        assert_eq!(cfg.pv_system.temperature_coeff, -0.005);
        assert_eq!(cfg.pv_system.nominal_efficiency, 0.96);
        assert_eq!(cfg.pv_system.clearsky_model, ClearSkyModel::SimplifiedSolis);
        assert_eq!(cfg.pv_system.storage, SplitStorage::Sum);
        assert_eq!(cfg.dwd.irradiance, "disc");
        assert!(cfg.dwd.drop_weather);
        assert_eq!(cfg.solcast.hours, 168);
        assert_eq!(cfg.influx.port, 8086);
        assert_eq!(cfg.run.interval_minutes, 15);
        assert_eq!(cfg.log.format, LogFormat::Text);
    }

    #[test]
    fn test_follower_inherits_lead() {
        let cfg = Config::from_toml_str(MINIMAL).unwrap();
        let f = cfg.pv_system.follower(&cfg.pv_system.followers[0]);
        assert_eq!(f.azimuth, 90.0);
        assert_eq!(f.system_power, 2000.0);
        assert_eq!(f.tilt, 30.0);
        assert_eq!(f.inverter_power, 4500.0);
        assert_eq!(f.suffix, "2");
        assert!(f.followers.is_empty());
    }

    #[test]
    fn test_rejects_cec_model() {
        let toml = MINIMAL.replace("tilt = 30", "tilt = 30\nmodel = \"CEC\"");
        let err = Config::from_toml_str(&toml).unwrap_err();
        assert!(err.to_string().contains("not supported"));
    }

    #[test]
    fn test_requires_station_for_mosmix() {
        let toml = MINIMAL.replace("station = \"10637\"", "");
        assert!(Config::from_toml_str(&toml).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load(Path::new("/nonexistent/pvforecast.toml")).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_influx_base_url() {
        let mut influx = InfluxConfig::default();
        assert_eq!(influx.base_url(), "http://localhost:8086");
        influx.host = "https://influx.example.invalid/".to_string();
        assert_eq!(influx.base_url(), "https://influx.example.invalid:8086");
    }
}
