//! # PV Model
//!
//! PVWatts simulation of a fixed-tilt PV array driven by a weather forecast.
//!
//! For each irradiance model the chain is:
//! 1. horizontal irradiance (GHI decomposition, cloud cover model or clear sky)
//! 2. Hay-Davies transposition to the plane of array, physical IAM on the beam
//! 3. SAPM cell temperature
//! 4. PVWatts DC with wiring/connection losses, PVWatts inverter
//!
//! Split arrays run the chain once per array and aggregate per `storage`.

pub mod pvwatts;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use strum::{Display, EnumString};
use tracing::debug;

use crate::config::PvSystemConfig;
use crate::domain::table::ForecastTable;
use crate::domain::weather::{CLOUDS, GHI, KELVIN_OFFSET, PRESSURE, TEMP_AIR, WIND_SPEED, ZENITH};
use crate::error::{ForecastError, ForecastResult};
use crate::solar::clearsky::{ineichen, DEFAULT_LINKE_TURBIDITY};
use crate::solar::irradiance::{
    self, aoi, campbell_norman, clearsky_scaling, disc, erbs, extra_radiation, iam_physical,
    poa_irradiance,
};
use crate::solar::{solar_position, ClearSky, Irradiance, SolarPosition};

pub use pvwatts::{SapmParams, TemperatureModel};

/// Ambient conditions assumed when the forecast has no temperature or wind
const DEFAULT_TEMP_AIR: f64 = 20.0;
const DEFAULT_WIND_SPEED: f64 = 0.0;

/// Irradiance model feeding the PV simulation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum IrradianceModel {
    Disc,
    Erbs,
    ClearskyScaling,
    CampbellNorman,
    Clearsky,
}

impl IrradianceModel {
    /// Decomposition models need `ghi` and report a clearness index
    pub fn needs_ghi(&self) -> bool {
        matches!(self, Self::Disc | Self::Erbs)
    }

    pub fn needs_clouds(&self) -> bool {
        matches!(self, Self::ClearskyScaling | Self::CampbellNorman)
    }
}

/// Which irradiance models to run: `all` or a comma separated list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSelection {
    All,
    Only(Vec<IrradianceModel>),
}

impl ModelSelection {
    pub fn includes(&self, model: IrradianceModel) -> bool {
        match self {
            Self::All => true,
            Self::Only(list) => list.contains(&model),
        }
    }
}

impl FromStr for ModelSelection {
    type Err = ForecastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase().replace(' ', "");
        if s == "all" {
            return Ok(Self::All);
        }
        let mut models = Vec::new();
        for name in s.split(',').filter(|n| !n.is_empty()) {
            if name == "dirint" || name == "dirindex" {
                return Err(ForecastError::config(format!(
                    "irradiance model '{name}' is not supported"
                )));
            }
            let model = IrradianceModel::from_str(name).map_err(|_| {
                ForecastError::config(format!("unknown irradiance model '{name}'"))
            })?;
            models.push(model);
        }
        if models.is_empty() {
            return Err(ForecastError::config("empty irradiance model list"));
        }
        Ok(Self::Only(models))
    }
}

/// How split-array results are stored
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SplitStorage {
    /// Only the summed output columns
    #[default]
    Sum,
    /// Only per-array columns with their suffix
    Individual,
    /// Summed columns plus per-array columns
    Both,
}

/// Simulated output together with the fields exported to Influx
#[derive(Debug, Clone)]
pub struct PvOutput {
    pub table: ForecastTable,
    pub influx_fields: Vec<String>,
}

/// Per-timestamp inputs shared by all irradiance models
struct Sample {
    time: DateTime<Utc>,
    doy: u32,
    /// Position seen by the site (standard atmosphere at its altitude)
    site: SolarPosition,
    /// Position corrected with forecast pressure and temperature
    weather: SolarPosition,
    pressure: f64,
    temp_air: f64,
    wind_speed: f64,
    ghi: f64,
    clouds: f64,
}

/// One PV array configured for the PVWatts model chain
#[derive(Debug, Clone)]
pub struct PvModel {
    array: PvSystemConfig,
    clearsky: ClearSky,
    temperature: SapmParams,
    loss_factor: f64,
}

impl PvModel {
    pub fn new(array: &PvSystemConfig) -> ForecastResult<Self> {
        if !array.model.eq_ignore_ascii_case("pvwatts") {
            return Err(ForecastError::config(format!(
                "PV model '{}' is not supported",
                array.model
            )));
        }
        let mut clearsky = ClearSky::new(array.clearsky_model, array.altitude);
        clearsky.linke_turbidity = array.linke_turbidity;
        Ok(Self {
            array: array.clone(),
            clearsky,
            temperature: array.temperature_model.params(),
            loss_factor: 1.0 - pvwatts::default_losses() / 100.0,
        })
    }

    pub fn suffix(&self) -> &str {
        &self.array.suffix
    }

    fn samples(&self, weather: &ForecastTable) -> Vec<Sample> {
        let site_pressure = irradiance::alt_to_pressure(self.array.altitude);
        let col = |name: &str| weather.column(name);
        let temp = col(TEMP_AIR);
        let wind = col(WIND_SPEED);
        let pressure = col(PRESSURE);
        let ghi = col(GHI);
        let clouds = col(CLOUDS);

        weather
            .index()
            .iter()
            .enumerate()
            .map(|(i, &time)| {
                let temp_air = temp.map_or(DEFAULT_TEMP_AIR, |v| v[i] - KELVIN_OFFSET);
                let p = pressure
                    .map(|v| v[i])
                    .filter(|p| p.is_finite())
                    .unwrap_or(crate::domain::weather::STANDARD_PRESSURE);
                let t_refr = if temp_air.is_finite() { temp_air } else { 12.0 };
                Sample {
                    time,
                    doy: time.ordinal(),
                    site: solar_position(
                        time,
                        self.array.latitude,
                        self.array.longitude,
                        Some(site_pressure),
                        None,
                    ),
                    weather: solar_position(
                        time,
                        self.array.latitude,
                        self.array.longitude,
                        Some(p),
                        Some(t_refr),
                    ),
                    pressure: p,
                    temp_air,
                    wind_speed: wind.map_or(DEFAULT_WIND_SPEED, |v| v[i]),
                    ghi: ghi.map_or(f64::NAN, |v| v[i]),
                    clouds: clouds.map_or(f64::NAN, |v| v[i]),
                }
            })
            .collect()
    }

    /// Horizontal irradiance and optional clearness index for one sample
    fn irradiance(&self, s: &Sample, model: IrradianceModel) -> (Irradiance, Option<f64>) {
        match model {
            IrradianceModel::Disc => {
                let d = disc(s.ghi, s.weather.zenith, s.doy, Some(s.pressure));
                let dhi = s.ghi - d.dni * s.weather.zenith.to_radians().cos();
                (
                    Irradiance {
                        ghi: s.ghi,
                        dni: d.dni,
                        dhi,
                    },
                    Some(d.kt),
                )
            }
            IrradianceModel::Erbs => {
                let d = erbs(s.ghi, s.weather.zenith, s.doy);
                (
                    Irradiance {
                        ghi: s.ghi,
                        dni: d.dni,
                        dhi: d.dhi,
                    },
                    Some(d.kt),
                )
            }
            IrradianceModel::Clearsky => (self.clearsky.irradiance(&s.site, s.doy), None),
            IrradianceModel::ClearskyScaling => {
                let clear = ineichen(
                    s.site.apparent_zenith,
                    s.doy,
                    self.array.altitude,
                    DEFAULT_LINKE_TURBIDITY,
                );
                (
                    clearsky_scaling(s.clouds, clear.ghi, s.site.zenith, s.doy),
                    None,
                )
            }
            IrradianceModel::CampbellNorman => (
                campbell_norman(s.clouds, s.site.apparent_zenith, s.doy),
                None,
            ),
        }
    }

    /// DC and AC power (W) for given horizontal irradiance
    fn power(&self, s: &Sample, irr: Irradiance) -> (f64, f64) {
        let pos = &s.site;
        let poa = poa_irradiance(
            self.array.tilt,
            self.array.azimuth,
            irr,
            extra_radiation(s.doy),
            pos.apparent_zenith,
            pos.azimuth,
            self.array.albedo,
        );
        let angle = aoi(
            self.array.tilt,
            self.array.azimuth,
            pos.apparent_zenith,
            pos.azimuth,
        );
        let effective = poa.direct * iam_physical(angle) + poa.diffuse;
        let temp_cell = pvwatts::sapm_cell(poa.global, s.temp_air, s.wind_speed, self.temperature);
        let dc = pvwatts::pvwatts_dc(
            effective,
            temp_cell,
            self.array.system_power,
            self.array.temperature_coeff,
        ) * self.loss_factor;
        let ac = pvwatts::pvwatts_ac(
            dc,
            self.array.inverter_power,
            self.array.nominal_efficiency,
        );
        (dc, ac)
    }

    fn simulate(&self, samples: &[Sample], model: IrradianceModel) -> ForecastResult<ForecastTable> {
        let mut dc = Vec::with_capacity(samples.len());
        let mut ac = Vec::with_capacity(samples.len());
        let mut ghi = Vec::with_capacity(samples.len());
        let mut dni = Vec::with_capacity(samples.len());
        let mut dhi = Vec::with_capacity(samples.len());
        let mut kt = Vec::with_capacity(samples.len());

        for s in samples {
            let (irr, k) = self.irradiance(s, model);
            let (p_dc, p_ac) = self.power(s, irr);
            dc.push(p_dc);
            ac.push(p_ac);
            ghi.push(irr.ghi);
            dni.push(irr.dni);
            dhi.push(irr.dhi);
            kt.push(k.unwrap_or(f64::NAN));
        }

        let mut table = ForecastTable::new(samples.iter().map(|s| s.time).collect());
        table.insert(&format!("dc_{model}"), dc)?;
        table.insert(&format!("ac_{model}"), ac)?;
        table.insert(&format!("ghi_{model}"), ghi)?;
        table.insert(&format!("dni_{model}"), dni)?;
        table.insert(&format!("dhi_{model}"), dhi)?;
        if model.needs_ghi() {
            table.insert(&format!("kt_{model}"), kt)?;
        }
        Ok(table)
    }

    /// Run a single irradiance model: `dc_m, ac_m, ghi_m, dni_m, dhi_m` (+ `kt_m`)
    pub fn run_model(
        &self,
        weather: &ForecastTable,
        model: IrradianceModel,
    ) -> ForecastResult<ForecastTable> {
        if model.needs_ghi() && !weather.has(GHI) {
            return Err(ForecastError::model(format!(
                "weather has no '{GHI}' column, use a cloud based model instead of '{model}'"
            )));
        }
        if model.needs_clouds() && !weather.has(CLOUDS) {
            return Err(ForecastError::model(format!(
                "weather has no '{CLOUDS}' column required by '{model}'"
            )));
        }
        self.simulate(&self.samples(weather), model)
    }

    /// Run every model supported by the weather columns and selected in `models`.
    ///
    /// Adds `zenith`; input-derived `ghi_*` columns are dropped.
    pub fn run_all_models(
        &self,
        weather: &ForecastTable,
        models: &ModelSelection,
    ) -> ForecastResult<ForecastTable> {
        let mut candidates = Vec::new();
        if weather.has(GHI) {
            candidates.extend([IrradianceModel::Disc, IrradianceModel::Erbs]);
        }
        if weather.has(CLOUDS) {
            candidates.extend([
                IrradianceModel::ClearskyScaling,
                IrradianceModel::CampbellNorman,
            ]);
        }
        candidates.push(IrradianceModel::Clearsky);

        let samples = self.samples(weather);
        let mut out = ForecastTable::new(weather.index().to_vec());
        for model in candidates.into_iter().filter(|m| models.includes(*m)) {
            debug!(model = %model, suffix = %self.array.suffix, "running irradiance model");
            out.merge(&self.simulate(&samples, model)?)?;
        }
        out.insert(ZENITH, samples.iter().map(|s| s.site.zenith).collect())?;
        out.retain(|c| {
            !c.contains("ghi") || c.starts_with("ghi_clearsky") || c.starts_with("ghi_campbell")
        });
        Ok(out)
    }

    /// Run the lead array and all followers, aggregated per the lead's `storage`
    pub fn run_split_array(
        &self,
        weather: &ForecastTable,
        models: &ModelSelection,
    ) -> ForecastResult<PvOutput> {
        let mut table = self.run_all_models(weather, models)?;
        let output: Vec<String> = table
            .names()
            .into_iter()
            .filter(|c| c.starts_with("dc_") || c.starts_with("ac_"))
            .collect();

        if !self.array.followers.is_empty() {
            let storage = self.array.storage;
            let lead_suffix = format!("_{}", self.array.suffix);
            match storage {
                SplitStorage::Individual => {
                    for c in &output {
                        table.rename(c, &format!("{c}{lead_suffix}"));
                    }
                }
                SplitStorage::Both => {
                    for c in &output {
                        let values = table.column(c).map(<[f64]>::to_vec).unwrap_or_default();
                        table.insert(&format!("{c}{lead_suffix}"), values)?;
                    }
                }
                SplitStorage::Sum => {}
            }

            for follower in &self.array.followers {
                let pv = PvModel::new(&self.array.follower(follower))?;
                let result = pv.run_all_models(weather, models)?;
                if matches!(storage, SplitStorage::Sum | SplitStorage::Both) {
                    table.add_columns(&result, &output)?;
                }
                if matches!(storage, SplitStorage::Individual | SplitStorage::Both) {
                    for c in &output {
                        let values = result
                            .column(c)
                            .ok_or_else(|| ForecastError::model(format!("missing column '{c}'")))?
                            .to_vec();
                        table.insert(&format!("{c}_{}", follower.suffix), values)?;
                    }
                }
            }
        }

        let influx_fields = table
            .names()
            .into_iter()
            .filter(|c| c.starts_with("dc_"))
            .collect();
        Ok(PvOutput {
            table,
            influx_fields,
        })
    }
}
