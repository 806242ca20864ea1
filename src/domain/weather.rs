//! Standardized weather column names shared by all providers.
//!
//! Providers rename and convert their native fields to these before the PV
//! model sees the data.

/// Air temperature [K]
pub const TEMP_AIR: &str = "temp_air";
/// Dew point temperature [K]
pub const TEMP_DEW: &str = "temp_dew";
/// Surface pressure [Pa]
pub const PRESSURE: &str = "pressure";
/// Wind speed [m/s]
pub const WIND_SPEED: &str = "wind_speed";
/// Effective cloud cover [%]
pub const CLOUDS: &str = "clouds";
/// Global horizontal irradiance, hourly mean [W/m²]
pub const GHI: &str = "ghi";
/// Clearness index [0..1]
pub const KT: &str = "kt";
/// Solar zenith angle [deg]
pub const ZENITH: &str = "zenith";

pub const KELVIN_OFFSET: f64 = 273.15;
/// kJ/m² over one hour to Wh/m²
pub const KJ_TO_WH: f64 = 0.277_777_8;
pub const STANDARD_PRESSURE: f64 = 101_325.0;
