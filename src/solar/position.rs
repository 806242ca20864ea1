//! # Solar Position
//!
//! NOAA general solar position algorithm: zenith, refraction-corrected
//! apparent zenith and azimuth for a UTC instant, plus sunrise/sunset.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

const DEG: f64 = std::f64::consts::PI / 180.0;

/// Sun position for an instant and observer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolarPosition {
    /// True zenith angle (deg)
    pub zenith: f64,
    /// Zenith corrected for atmospheric refraction (deg)
    pub apparent_zenith: f64,
    /// Azimuth, clockwise from north (deg)
    pub azimuth: f64,
}

impl SolarPosition {
    pub fn elevation(&self) -> f64 {
        90.0 - self.zenith
    }

    pub fn apparent_elevation(&self) -> f64 {
        90.0 - self.apparent_zenith
    }

    pub fn is_up(&self) -> bool {
        self.apparent_zenith < 90.0
    }
}

/// Orbital quantities shared by position and sunrise computations
struct SunEphemeris {
    /// Declination (deg)
    declination: f64,
    /// Equation of time (minutes)
    eq_of_time: f64,
}

fn ephemeris(t: DateTime<Utc>) -> SunEphemeris {
    let jd = t.timestamp() as f64 / 86_400.0
        + f64::from(t.timestamp_subsec_millis()) / 86_400_000.0
        + 2_440_587.5;
    let jc = (jd - 2_451_545.0) / 36_525.0;

    let mean_long = (280.46646 + jc * (36000.76983 + jc * 0.0003032)).rem_euclid(360.0);
    let mean_anom = 357.52911 + jc * (35999.05029 - 0.0001537 * jc);
    let ecc = 0.016708634 - jc * (0.000042037 + 0.0000001267 * jc);

    let m = mean_anom * DEG;
    let eq_ctr = m.sin() * (1.914602 - jc * (0.004817 + 0.000014 * jc))
        + (2.0 * m).sin() * (0.019993 - 0.000101 * jc)
        + (3.0 * m).sin() * 0.000289;
    let true_long = mean_long + eq_ctr;
    let omega = (125.04 - 1934.136 * jc) * DEG;
    let app_long = true_long - 0.00569 - 0.00478 * omega.sin();

    let mean_obliq =
        23.0 + (26.0 + (21.448 - jc * (46.815 + jc * (0.00059 - jc * 0.001813))) / 60.0) / 60.0;
    let obliq = mean_obliq + 0.00256 * omega.cos();

    let declination = ((obliq * DEG).sin() * (app_long * DEG).sin()).asin() / DEG;

    let y = ((obliq / 2.0) * DEG).tan().powi(2);
    let l0 = mean_long * DEG;
    let eq_of_time = 4.0
        * (y * (2.0 * l0).sin() - 2.0 * ecc * m.sin()
            + 4.0 * ecc * y * m.sin() * (2.0 * l0).cos()
            - 0.5 * y * y * (4.0 * l0).sin()
            - 1.25 * ecc * ecc * (2.0 * m).sin())
        / DEG;

    SunEphemeris {
        declination,
        eq_of_time,
    }
}

/// Atmospheric refraction (deg) for a true elevation, scaled by pressure [Pa] and temperature [°C]
pub fn refraction(elevation: f64, pressure: f64, temperature: f64) -> f64 {
    let te = (elevation * DEG).tan();
    let arcsec = if elevation > 85.0 {
        0.0
    } else if elevation > 5.0 {
        58.1 / te - 0.07 / te.powi(3) + 0.000086 / te.powi(5)
    } else if elevation > -0.575 {
        1735.0 + elevation * (-518.2 + elevation * (103.4 + elevation * (-12.79 + elevation * 0.711)))
    } else {
        -20.772 / te
    };
    arcsec / 3600.0 * (pressure / 101_325.0) * (283.0 / (273.0 + temperature))
}

/// Solar position for a UTC instant.
///
/// `pressure` [Pa] and `temperature` [°C] only affect refraction and
/// default to a standard atmosphere at 12 °C.
pub fn solar_position(
    t: DateTime<Utc>,
    latitude: f64,
    longitude: f64,
    pressure: Option<f64>,
    temperature: Option<f64>,
) -> SolarPosition {
    let eph = ephemeris(t);
    let minutes = f64::from(t.hour()) * 60.0
        + f64::from(t.minute())
        + f64::from(t.second()) / 60.0;
    let true_solar_time = (minutes + eph.eq_of_time + 4.0 * longitude).rem_euclid(1440.0);
    let hour_angle = true_solar_time / 4.0 - 180.0;

    let lat = latitude * DEG;
    let decl = eph.declination * DEG;
    let cos_zen = (lat.sin() * decl.sin() + lat.cos() * decl.cos() * (hour_angle * DEG).cos())
        .clamp(-1.0, 1.0);
    let zenith = cos_zen.acos() / DEG;

    let denom = lat.cos() * (zenith * DEG).sin();
    let azimuth = if denom.abs() < 1e-12 {
        180.0
    } else {
        let a = (((lat.sin() * cos_zen) - decl.sin()) / denom).clamp(-1.0, 1.0).acos() / DEG;
        if hour_angle > 0.0 {
            (a + 180.0).rem_euclid(360.0)
        } else {
            (540.0 - a).rem_euclid(360.0)
        }
    };

    let refr = refraction(
        90.0 - zenith,
        pressure.unwrap_or(101_325.0),
        temperature.unwrap_or(12.0),
    );

    SolarPosition {
        zenith,
        apparent_zenith: zenith - refr,
        azimuth,
    }
}

/// Daylight window of one UTC date
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Daylight {
    pub sunrise: DateTime<Utc>,
    pub sunset: DateTime<Utc>,
}

impl Daylight {
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        t > self.sunrise && t < self.sunset
    }

    /// Length of the day in minutes
    pub fn day_minutes(&self) -> f64 {
        (self.sunset - self.sunrise).num_seconds() as f64 / 60.0
    }
}

/// Sunrise and sunset (UTC) for a date.
///
/// Polar day spans the whole date; polar night collapses to solar noon.
pub fn sun_times(date: NaiveDate, latitude: f64, longitude: f64) -> Daylight {
    let midnight = Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN));
    let noon = midnight + Duration::hours(12);
    let eph = ephemeris(noon);

    let lat = latitude * DEG;
    let decl = eph.declination * DEG;
    let solar_noon = 720.0 - 4.0 * longitude - eph.eq_of_time;
    let arg = (90.833 * DEG).cos() / (lat.cos() * decl.cos()) - lat.tan() * decl.tan();

    let at = |minutes: f64| midnight + Duration::milliseconds((minutes * 60_000.0).round() as i64);

    if arg <= -1.0 {
        Daylight {
            sunrise: midnight,
            sunset: midnight + Duration::days(1),
        }
    } else if arg >= 1.0 {
        Daylight {
            sunrise: at(solar_noon),
            sunset: at(solar_noon),
        }
    } else {
        let ha = arg.acos() / DEG;
        Daylight {
            sunrise: at(solar_noon - 4.0 * ha),
            sunset: at(solar_noon + 4.0 * ha),
        }
    }
}
