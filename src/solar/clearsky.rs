//! Clear-sky irradiance models (Ineichen/Perez and simplified Solis)

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::irradiance::{
    absolute_airmass, alt_to_pressure, extra_radiation, relative_airmass, AirmassModel, Irradiance,
};
use super::position::SolarPosition;

const DEG: f64 = std::f64::consts::PI / 180.0;

/// Default Linke turbidity used by Ineichen when no climatology is available
pub const DEFAULT_LINKE_TURBIDITY: f64 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ClearSkyModel {
    Ineichen,
    SimplifiedSolis,
}

/// Clear-sky model bound to a site
#[derive(Debug, Clone, Copy)]
pub struct ClearSky {
    pub model: ClearSkyModel,
    /// Site altitude (m)
    pub altitude: f64,
    pub linke_turbidity: f64,
}

impl ClearSky {
    pub fn new(model: ClearSkyModel, altitude: f64) -> Self {
        Self {
            model,
            altitude,
            linke_turbidity: DEFAULT_LINKE_TURBIDITY,
        }
    }

    pub fn irradiance(&self, pos: &SolarPosition, day_of_year: u32) -> Irradiance {
        match self.model {
            ClearSkyModel::Ineichen => ineichen(
                pos.apparent_zenith,
                day_of_year,
                self.altitude,
                self.linke_turbidity,
            ),
            ClearSkyModel::SimplifiedSolis => simplified_solis(
                pos.apparent_elevation(),
                alt_to_pressure(self.altitude),
                0.1,
                1.0,
            ),
        }
    }
}

/// Ineichen and Perez clear-sky model with a constant Linke turbidity
pub fn ineichen(apparent_zenith: f64, day_of_year: u32, altitude: f64, linke_turbidity: f64) -> Irradiance {
    if apparent_zenith >= 90.0 {
        return Irradiance::default();
    }
    let tl = linke_turbidity;
    let dni_extra = extra_radiation(day_of_year);
    let am = absolute_airmass(
        relative_airmass(apparent_zenith, AirmassModel::KastenYoung1989),
        alt_to_pressure(altitude),
    );
    let cos_zenith = (apparent_zenith * DEG).cos().max(0.0);

    let fh1 = (-altitude / 8000.0).exp();
    let fh2 = (-altitude / 1250.0).exp();
    let cg1 = 5.09e-05 * altitude + 0.868;
    let cg2 = 3.92e-05 * altitude + 0.0387;

    let ghi = cg1 * dni_extra * cos_zenith * (-cg2 * am * (fh1 + fh2 * (tl - 1.0))).exp().max(0.0);

    let b = 0.664 + 0.163 / fh1;
    let bnci = dni_extra * (b * (-0.09 * am * (tl - 1.0)).exp()).max(0.0);
    let bnci_2 = (1.0 - (0.1 - 0.2 * (-tl).exp()) / (0.1 + 0.882 / fh1)) / cos_zenith;
    let bnci_2 = ghi * bnci_2.clamp(0.0, 1e20);

    let dni = bnci.min(bnci_2);
    let dhi = ghi - dni * cos_zenith;
    Irradiance { ghi, dni, dhi }
}

/// Simplified Solis clear-sky model (Ineichen 2008).
///
/// `pressure` in Pa, `precipitable_water` in cm.
pub fn simplified_solis(
    apparent_elevation: f64,
    pressure: f64,
    aod700: f64,
    precipitable_water: f64,
) -> Irradiance {
    if apparent_elevation <= 0.0 {
        return Irradiance::default();
    }
    const P0: f64 = 101_325.0;
    const DNI_EXTRA: f64 = 1364.0;

    let w = precipitable_water.max(0.2);
    let lw = w.ln();
    let lp = (pressure / P0).ln();
    let a = aod700;

    let i0p = DNI_EXTRA
        * ((0.12 * w.powf(0.56)) * a * a + (0.97 * w.powf(0.032)) * a + 1.08 * w.powf(0.0051)
            + 0.071 * lp);

    let taub = (1.82 + 0.056 * lw + 0.0071 * lw * lw) * a
        + (0.33 + 0.045 * lw + 0.0096 * lw * lw)
        + (0.0089 * w + 0.13) * lp;
    let b = (0.00925 * a * a + 0.0148 * a - 0.0172) * lw + (-0.7565 * a * a + 0.5057 * a + 0.4557);

    let taug = (1.24 + 0.047 * lw + 0.0061 * lw * lw) * a
        + (0.27 + 0.043 * lw + 0.0090 * lw * lw)
        + (0.0079 * w + 0.1) * lp;
    let g = -0.0147 * lw - 0.3079 * a * a + 0.2846 * a + 0.3798;

    let (td4, td3, td2, td1, td0, tdp) = if a < 0.05 {
        (
            86.0 * w - 13800.0,
            -3.11 * w + 79.4,
            -0.23 * w + 74.8,
            0.092 * w - 8.86,
            0.0042 * w + 3.12,
            -0.83 * (1.0 + a).powf(-17.2),
        )
    } else {
        (
            -0.21 * w + 11.6,
            0.27 * w - 20.7,
            -0.134 * w + 15.5,
            0.0554 * w - 5.71,
            0.0057 * w + 2.94,
            -0.71 * (1.0 + a).powf(-15.0),
        )
    };
    let taud = td4 * a.powi(4) + td3 * a.powi(3) + td2 * a * a + td1 * a + td0 + tdp * lp;
    let d = -0.337 * a * a + 0.63 * a + 0.116 + lp / (18.0 + 152.0 * a);

    let sin_elev = (apparent_elevation * DEG).sin().max(1e-30);
    let dni = i0p * (-taub / sin_elev.powf(b)).exp();
    let ghi = i0p * (-taug / sin_elev.powf(g)).exp() * sin_elev;
    let dhi = i0p * (-taud / sin_elev.powf(d)).exp();

    Irradiance { ghi, dni, dhi }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_ineichen_sea_level_noon() {
        let irr = ineichen(30.0, 172, 0.0, 3.0);
        assert!(irr.ghi > 750.0 && irr.ghi < 950.0, "ghi {}", irr.ghi);
        assert!(irr.dni > 700.0 && irr.dni < 950.0, "dni {}", irr.dni);
        assert!(irr.dhi > 0.0 && irr.dhi < 200.0, "dhi {}", irr.dhi);
    }

    #[test]
    fn test_ineichen_altitude_increases_irradiance() {
        let low = ineichen(40.0, 172, 0.0, 3.0);
        let high = ineichen(40.0, 172, 2000.0, 3.0);
        assert!(high.dni > low.dni);
    }

    #[test]
    fn test_simplified_solis_high_sun() {
        let irr = simplified_solis(60.0, 101_325.0, 0.1, 1.0);
        assert!(irr.ghi > 800.0 && irr.ghi < 1100.0, "ghi {}", irr.ghi);
        assert!(irr.dni > irr.dhi);
    }

    #[rstest]
    #[case(ClearSkyModel::Ineichen)]
    #[case(ClearSkyModel::SimplifiedSolis)]
    fn test_night_is_dark(#[case] model: ClearSkyModel) {
        let pos = SolarPosition {
            zenith: 110.0,
            apparent_zenith: 110.0,
            azimuth: 0.0,
        };
        let irr = ClearSky::new(model, 100.0).irradiance(&pos, 1);
        assert_eq!(irr, Irradiance::default());
    }

    #[test]
    fn test_model_names() {
        assert_eq!("simplified_solis".parse::<ClearSkyModel>().unwrap(), ClearSkyModel::SimplifiedSolis);
        assert_eq!(ClearSkyModel::Ineichen.to_string(), "ineichen");
    }
}
