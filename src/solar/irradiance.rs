//! # Irradiance Models
//!
//! Pointwise irradiance helpers used by the PV model:
//! - extraterrestrial radiation and airmass
//! - GHI decomposition into DNI/DHI (DISC, Erbs)
//! - cloud cover to irradiance (clear-sky scaling, Campbell-Norman)
//! - plane-of-array transposition (Hay-Davies) and incidence angle modifier

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

const DEG: f64 = std::f64::consts::PI / 180.0;

/// Solar constant used for extraterrestrial radiation (W/m²)
pub const SOLAR_CONSTANT: f64 = 1366.1;

/// Solar constant the DISC regression was fitted with (W/m²)
pub const DISC_SOLAR_CONSTANT: f64 = 1370.0;

/// Horizontal irradiance components (W/m²)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Irradiance {
    pub ghi: f64,
    pub dni: f64,
    pub dhi: f64,
}

/// Result of a GHI decomposition
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decomposition {
    pub dni: f64,
    pub dhi: f64,
    pub kt: f64,
}

/// Plane-of-array irradiance (W/m²)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PoaIrradiance {
    pub global: f64,
    pub direct: f64,
    pub diffuse: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum AirmassModel {
    Simple,
    Kasten1966,
    KastenYoung1989,
}

/// Extraterrestrial normal irradiance for a day of year (Spencer 1971)
pub fn extra_radiation(day_of_year: u32) -> f64 {
    extra_radiation_with(day_of_year, SOLAR_CONSTANT)
}

pub fn extra_radiation_with(day_of_year: u32, solar_constant: f64) -> f64 {
    let b = 2.0 * std::f64::consts::PI / 365.0 * (f64::from(day_of_year) - 1.0);
    let r_sq = 1.00011
        + 0.034221 * b.cos()
        + 0.00128 * b.sin()
        + 0.000719 * (2.0 * b).cos()
        + 0.000077 * (2.0 * b).sin();
    solar_constant * r_sq
}

/// Relative (not pressure corrected) airmass; NaN below the horizon
pub fn relative_airmass(zenith: f64, model: AirmassModel) -> f64 {
    if zenith > 90.0 {
        return f64::NAN;
    }
    let cz = (zenith * DEG).cos();
    match model {
        AirmassModel::Simple => 1.0 / cz,
        AirmassModel::Kasten1966 => 1.0 / (cz + 0.15 * (93.885 - zenith).powf(-1.253)),
        AirmassModel::KastenYoung1989 => 1.0 / (cz + 0.50572 * (96.07995 - zenith).powf(-1.6364)),
    }
}

pub fn absolute_airmass(relative: f64, pressure: f64) -> f64 {
    relative * pressure / 101_325.0
}

/// Standard atmosphere pressure (Pa) at an altitude (m)
pub fn alt_to_pressure(altitude: f64) -> f64 {
    100.0 * ((44331.514 - altitude) / 11880.516).powf(1.0 / 0.1902632)
}

/// Clearness index kt, clipped to [0, 1]; NaN when `ghi` is missing
pub fn clearness_index(ghi: f64, zenith: f64, dni_extra: f64) -> f64 {
    let cos_z = (zenith * DEG).cos().max(0.065);
    let kt = ghi / (dni_extra * cos_z);
    if kt.is_nan() {
        f64::NAN
    } else {
        kt.clamp(0.0, 1.0)
    }
}

/// DISC model (Maxwell 1987): DNI from GHI.
///
/// `pressure` in Pa; when absent the relative airmass is used. A missing
/// (NaN) `ghi` yields NaN `dni`, `dhi` and `kt` while the sun is up.
pub fn disc(ghi: f64, zenith: f64, day_of_year: u32, pressure: Option<f64>) -> Decomposition {
    let i0 = extra_radiation_with(day_of_year, DISC_SOLAR_CONSTANT);
    let kt = clearness_index(ghi, zenith, i0);

    let mut am = relative_airmass(zenith, AirmassModel::Kasten1966);
    if let Some(p) = pressure {
        am = absolute_airmass(am, p);
    }
    let am = am.min(12.0);

    let kt2 = kt * kt;
    let kt3 = kt2 * kt;
    let (a, b, c) = if kt <= 0.6 {
        (
            0.512 - 1.56 * kt + 2.286 * kt2 - 2.222 * kt3,
            0.37 + 0.962 * kt,
            -0.28 + 0.932 * kt - 2.048 * kt2,
        )
    } else {
        (
            -5.743 + 21.77 * kt - 27.49 * kt2 + 11.56 * kt3,
            41.4 - 118.5 * kt + 66.05 * kt2 + 31.9 * kt3,
            -47.01 + 184.2 * kt - 222.0 * kt2 + 73.81 * kt3,
        )
    };
    let delta_kn = a + b * (c * am).exp();
    let knc = 0.866 - 0.122 * am + 0.0121 * am.powi(2) - 0.000653 * am.powi(3)
        + 1.4e-05 * am.powi(4);
    let mut dni = (knc - delta_kn) * i0;

    if zenith > 87.0 || ghi < 0.0 || dni < 0.0 {
        dni = 0.0;
    }
    let dhi = ghi - dni * (zenith * DEG).cos();
    Decomposition { dni, dhi, kt }
}

/// Erbs diffuse fraction model
pub fn erbs(ghi: f64, zenith: f64, day_of_year: u32) -> Decomposition {
    let i0 = extra_radiation(day_of_year);
    let kt = clearness_index(ghi, zenith, i0);

    // NaN kt falls through to the first branch and stays NaN
    let df = if kt > 0.8 {
        0.165
    } else if kt > 0.22 {
        0.9511 - 0.1604 * kt + 4.388 * kt.powi(2) - 16.638 * kt.powi(3) + 12.336 * kt.powi(4)
    } else {
        1.0 - 0.09 * kt
    };
    let mut dhi = df * ghi;
    let mut dni = (ghi - dhi) / (zenith * DEG).cos();

    if zenith > 87.0 || ghi < 0.0 || dni < 0.0 {
        dni = 0.0;
        dhi = ghi;
    }
    Decomposition { dni, dhi, kt }
}

/// Linear cloud cover to GHI (Larson 2016); 100 % cloud leaves `offset` % of clear sky
pub fn cloud_cover_to_ghi_linear(cloud_cover: f64, ghi_clear: f64, offset: f64) -> f64 {
    let offset = offset / 100.0;
    let cc = cloud_cover / 100.0;
    (offset + (1.0 - offset) * (1.0 - cc)) * ghi_clear
}

/// Linear cloud cover to atmospheric transmittance; 0 % cloud gives `offset`
pub fn cloud_cover_to_transmittance_linear(cloud_cover: f64, offset: f64) -> f64 {
    ((100.0 - cloud_cover) / 100.0) * offset
}

/// Clear-sky scaling: scale clear-sky GHI by cloud cover, split with DISC
pub fn clearsky_scaling(cloud_cover: f64, ghi_clear: f64, zenith: f64, day_of_year: u32) -> Irradiance {
    let ghi = cloud_cover_to_ghi_linear(cloud_cover, ghi_clear, 35.0);
    let dni = disc(ghi, zenith, day_of_year, None).dni;
    let dhi = ghi - dni * (zenith * DEG).cos();
    fill_nan(Irradiance { ghi, dni, dhi })
}

/// Campbell-Norman irradiance from cloud cover
pub fn campbell_norman(cloud_cover: f64, apparent_zenith: f64, day_of_year: u32) -> Irradiance {
    let tau = cloud_cover_to_transmittance_linear(cloud_cover, 0.75);
    let dni_extra = extra_radiation(day_of_year);
    let am = absolute_airmass(
        relative_airmass(apparent_zenith, AirmassModel::Simple),
        101_325.0,
    );
    let dni = dni_extra * tau.powf(am);
    let cos_zen = (apparent_zenith * DEG).cos();
    let dhi = 0.3 * (1.0 - tau.powf(am)) * dni_extra * cos_zen;
    let ghi = dhi + dni * cos_zen;
    fill_nan(Irradiance { ghi, dni, dhi })
}

fn fill_nan(irr: Irradiance) -> Irradiance {
    let f = |v: f64| if v.is_nan() { 0.0 } else { v };
    Irradiance {
        ghi: f(irr.ghi),
        dni: f(irr.dni),
        dhi: f(irr.dhi),
    }
}

/// Cosine of the angle of incidence on a tilted surface, clipped to [-1, 1]
pub fn aoi_projection(surface_tilt: f64, surface_azimuth: f64, zenith: f64, azimuth: f64) -> f64 {
    let proj = (surface_tilt * DEG).cos() * (zenith * DEG).cos()
        + (surface_tilt * DEG).sin() * (zenith * DEG).sin() * ((azimuth - surface_azimuth) * DEG).cos();
    proj.clamp(-1.0, 1.0)
}

/// Angle of incidence (deg)
pub fn aoi(surface_tilt: f64, surface_azimuth: f64, zenith: f64, azimuth: f64) -> f64 {
    aoi_projection(surface_tilt, surface_azimuth, zenith, azimuth).acos() / DEG
}

/// Hay-Davies sky diffuse irradiance on a tilted surface
pub fn haydavies(
    surface_tilt: f64,
    surface_azimuth: f64,
    dhi: f64,
    dni: f64,
    dni_extra: f64,
    zenith: f64,
    azimuth: f64,
) -> f64 {
    let cos_tt = aoi_projection(surface_tilt, surface_azimuth, zenith, azimuth).max(0.0);
    let cos_zenith = (zenith * DEG).cos();
    let rb = cos_tt / cos_zenith.max(0.01745);
    let ai = dni / dni_extra;
    let isotropic = non_negative(dhi * (1.0 - ai) * 0.5 * (1.0 + (surface_tilt * DEG).cos()));
    let circumsolar = non_negative(dhi * ai * rb);
    isotropic + circumsolar
}

/// Clip negatives to zero, NaN passes through
fn non_negative(v: f64) -> f64 {
    if v < 0.0 {
        0.0
    } else {
        v
    }
}

/// Ground reflected irradiance with a fixed albedo
pub fn ground_diffuse(surface_tilt: f64, ghi: f64, albedo: f64) -> f64 {
    ghi * albedo * (1.0 - (surface_tilt * DEG).cos()) * 0.5
}

/// Plane-of-array irradiance from horizontal components
pub fn poa_irradiance(
    surface_tilt: f64,
    surface_azimuth: f64,
    irr: Irradiance,
    dni_extra: f64,
    zenith: f64,
    azimuth: f64,
    albedo: f64,
) -> PoaIrradiance {
    let angle = aoi(surface_tilt, surface_azimuth, zenith, azimuth);
    let direct = non_negative(irr.dni * (angle * DEG).cos());
    let sky = haydavies(surface_tilt, surface_azimuth, irr.dhi, irr.dni, dni_extra, zenith, azimuth);
    let ground = ground_diffuse(surface_tilt, irr.ghi, albedo);
    let diffuse = sky + ground;
    PoaIrradiance {
        global: direct + diffuse,
        direct,
        diffuse,
    }
}

/// Physical incidence angle modifier (De Soto 2006) for uncoated glass
pub fn iam_physical(aoi: f64) -> f64 {
    const N: f64 = 1.526;
    const K: f64 = 4.0;
    const L: f64 = 0.002;
    if aoi.abs() >= 90.0 {
        return 0.0;
    }
    let cos1 = (aoi * DEG).cos();
    let sin2 = (aoi * DEG).sin() / N;
    let cos2 = (1.0 - sin2 * sin2).sqrt();

    let rho_s = ((cos1 - N * cos2) / (cos1 + N * cos2)).powi(2);
    let rho_p = ((cos2 - N * cos1) / (cos2 + N * cos1)).powi(2);
    let rho_0 = ((1.0 - N) / (1.0 + N)).powi(2);

    let absorb = (-K * L / cos2).exp();
    let tau_s = (1.0 - rho_s) * absorb;
    let tau_p = (1.0 - rho_p) * absorb;
    let tau_0 = (1.0 - rho_0) * (-K * L).exp();

    ((tau_s + tau_p) / 2.0 / tau_0).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[test]
    fn test_extra_radiation_perihelion_aphelion() {
        // Earth is closest to the sun in early January
        assert!(extra_radiation(3) > 1400.0);
        assert!(extra_radiation(185) < 1330.0);
    }

    #[rstest]
    #[case(AirmassModel::Simple)]
    #[case(AirmassModel::Kasten1966)]
    #[case(AirmassModel::KastenYoung1989)]
    fn test_airmass_overhead_and_night(#[case] model: AirmassModel) {
        assert!((relative_airmass(0.0, model) - 1.0).abs() < 0.01);
        assert!(relative_airmass(60.0, model) > 1.9);
        assert!(relative_airmass(95.0, model).is_nan());
    }

    #[test]
    fn test_alt_to_pressure() {
        assert!((alt_to_pressure(0.0) - 101_325.0).abs() < 10.0);
        assert!(alt_to_pressure(1500.0) < 86_000.0);
    }

    #[test]
    fn test_disc_clear_day() {
        // ~ clear sky at 30 deg zenith
        let d = disc(850.0, 30.0, 172, Some(101_325.0));
        assert!(d.dni > 700.0 && d.dni < 1000.0, "dni {}", d.dni);
        assert!(d.dhi > 0.0);
        assert!(d.kt > 0.6);
    }

    #[test]
    fn test_disc_overcast_is_diffuse() {
        let d = disc(80.0, 50.0, 172, None);
        assert!(d.dni < 5.0, "dni {}", d.dni);
        assert!((d.dhi - 80.0).abs() < 5.0);
    }

    #[test]
    fn test_decomposition_high_zenith() {
        assert_eq!(disc(20.0, 88.0, 172, None).dni, 0.0);
        let e = erbs(20.0, 88.0, 172);
        assert_eq!(e.dni, 0.0);
        assert_eq!(e.dhi, 20.0);
    }

    #[test]
    fn test_missing_ghi_stays_missing() {
        let d = disc(f64::NAN, 30.0, 172, None);
        assert!(d.dni.is_nan(), "dni {}", d.dni);
        assert!(d.dhi.is_nan());
        assert!(d.kt.is_nan());

        let e = erbs(f64::NAN, 30.0, 172);
        assert!(e.dni.is_nan() && e.dhi.is_nan() && e.kt.is_nan());

        // night stays zero even without a measurement
        assert_eq!(disc(f64::NAN, 95.0, 172, None).dni, 0.0);

        let irr = Irradiance {
            ghi: f64::NAN,
            dni: d.dni,
            dhi: d.dhi,
        };
        let poa = poa_irradiance(30.0, 180.0, irr, SOLAR_CONSTANT, 30.0, 180.0, 0.25);
        assert!(poa.global.is_nan() && poa.direct.is_nan());
    }

    #[test]
    fn test_disc_uses_its_own_solar_constant() {
        assert!((extra_radiation_with(80, DISC_SOLAR_CONSTANT) / extra_radiation(80)
            - DISC_SOLAR_CONSTANT / SOLAR_CONSTANT)
            .abs()
            < 1e-12);
        // kt reported by DISC is relative to 1370 W/m²
        let d = disc(600.0, 0.0, 80, None);
        let expected = 600.0 / extra_radiation_with(80, DISC_SOLAR_CONSTANT);
        assert!((d.kt - expected).abs() < 1e-12);
    }

    #[test]
    fn test_erbs_overcast_is_diffuse() {
        let e = erbs(60.0, 40.0, 100);
        assert!(e.kt <= 0.22);
        assert!(e.dhi / 60.0 > 0.97);
    }

    #[test]
    fn test_cloud_cover_linear() {
        assert_eq!(cloud_cover_to_ghi_linear(0.0, 800.0, 35.0), 800.0);
        assert!((cloud_cover_to_ghi_linear(100.0, 800.0, 35.0) - 280.0).abs() < 1e-9);
        assert_eq!(cloud_cover_to_transmittance_linear(0.0, 0.75), 0.75);
        assert_eq!(cloud_cover_to_transmittance_linear(100.0, 0.75), 0.0);
    }

    #[test]
    fn test_campbell_norman_night_is_zero() {
        let irr = campbell_norman(0.0, 100.0, 172);
        assert_eq!(irr, Irradiance::default());
    }

    #[test]
    fn test_poa_facing_sun() {
        let irr = Irradiance {
            ghi: 800.0,
            dni: 850.0,
            dhi: 100.0,
        };
        // surface normal pointing straight at the sun
        let poa = poa_irradiance(40.0, 180.0, irr, SOLAR_CONSTANT, 40.0, 180.0, 0.25);
        assert!((poa.direct - 850.0).abs() < 1e-3);
        assert!(poa.global > poa.direct);
        assert!(aoi(40.0, 180.0, 40.0, 180.0).abs() < 1e-3);
    }

    #[test]
    fn test_iam_physical() {
        assert!((iam_physical(0.0) - 1.0).abs() < 1e-9);
        assert!(iam_physical(60.0) < 1.0 && iam_physical(60.0) > 0.9);
        assert!(iam_physical(85.0) < iam_physical(60.0));
        assert_eq!(iam_physical(90.0), 0.0);
    }

    proptest! {
        #[test]
        fn prop_decompositions_non_negative(ghi in 0.0f64..1200.0, zenith in 0.0f64..95.0, doy in 1u32..366) {
            let d = disc(ghi, zenith, doy, Some(101_325.0));
            prop_assert!(d.dni >= 0.0);
            prop_assert!((0.0..=1.0).contains(&d.kt));
            let e = erbs(ghi, zenith, doy);
            prop_assert!(e.dni >= 0.0);
            prop_assert!(e.dhi >= 0.0);
        }

        #[test]
        fn prop_clearsky_scaling_monotone(cc in 0.0f64..100.0, ghi_clear in 0.0f64..1000.0) {
            let more = cloud_cover_to_ghi_linear((cc + 10.0).min(100.0), ghi_clear, 35.0);
            let less = cloud_cover_to_ghi_linear(cc, ghi_clear, 35.0);
            prop_assert!(more <= less + 1e-9);
        }
    }
}
