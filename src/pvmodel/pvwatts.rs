//! PVWatts DC/AC models and SAPM cell temperature

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Reference inverter efficiency of the PVWatts inverter model
pub const ETA_INV_REF: f64 = 0.9637;

/// Wiring (2 %) and connection (0.5 %) losses
pub const WIRING_LOSS: f64 = 2.0;
pub const CONNECTION_LOSS: f64 = 0.5;

/// SAPM temperature parameter sets
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TemperatureModel {
    #[default]
    OpenRackGlassGlass,
    CloseMountGlassGlass,
    OpenRackGlassPolymer,
    InsulatedBackGlassPolymer,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SapmParams {
    pub a: f64,
    pub b: f64,
    pub delta_t: f64,
}

impl TemperatureModel {
    pub fn params(&self) -> SapmParams {
        let (a, b, delta_t) = match self {
            Self::OpenRackGlassGlass => (-3.47, -0.0594, 3.0),
            Self::CloseMountGlassGlass => (-2.98, -0.0471, 1.0),
            Self::OpenRackGlassPolymer => (-3.56, -0.075, 3.0),
            Self::InsulatedBackGlassPolymer => (-2.81, -0.0455, 0.0),
        };
        SapmParams { a, b, delta_t }
    }
}

/// Cell temperature (°C) from POA global irradiance, ambient temperature (°C) and wind speed (m/s)
pub fn sapm_cell(poa_global: f64, temp_air: f64, wind_speed: f64, p: SapmParams) -> f64 {
    let module = poa_global * (p.a + p.b * wind_speed).exp() + temp_air;
    module + poa_global / 1000.0 * p.delta_t
}

/// DC power (W) before system losses
pub fn pvwatts_dc(effective_irradiance: f64, temp_cell: f64, pdc0: f64, gamma_pdc: f64) -> f64 {
    effective_irradiance / 1000.0 * pdc0 * (1.0 + gamma_pdc * (temp_cell - 25.0))
}

/// Combined system losses in percent
pub fn pvwatts_losses(losses: &[f64]) -> f64 {
    let remaining: f64 = losses.iter().map(|l| 1.0 - l / 100.0).product();
    100.0 * (1.0 - remaining)
}

/// Default wiring and connection losses in percent
pub fn default_losses() -> f64 {
    pvwatts_losses(&[WIRING_LOSS, CONNECTION_LOSS])
}

/// PVWatts inverter: AC power (W) for DC input `pdc`.
///
/// `pdc0` is the inverter DC rating; output clips at `eta_inv_nom * pdc0`.
pub fn pvwatts_ac(pdc: f64, pdc0: f64, eta_inv_nom: f64) -> f64 {
    if pdc.is_nan() {
        return f64::NAN;
    }
    if pdc <= 0.0 {
        return 0.0;
    }
    let pac0 = eta_inv_nom * pdc0;
    let zeta = pdc / pdc0;
    let eta = (eta_inv_nom / ETA_INV_REF * (-0.0162 * zeta - 0.0059 / zeta + 0.9858)).max(0.0);
    (eta * pdc).min(pac0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_sapm_cell_no_irradiance_is_ambient() {
        let p = TemperatureModel::OpenRackGlassGlass.params();
        assert_eq!(sapm_cell(0.0, 18.0, 3.0, p), 18.0);
    }

    #[test]
    fn test_sapm_cell_open_rack() {
        // 1000 W/m², 25 °C, 1 m/s: exp(-3.5294) * 1000 + 25 + 3
        let t = sapm_cell(1000.0, 25.0, 1.0, TemperatureModel::OpenRackGlassGlass.params());
        assert!((t - 57.31).abs() < 0.05, "cell temperature {t}");
    }

    #[test]
    fn test_insulated_back_runs_hotter() {
        let open = sapm_cell(800.0, 20.0, 2.0, TemperatureModel::OpenRackGlassGlass.params());
        let insulated = sapm_cell(
            800.0,
            20.0,
            2.0,
            TemperatureModel::InsulatedBackGlassPolymer.params(),
        );
        assert!(insulated > open);
    }

    #[test]
    fn test_pvwatts_dc_at_stc() {
        assert_eq!(pvwatts_dc(1000.0, 25.0, 5000.0, -0.005), 5000.0);
        assert!((pvwatts_dc(1000.0, 45.0, 5000.0, -0.005) - 4500.0).abs() < 1e-9);
    }

    #[test]
    fn test_default_losses() {
        assert!((default_losses() - 2.49).abs() < 1e-9);
    }

    #[test]
    fn test_pvwatts_ac_clips_and_zeroes() {
        assert_eq!(pvwatts_ac(0.0, 4000.0, 0.96), 0.0);
        assert_eq!(pvwatts_ac(-5.0, 4000.0, 0.96), 0.0);
        assert_eq!(pvwatts_ac(10_000.0, 4000.0, 0.96), 0.96 * 4000.0);
        assert!(pvwatts_ac(f64::NAN, 4000.0, 0.96).is_nan());
    }

    #[test]
    fn test_pvwatts_ac_nominal_point() {
        // at zeta = 1 efficiency equals eta_inv_nom
        let pac = pvwatts_ac(4000.0, 4000.0, 0.96);
        assert!((pac - 0.96 * 4000.0).abs() < 1.0, "pac {pac}");
    }

    #[test]
    fn test_temperature_model_names() {
        assert_eq!(
            "close_mount_glass_glass".parse::<TemperatureModel>().unwrap(),
            TemperatureModel::CloseMountGlassGlass
        );
    }

    proptest! {
        #[test]
        fn prop_ac_never_exceeds_dc_or_rating(pdc in 0.0f64..20_000.0) {
            let pac = pvwatts_ac(pdc, 5000.0, 0.96);
            prop_assert!(pac <= pdc + 1e-9);
            prop_assert!(pac <= 0.96 * 5000.0 + 1e-9);
            prop_assert!(pac >= 0.0);
        }
    }
}
