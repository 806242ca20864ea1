//! Solar geometry, clear-sky and irradiance models.

pub mod clearsky;
pub mod irradiance;
pub mod position;

pub use clearsky::{ClearSky, ClearSkyModel};
pub use irradiance::{Irradiance, PoaIrradiance};
pub use position::{sun_times, solar_position, Daylight, SolarPosition};
