pub mod dwd;
pub mod fixtures;
pub mod solcast;
pub mod weather_apis;
