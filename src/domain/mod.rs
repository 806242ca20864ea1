pub mod forecast;
pub mod table;
pub mod weather;

pub use forecast::*;
pub use table::*;
pub use weather::*;
