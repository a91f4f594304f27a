pub mod config;
pub mod uploads;

pub use config::*;
pub use uploads::*;
