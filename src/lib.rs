pub mod config;
pub mod coverage;
pub mod error;
pub mod geo;
pub mod mission;
pub mod progress;
pub mod soak;
pub mod util;
pub mod vehicle;
