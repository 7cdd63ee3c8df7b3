pub mod app;
pub mod config;
pub mod logging;
pub mod telemetry;

pub use app::run_from_args;
