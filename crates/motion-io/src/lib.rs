pub mod metrics;
pub mod script;

pub use metrics::{init_metrics, record_capture_fault, render, serve_metrics};
pub use script::{replay, PulseScript, ScriptError, ScriptedPulse};
