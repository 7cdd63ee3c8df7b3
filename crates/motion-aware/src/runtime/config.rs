use motion_core::{CaptureConfig, SimulatedCameraConfig, StepGateConfig};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{0} requires a value")]
    MissingValue(&'static str),
    #[error("invalid value {value:?} for {flag}")]
    InvalidValue { flag: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub show_help: bool,
    pub run_seconds: Option<u64>,
    pub json_logs: bool,
    pub log_dir: Option<PathBuf>,
    pub metrics_addr: Option<String>,
    pub capture_interval_ms: u64,
    pub capture_latency_ms: u64,
    pub tilt_window_ms: u64,
    pub step_cadence_ms: u64,
    pub fail_front_every: Option<u64>,
    pub fail_back_every: Option<u64>,
    pub camera_enabled: bool,
    pub tilt_enabled: bool,
    pub pulse_script: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            show_help: false,
            run_seconds: None,
            json_logs: false,
            log_dir: None,
            metrics_addr: None,
            capture_interval_ms: 500,
            capture_latency_ms: 25,
            tilt_window_ms: 2000,
            step_cadence_ms: 550,
            fail_front_every: None,
            fail_back_every: None,
            camera_enabled: true,
            tilt_enabled: true,
            pulse_script: None,
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let args: Vec<String> = std::env::args().collect();
        Self::from_args(&args)
    }

    pub fn from_args(args: &[String]) -> Result<Self, ConfigError> {
        let mut cfg = RuntimeConfig::default();
        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--run-seconds" => {
                    cfg.run_seconds = Some(parse_u64(args, &mut i, "--run-seconds")?);
                }
                "--json-logs" => {
                    cfg.json_logs = true;
                }
                "--log-dir" => {
                    cfg.log_dir = Some(PathBuf::from(value(args, &mut i, "--log-dir")?));
                }
                "--metrics-addr" => {
                    cfg.metrics_addr = Some(value(args, &mut i, "--metrics-addr")?.to_string());
                }
                "--capture-interval-ms" => {
                    cfg.capture_interval_ms = parse_u64(args, &mut i, "--capture-interval-ms")?;
                }
                "--capture-latency-ms" => {
                    cfg.capture_latency_ms = parse_u64(args, &mut i, "--capture-latency-ms")?;
                }
                "--tilt-window-ms" => {
                    cfg.tilt_window_ms = parse_u64(args, &mut i, "--tilt-window-ms")?;
                }
                "--step-cadence-ms" => {
                    cfg.step_cadence_ms = parse_u64(args, &mut i, "--step-cadence-ms")?;
                }
                "--fail-front-every" => {
                    cfg.fail_front_every = Some(parse_u64(args, &mut i, "--fail-front-every")?);
                }
                "--fail-back-every" => {
                    cfg.fail_back_every = Some(parse_u64(args, &mut i, "--fail-back-every")?);
                }
                "--no-camera" => {
                    cfg.camera_enabled = false;
                }
                "--no-tilt" => {
                    cfg.tilt_enabled = false;
                }
                "--pulse-script" => {
                    cfg.pulse_script = Some(PathBuf::from(value(args, &mut i, "--pulse-script")?));
                }
                "--help" | "-h" => {
                    cfg.show_help = true;
                    break;
                }
                _ => {}
            }
            i += 1;
        }
        Ok(cfg)
    }

    pub fn step_gate_config(&self) -> StepGateConfig {
        StepGateConfig {
            tilt_window: Duration::from_millis(self.tilt_window_ms),
        }
    }

    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            interval: Duration::from_millis(self.capture_interval_ms),
        }
    }

    pub fn camera_config(&self) -> SimulatedCameraConfig {
        SimulatedCameraConfig {
            latency: Duration::from_millis(self.capture_latency_ms),
            fail_front_every: self.fail_front_every,
            fail_back_every: self.fail_back_every,
            ..Default::default()
        }
    }

    pub fn print_help() {
        println!(
            r#"motion-aware - Tilt-gated step counting with interval dual-camera capture

USAGE:
    motion-aware [OPTIONS]

OPTIONS:
    --run-seconds <SECS>          Run for a fixed duration then exit
    --json-logs                   Output logs in JSON format (for log aggregation)
    --log-dir <PATH>              Also write JSON logs to a daily-rolling file in PATH
    --metrics-addr <ADDR>         Enable Prometheus metrics server on address (e.g., 0.0.0.0:9090)
    --capture-interval-ms <MS>    Delay between the end of one capture cycle and the next tick [default: 500]
    --capture-latency-ms <MS>     Simulated per-lens capture latency [default: 25]
    --tilt-window-ms <MS>         Step suppression window after each tilt [default: 2000]
    --step-cadence-ms <MS>        Step spacing of the built-in walk script [default: 550]
    --fail-front-every <N>        Simulate a fault on every Nth front capture
    --fail-back-every <N>         Simulate a fault on every Nth back capture
    --no-camera                   Disable interval capture
    --no-tilt                     Do not subscribe to tilt pulses (every step is accepted)
    --pulse-script <PATH>         Replay pulses from a JSON script instead of the built-in walk
    -h, --help                    Print this help message

ENVIRONMENT VARIABLES:
    RUST_LOG                      Set log filter (e.g., RUST_LOG=debug,motion_core=trace)

EXAMPLES:
    # Short run with metrics
    motion-aware --run-seconds 10 --metrics-addr 0.0.0.0:9090

    # Replay a recorded walk with a flaky back camera
    motion-aware --pulse-script walk.json --fail-back-every 4 --run-seconds 30
"#
        );
    }
}

fn value<'a>(args: &'a [String], i: &mut usize, flag: &'static str) -> Result<&'a str, ConfigError> {
    if *i + 1 < args.len() {
        *i += 1;
        Ok(args[*i].as_str())
    } else {
        Err(ConfigError::MissingValue(flag))
    }
}

fn parse_u64(args: &[String], i: &mut usize, flag: &'static str) -> Result<u64, ConfigError> {
    let raw = value(args, i, flag)?;
    raw.parse().map_err(|_| ConfigError::InvalidValue {
        flag,
        value: raw.to_string(),
    })
}
