use crate::runtime::config::{ConfigError, RuntimeConfig};
use crate::runtime::logging::init_tracing;
use crate::runtime::telemetry::{self, CaptureTelemetry, StepTelemetry};
use motion_core::{
    CaptureStats, Clock, ContextError, Dispatcher, GatedStepCounter, IntervalCaptureScheduler,
    LooperThread, Pulse, SignificantMotionTrigger, SimulatedCamera, SimulatedMotionSource,
    StepCounterSnapshot, TimeBase, TimerContext,
};
use motion_io::{replay, PulseScript, ScriptError};
use serde::Serialize;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info, warn};

/// Length of the built-in walk when no run duration is given.
const DEFAULT_WALK: Duration = Duration::from_secs(3600);

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Script(#[from] ScriptError),
    #[error(transparent)]
    Context(#[from] ContextError),
}

/// Printed to stdout as a single JSON line when the run ends.
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub elapsed_ms: u64,
    pub pulses_replayed: u64,
    pub significant_motion: bool,
    pub steps: StepCounterSnapshot,
    pub capture: Option<CaptureStats>,
}

pub fn run_from_args() -> ExitCode {
    let config = match RuntimeConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {err}");
            RuntimeConfig::print_help();
            return ExitCode::from(2);
        }
    };
    if config.show_help {
        RuntimeConfig::print_help();
        return ExitCode::SUCCESS;
    }

    match run(config) {
        Ok(summary) => match serde_json::to_string(&summary) {
            Ok(line) => {
                println!("{line}");
                ExitCode::SUCCESS
            }
            Err(err) => {
                eprintln!("error: failed to encode run summary: {err}");
                ExitCode::FAILURE
            }
        },
        Err(err) => {
            error!(error = %err, "motion-aware failed");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

pub fn run(config: RuntimeConfig) -> Result<RunSummary, AppError> {
    let _log_guard = init_tracing(config.json_logs, config.log_dir.as_deref());
    telemetry::init();
    let _metrics_handle = telemetry::start_metrics_server(&config.metrics_addr);

    let script = match &config.pulse_script {
        Some(path) => PulseScript::load(path)?,
        None => {
            let length = config
                .run_seconds
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_WALK);
            PulseScript::synthetic_walk(length, Duration::from_millis(config.step_cadence_ms))
        }
    };

    info!(
        capture_interval_ms = config.capture_interval_ms,
        tilt_window_ms = config.tilt_window_ms,
        camera = config.camera_enabled,
        tilt = config.tilt_enabled,
        pulses = script.pulses.len(),
        script_ms = script.duration_ms(),
        "Starting motion-aware"
    );

    let clock: Arc<dyn Clock> = Arc::new(TimeBase::new());
    let stop = Arc::new(AtomicBool::new(false));

    let sensors = Arc::new(SimulatedMotionSource::with_all_sensors());
    let counter = Arc::new(GatedStepCounter::new(
        Arc::clone(&sensors),
        config.step_gate_config(),
        Arc::clone(&clock),
    ));
    counter.set_listener(Some(Arc::new(StepTelemetry)));
    counter.start();
    if config.tilt_enabled {
        counter.start_tilt();
    }

    let significant_motion = Arc::new(AtomicBool::new(false));
    let trigger = SignificantMotionTrigger::new(Arc::clone(&sensors));
    {
        let seen = Arc::clone(&significant_motion);
        trigger.set_callback(Some(Arc::new(move |pulse: Pulse| {
            info!(timestamp_us = pulse.timestamp_us, "Walk started");
            seen.store(true, Ordering::Relaxed);
        })));
    }
    trigger.arm();

    let timer = TimerContext::new("cam-interval")?;
    let ui = Arc::new(LooperThread::spawn("ui-main")?);
    let scheduler = if config.camera_enabled {
        let camera = Arc::new(SimulatedCamera::new(config.camera_config())?);
        let ui_dispatcher: Arc<dyn Dispatcher> = ui.clone();
        let scheduler = Arc::new(IntervalCaptureScheduler::new(
            camera,
            ui_dispatcher,
            config.capture_config(),
            timer.handle(),
        ));
        scheduler.set_listener(Some(Arc::new(CaptureTelemetry)));
        scheduler.start();
        Some(scheduler)
    } else {
        info!("Camera disabled");
        None
    };
    let updater = telemetry::start_metrics_updater(Arc::clone(&counter), Arc::clone(&stop));

    let emit_source = Arc::clone(&sensors);
    let replay_handle = replay(
        script,
        Arc::clone(&clock),
        Arc::clone(&stop),
        move |pulse: Pulse| {
            emit_source.emit(pulse);
        },
    )?;

    let started = Instant::now();
    match config.run_seconds {
        Some(seconds) => {
            info!(seconds, "Running for fixed duration");
            thread::sleep(Duration::from_secs(seconds));
        }
        None => {
            info!("Running until Ctrl-C");
            if let Err(err) = timer.block_on(tokio::signal::ctrl_c()) {
                warn!(error = %err, "Failed to listen for Ctrl-C");
            }
        }
    }

    stop.store(true, Ordering::Relaxed);
    if let Some(scheduler) = &scheduler {
        scheduler.stop();
    }
    trigger.cancel();
    counter.stop_tilt();
    counter.stop();

    let pulses_replayed = match replay_handle.join() {
        Ok(count) => count,
        Err(_) => {
            warn!("Pulse replay thread panicked");
            0
        }
    };
    let _ = updater.join();
    ui.quit();

    let summary = RunSummary {
        elapsed_ms: started.elapsed().as_millis() as u64,
        pulses_replayed,
        significant_motion: significant_motion.load(Ordering::Relaxed),
        steps: counter.snapshot(),
        capture: scheduler.as_ref().map(|s| s.stats()),
    };

    info!(
        total_steps = summary.steps.total_step_events,
        accepted_steps = summary.steps.accepted_step_count,
        deliveries = summary.capture.as_ref().map(|c| c.deliveries),
        pulses = summary.pulses_replayed,
        "Run complete"
    );
    Ok(summary)
}
