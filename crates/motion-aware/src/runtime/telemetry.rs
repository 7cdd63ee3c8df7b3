use motion_core::{
    CaptureFault, CaptureListener, GatedStepCounter, ImageBytes, Lens, MotionSource, StepEvent,
    StepListener,
};
use motion_io::metrics::{
    init_metrics, record_capture_fault, serve_metrics, CAPTURE_CYCLES, CAPTURE_CYCLE_MS,
    IMAGES_DELIVERED, STEPS_ACCEPTED, STEPS_REJECTED, STEP_EVENTS, TILT_ACTIVE, TILT_DETECTED,
};
use std::sync::{atomic::AtomicBool, Arc};
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

pub fn init() {
    init_metrics();
}

pub fn start_metrics_server(addr: &Option<String>) -> Option<thread::JoinHandle<()>> {
    addr.as_ref().map(|addr| {
        info!(addr = %addr, "Starting metrics server");
        serve_metrics(addr.clone())
    })
}

/// Keeps the tilt gauge in step with the counter's deadline until `stop` is raised.
pub fn start_metrics_updater<S: MotionSource + 'static>(
    counter: Arc<GatedStepCounter<S>>,
    stop: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        while !stop.load(std::sync::atomic::Ordering::Relaxed) {
            publish_tilt_state(&counter);
            thread::sleep(Duration::from_millis(200));
        }
        publish_tilt_state(&counter);
    })
}

/// The window closes on its deadline even when no further step arrives.
fn publish_tilt_state<S: MotionSource>(counter: &GatedStepCounter<S>) {
    TILT_ACTIVE.set(if counter.is_tilt_active() { 1.0 } else { 0.0 });
}

/// Step listener feeding the step and tilt counters.
pub struct StepTelemetry;

impl StepListener for StepTelemetry {
    fn on_step_event(&self, event: StepEvent) {
        STEP_EVENTS.inc();
        if event.accepted {
            STEPS_ACCEPTED.inc();
        } else {
            STEPS_REJECTED.inc();
        }
    }

    fn on_tilt_detected(&self) {
        TILT_DETECTED.inc();
    }
}

/// Capture listener that counts cycles, deliveries and faults.
pub struct CaptureTelemetry;

impl CaptureListener for CaptureTelemetry {
    fn on_images_ready(&self, front: Option<ImageBytes>, back: Option<ImageBytes>) {
        IMAGES_DELIVERED.inc();
        info!(
            front_bytes = front.as_ref().map(Vec::len),
            back_bytes = back.as_ref().map(Vec::len),
            "Images ready"
        );
    }

    fn on_capture_error(&self, lens: Lens, fault: &CaptureFault) {
        record_capture_fault(lens);
        warn!(%lens, error = %fault, "Capture failed");
    }

    fn on_cycle_complete(&self, cycle_ms: u64) {
        CAPTURE_CYCLES.inc();
        CAPTURE_CYCLE_MS.observe(cycle_ms as f64);
    }
}
