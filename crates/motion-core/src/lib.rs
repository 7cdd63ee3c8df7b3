pub mod capture;
pub mod capture_cycle;
pub mod capture_loop;
pub mod executor;
pub mod hal;
#[cfg(feature = "simulation")]
pub mod hal_sim;
pub mod motion;
pub mod significant_motion;
pub mod step_counter;
pub mod step_gate;
mod step_gate_proptest;
pub mod tags;
pub mod timebase;

pub use capture::{CaptureEvent, CaptureFault, CaptureListener, CaptureResult, ImageBytes, Lens};
pub use capture_cycle::{CaptureCycle, CapturePhase, CaptureStats, LensOutcome, StaleCompletion};
pub use capture_loop::{CaptureConfig, IntervalCaptureScheduler, CAPTURE_INTERVAL};
pub use executor::{ContextError, Dispatcher, InlineDispatcher, LooperThread, Task, TimerContext};
pub use hal::{CaptureCompletion, CaptureDevice, MotionSource, PulseSink};
#[cfg(feature = "simulation")]
pub use hal_sim::{SimulatedCamera, SimulatedCameraConfig, SimulatedMotionSource};
pub use motion::{MotionEvent, Pulse, PulseKind, SensorUnavailable, StepEvent, StepListener};
pub use significant_motion::{SignificantMotionTrigger, TriggerCallback};
pub use step_counter::{GatedStepCounter, StepCounterSnapshot};
pub use step_gate::{StepGate, StepGateConfig, TILT_WINDOW};
pub use timebase::{Clock, ManualClock, TimeBase};
