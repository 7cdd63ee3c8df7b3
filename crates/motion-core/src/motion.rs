use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::mpsc::{SyncSender, TrySendError};
use thiserror::Error;
use tracing::warn;

/// Kind of payload-light motion pulse delivered by a [`crate::hal::MotionSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PulseKind {
    Step,
    Tilt,
    SignificantMotion,
}

impl fmt::Display for PulseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PulseKind::Step => "step",
            PulseKind::Tilt => "tilt",
            PulseKind::SignificantMotion => "significant_motion",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pulse {
    pub kind: PulseKind,
    /// Arrival time on the shared monotonic time base.
    pub timestamp_us: u64,
}

impl Pulse {
    pub fn step(timestamp_us: u64) -> Self {
        Self {
            kind: PulseKind::Step,
            timestamp_us,
        }
    }

    pub fn tilt(timestamp_us: u64) -> Self {
        Self {
            kind: PulseKind::Tilt,
            timestamp_us,
        }
    }

    pub fn significant_motion(timestamp_us: u64) -> Self {
        Self {
            kind: PulseKind::SignificantMotion,
            timestamp_us,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{0} sensor is not present on this device")]
pub struct SensorUnavailable(pub PulseKind);

/// Emitted once per step pulse, gated or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StepEvent {
    /// 1-based index over every step pulse since the last `start()`.
    pub index: u64,
    pub tilt_active: bool,
    pub accepted: bool,
    pub accepted_count: u64,
}

pub trait StepListener: Send + Sync {
    fn on_step_event(&self, event: StepEvent);
    fn on_tilt_detected(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionEvent {
    Step(StepEvent),
    TiltDetected,
}

/// Bounded-channel listener: the consumer polls the receiver, a full channel drops the event.
impl StepListener for SyncSender<MotionEvent> {
    fn on_step_event(&self, event: StepEvent) {
        forward(self, MotionEvent::Step(event));
    }

    fn on_tilt_detected(&self) {
        forward(self, MotionEvent::TiltDetected);
    }
}

fn forward(tx: &SyncSender<MotionEvent>, event: MotionEvent) {
    match tx.try_send(event) {
        Ok(()) => {}
        Err(TrySendError::Full(event)) => {
            warn!(?event, "Motion event channel full, dropping event");
        }
        Err(TrySendError::Disconnected(_)) => {}
    }
}
