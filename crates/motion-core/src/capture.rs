use serde::Serialize;
use std::fmt;
use std::sync::mpsc::{SyncSender, TrySendError};
use thiserror::Error;
use tracing::warn;

/// Raw still-image bytes as produced by the capture device.
pub type ImageBytes = Vec<u8>;

/// Camera-facing direction treated as an independent capture target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Lens {
    Front,
    Back,
}

impl Lens {
    pub const ALL: [Lens; 2] = [Lens::Front, Lens::Back];
}

impl fmt::Display for Lens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lens::Front => f.write_str("front"),
            Lens::Back => f.write_str("back"),
        }
    }
}

/// One two-lens capture cycle. `None` on a side means that lens produced no image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureResult {
    pub front: Option<ImageBytes>,
    pub back: Option<ImageBytes>,
}

impl CaptureResult {
    pub fn is_empty(&self) -> bool {
        self.front.is_none() && self.back.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureFault {
    #[error("{0} lens is not available")]
    LensUnavailable(Lens),
    #[error("capture device is already bound")]
    DeviceBusy,
    #[error("capture device fault: {0}")]
    Device(String),
    #[error("capture request was dropped before completing")]
    Abandoned,
}

pub trait CaptureListener: Send + Sync {
    /// Result of the previous cycle, delivered at the start of the following tick.
    fn on_images_ready(&self, front: Option<ImageBytes>, back: Option<ImageBytes>);
    fn on_capture_error(&self, lens: Lens, fault: &CaptureFault);
    /// Called once per finished cycle with its tick-to-back-completion duration.
    fn on_cycle_complete(&self, _cycle_ms: u64) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    ImagesReady(CaptureResult),
    Error { lens: Lens, fault: CaptureFault },
}

impl CaptureListener for SyncSender<CaptureEvent> {
    fn on_images_ready(&self, front: Option<ImageBytes>, back: Option<ImageBytes>) {
        forward(self, CaptureEvent::ImagesReady(CaptureResult { front, back }));
    }

    fn on_capture_error(&self, lens: Lens, fault: &CaptureFault) {
        forward(
            self,
            CaptureEvent::Error {
                lens,
                fault: fault.clone(),
            },
        );
    }
}

fn forward(tx: &SyncSender<CaptureEvent>, event: CaptureEvent) {
    match tx.try_send(event) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => warn!("Capture event channel full, dropping event"),
        Err(TrySendError::Disconnected(_)) => {}
    }
}
