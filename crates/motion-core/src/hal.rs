use crate::capture::{CaptureFault, ImageBytes, Lens};
use crate::motion::{Pulse, PulseKind, SensorUnavailable};
use std::sync::Arc;

/// Receives pulses of one kind, on whatever thread the source delivers them.
pub type PulseSink = Arc<dyn Fn(Pulse) + Send + Sync>;

/// Push-driven motion sensor hub. One sink per pulse kind; subscribing again replaces it.
pub trait MotionSource: Send + Sync {
    fn has_sensor(&self, kind: PulseKind) -> bool;
    fn subscribe(&self, kind: PulseKind, sink: PulseSink) -> Result<(), SensorUnavailable>;
    fn unsubscribe(&self, kind: PulseKind);
}

/// Invoked exactly once per capture request, typically on the device's worker thread.
pub type CaptureCompletion = Box<dyn FnOnce(Result<ImageBytes, CaptureFault>) + Send + 'static>;

/// Still-capture device whose sessions must be bound and unbound on the UI-affinity context.
pub trait CaptureDevice: Send + Sync + 'static {
    type Session: Send + Sync + 'static;

    fn has_lens(&self, _lens: Lens) -> bool {
        true
    }

    fn bind_session(&self, lens: Lens) -> Result<Self::Session, CaptureFault>;

    /// Requests one image. Must not block; `on_complete` fires later on any thread.
    fn capture(&self, session: &Self::Session, on_complete: CaptureCompletion);

    fn unbind(&self, session: &Self::Session);
}
