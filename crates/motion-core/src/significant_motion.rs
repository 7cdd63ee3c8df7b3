use crate::hal::{MotionSource, PulseSink};
use crate::motion::{Pulse, PulseKind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

pub type TriggerCallback = Arc<dyn Fn(Pulse) + Send + Sync>;

struct TriggerInner<S: MotionSource> {
    source: Arc<S>,
    armed: AtomicBool,
    callback: Mutex<Option<TriggerCallback>>,
}

impl<S: MotionSource> TriggerInner<S> {
    fn fire(&self, pulse: Pulse) {
        if !self.armed.swap(false, Ordering::AcqRel) {
            return;
        }
        self.source.unsubscribe(PulseKind::SignificantMotion);
        info!(timestamp_us = pulse.timestamp_us, "Significant motion triggered, trigger disarmed");
        let callback = self
            .callback
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(callback) = callback {
            callback(pulse);
        }
    }
}

/// One-shot significant-motion trigger: fires at most once per `arm()`.
pub struct SignificantMotionTrigger<S: MotionSource + 'static> {
    inner: Arc<TriggerInner<S>>,
    absence_reported: AtomicBool,
}

impl<S: MotionSource + 'static> SignificantMotionTrigger<S> {
    pub fn new(source: Arc<S>) -> Self {
        Self {
            inner: Arc::new(TriggerInner {
                source,
                armed: AtomicBool::new(false),
                callback: Mutex::new(None),
            }),
            absence_reported: AtomicBool::new(false),
        }
    }

    pub fn set_callback(&self, callback: Option<TriggerCallback>) {
        *self.inner.callback.lock().unwrap_or_else(|e| e.into_inner()) = callback;
    }

    pub fn arm(&self) -> bool {
        if !self.inner.source.has_sensor(PulseKind::SignificantMotion) {
            if !self.absence_reported.swap(true, Ordering::Relaxed) {
                warn!("Significant-motion sensor not present, trigger disabled");
            }
            return false;
        }
        if self.inner.armed.swap(true, Ordering::AcqRel) {
            debug!("Significant-motion trigger already armed");
            return true;
        }
        let weak = Arc::downgrade(&self.inner);
        let sink: PulseSink = Arc::new(move |pulse: Pulse| {
            if let Some(inner) = weak.upgrade() {
                inner.fire(pulse);
            }
        });
        match self.inner.source.subscribe(PulseKind::SignificantMotion, sink) {
            Ok(()) => {
                debug!("Significant-motion trigger armed");
                true
            }
            Err(e) => {
                warn!(error = %e, "Failed to arm significant-motion trigger");
                self.inner.armed.store(false, Ordering::Release);
                false
            }
        }
    }

    pub fn cancel(&self) {
        if self.inner.armed.swap(false, Ordering::AcqRel) {
            self.inner.source.unsubscribe(PulseKind::SignificantMotion);
            debug!("Significant-motion trigger cancelled");
        }
    }

    pub fn is_armed(&self) -> bool {
        self.inner.armed.load(Ordering::Acquire)
    }
}

impl<S: MotionSource + 'static> Drop for SignificantMotionTrigger<S> {
    fn drop(&mut self) {
        self.cancel();
    }
}
