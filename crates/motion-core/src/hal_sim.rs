use crate::capture::{CaptureFault, ImageBytes, Lens};
use crate::executor::{ContextError, Dispatcher, LooperThread};
use crate::hal::{CaptureCompletion, CaptureDevice, MotionSource, PulseSink};
use crate::motion::{Pulse, PulseKind, SensorUnavailable};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;
use tracing::{trace, warn};

/// In-process sensor hub: pulses pushed with [`SimulatedMotionSource::emit`] reach the subscribed sink.
pub struct SimulatedMotionSource {
    available: HashSet<PulseKind>,
    sinks: Mutex<HashMap<PulseKind, PulseSink>>,
}

impl SimulatedMotionSource {
    pub fn new(available: &[PulseKind]) -> Self {
        Self {
            available: available.iter().copied().collect(),
            sinks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_all_sensors() -> Self {
        Self::new(&[
            PulseKind::Step,
            PulseKind::Tilt,
            PulseKind::SignificantMotion,
        ])
    }

    /// Delivers the pulse on the calling thread. Returns false when nobody is subscribed.
    pub fn emit(&self, pulse: Pulse) -> bool {
        let sink = self
            .sinks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&pulse.kind)
            .cloned();
        match sink {
            Some(sink) => {
                sink(pulse);
                true
            }
            None => {
                trace!(kind = %pulse.kind, "Pulse without subscriber");
                false
            }
        }
    }

    pub fn is_subscribed(&self, kind: PulseKind) -> bool {
        self.sinks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&kind)
    }
}

impl MotionSource for SimulatedMotionSource {
    fn has_sensor(&self, kind: PulseKind) -> bool {
        self.available.contains(&kind)
    }

    fn subscribe(&self, kind: PulseKind, sink: PulseSink) -> Result<(), SensorUnavailable> {
        if !self.has_sensor(kind) {
            return Err(SensorUnavailable(kind));
        }
        self.sinks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(kind, sink);
        Ok(())
    }

    fn unsubscribe(&self, kind: PulseKind) {
        self.sinks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&kind);
    }
}

#[derive(Debug, Clone)]
pub struct SimulatedCameraConfig {
    pub latency: Duration,
    pub resolution: (u16, u16),
    pub front_available: bool,
    pub back_available: bool,
    /// Every Nth front capture fails.
    pub fail_front_every: Option<u64>,
    /// Every Nth back capture fails.
    pub fail_back_every: Option<u64>,
}

impl Default for SimulatedCameraConfig {
    fn default() -> Self {
        Self {
            latency: Duration::from_millis(25),
            resolution: (1024, 768),
            front_available: true,
            back_available: true,
            fail_front_every: None,
            fail_back_every: None,
        }
    }
}

#[derive(Debug)]
pub struct SimulatedSession {
    id: u64,
    lens: Lens,
}

impl SimulatedSession {
    pub fn lens(&self) -> Lens {
        self.lens
    }
}

/// Two-lens still camera whose completions arrive on a `capture-worker` thread.
pub struct SimulatedCamera {
    config: SimulatedCameraConfig,
    worker: LooperThread,
    bound: Mutex<Option<u64>>,
    next_session: AtomicU64,
    captures: [AtomicU64; 2],
}

impl SimulatedCamera {
    pub fn new(config: SimulatedCameraConfig) -> Result<Self, ContextError> {
        Ok(Self {
            config,
            worker: LooperThread::spawn("capture-worker")?,
            bound: Mutex::new(None),
            next_session: AtomicU64::new(1),
            captures: [AtomicU64::new(0), AtomicU64::new(0)],
        })
    }

    pub fn captures(&self, lens: Lens) -> u64 {
        self.captures[slot(lens)].load(Ordering::Relaxed)
    }

    pub fn is_bound(&self) -> bool {
        self.bound
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    fn fail_every(&self, lens: Lens) -> Option<u64> {
        match lens {
            Lens::Front => self.config.fail_front_every,
            Lens::Back => self.config.fail_back_every,
        }
    }
}

impl CaptureDevice for SimulatedCamera {
    type Session = SimulatedSession;

    fn has_lens(&self, lens: Lens) -> bool {
        match lens {
            Lens::Front => self.config.front_available,
            Lens::Back => self.config.back_available,
        }
    }

    fn bind_session(&self, lens: Lens) -> Result<SimulatedSession, CaptureFault> {
        if !self.has_lens(lens) {
            return Err(CaptureFault::LensUnavailable(lens));
        }
        let mut bound = self.bound.lock().unwrap_or_else(|e| e.into_inner());
        if bound.is_some() {
            return Err(CaptureFault::DeviceBusy);
        }
        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        *bound = Some(id);
        Ok(SimulatedSession { id, lens })
    }

    fn capture(&self, session: &SimulatedSession, on_complete: CaptureCompletion) {
        let lens = session.lens;
        let seq = self.captures[slot(lens)].fetch_add(1, Ordering::Relaxed) + 1;
        let fail = self.fail_every(lens).is_some_and(|n| n > 0 && seq % n == 0);
        let latency = self.config.latency;
        let resolution = self.config.resolution;
        self.worker.dispatch(Box::new(move || {
            thread::sleep(latency);
            if fail {
                on_complete(Err(CaptureFault::Device(format!(
                    "simulated {lens} sensor fault on capture {seq}"
                ))));
            } else {
                on_complete(Ok(synthetic_image(lens, seq, resolution)));
            }
        }));
    }

    fn unbind(&self, session: &SimulatedSession) {
        let mut bound = self.bound.lock().unwrap_or_else(|e| e.into_inner());
        if *bound == Some(session.id) {
            *bound = None;
        } else {
            warn!(session = session.id, "Unbind for a session that is not bound");
        }
    }
}

fn slot(lens: Lens) -> usize {
    match lens {
        Lens::Front => 0,
        Lens::Back => 1,
    }
}

/// JPEG-framed placeholder: SOI, lens, sequence, resolution, EOI.
fn synthetic_image(lens: Lens, seq: u64, (width, height): (u16, u16)) -> ImageBytes {
    let mut bytes = Vec::with_capacity(17);
    bytes.extend_from_slice(&[0xFF, 0xD8]);
    bytes.push(slot(lens) as u8);
    bytes.extend_from_slice(&seq.to_be_bytes());
    bytes.extend_from_slice(&width.to_be_bytes());
    bytes.extend_from_slice(&height.to_be_bytes());
    bytes.extend_from_slice(&[0xFF, 0xD9]);
    bytes
}
