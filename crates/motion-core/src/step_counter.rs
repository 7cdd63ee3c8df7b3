use crate::hal::{MotionSource, PulseSink};
use crate::motion::{Pulse, PulseKind, StepListener};
use crate::step_gate::{StepGate, StepGateConfig};
use crate::timebase::Clock;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StepCounterSnapshot {
    pub total_step_events: u64,
    pub accepted_step_count: u64,
    pub tilt_active: bool,
    pub step_subscribed: bool,
    pub tilt_subscribed: bool,
}

#[derive(Debug)]
struct CounterState {
    gate: StepGate,
    step_subscribed: bool,
    tilt_subscribed: bool,
    step_absence_reported: bool,
    tilt_absence_reported: bool,
}

struct CounterInner {
    state: Mutex<CounterState>,
    listener: Mutex<Option<Arc<dyn StepListener>>>,
}

impl CounterInner {
    fn state(&self) -> MutexGuard<'_, CounterState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn listener(&self) -> Option<Arc<dyn StepListener>> {
        self.listener
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn on_pulse(&self, pulse: Pulse) {
        match pulse.kind {
            PulseKind::Step => {
                let event = {
                    let mut state = self.state();
                    if !state.step_subscribed {
                        trace!(timestamp_us = pulse.timestamp_us, "Step pulse while stopped, ignored");
                        return;
                    }
                    state.gate.on_step(pulse.timestamp_us)
                };
                info!(
                    index = event.index,
                    tilt_active = event.tilt_active,
                    accepted = event.accepted,
                    accepted_count = event.accepted_count,
                    "Step event"
                );
                if let Some(listener) = self.listener() {
                    listener.on_step_event(event);
                }
            }
            PulseKind::Tilt => {
                let deadline_us = {
                    let mut state = self.state();
                    if !state.tilt_subscribed {
                        trace!(timestamp_us = pulse.timestamp_us, "Tilt pulse while stopped, ignored");
                        return;
                    }
                    state.gate.on_tilt(pulse.timestamp_us)
                };
                info!(deadline_us, "Tilt detected, suppressing steps");
                if let Some(listener) = self.listener() {
                    listener.on_tilt_detected();
                }
            }
            PulseKind::SignificantMotion => {
                trace!("Significant-motion pulse not handled by step counter");
            }
        }
    }
}

/// Tilt-aware step tally over a push-driven [`MotionSource`].
pub struct GatedStepCounter<S: MotionSource> {
    source: Arc<S>,
    clock: Arc<dyn Clock>,
    inner: Arc<CounterInner>,
}

impl<S: MotionSource> GatedStepCounter<S> {
    pub fn new(source: Arc<S>, config: StepGateConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            source,
            clock,
            inner: Arc::new(CounterInner {
                state: Mutex::new(CounterState {
                    gate: StepGate::new(config),
                    step_subscribed: false,
                    tilt_subscribed: false,
                    step_absence_reported: false,
                    tilt_absence_reported: false,
                }),
                listener: Mutex::new(None),
            }),
        }
    }

    /// Replaces the registered listener. Events are dropped while none is set.
    pub fn set_listener(&self, listener: Option<Arc<dyn StepListener>>) {
        *self.inner.listener.lock().unwrap_or_else(|e| e.into_inner()) = listener;
    }

    /// Subscribes to step pulses and resets both counts.
    ///
    /// Returns whether step detection is active afterwards. A missing sensor
    /// is logged once and leaves the feature disabled.
    pub fn start(&self) -> bool {
        {
            let mut state = self.inner.state();
            if state.step_subscribed {
                debug!("Step detection already active");
                return true;
            }
            if !self.source.has_sensor(PulseKind::Step) {
                report_absent(&mut state.step_absence_reported, PulseKind::Step);
                return false;
            }
            state.gate.reset_counts();
            state.step_subscribed = true;
        }
        self.subscribe(PulseKind::Step)
    }

    /// Unsubscribes; the last counts stay readable.
    pub fn stop(&self) {
        {
            let mut state = self.inner.state();
            if !state.step_subscribed {
                return;
            }
            state.step_subscribed = false;
        }
        self.source.unsubscribe(PulseKind::Step);
        info!("Step detection stopped");
    }

    pub fn start_tilt(&self) -> bool {
        {
            let mut state = self.inner.state();
            if state.tilt_subscribed {
                debug!("Tilt detection already active");
                return true;
            }
            if !self.source.has_sensor(PulseKind::Tilt) {
                report_absent(&mut state.tilt_absence_reported, PulseKind::Tilt);
                return false;
            }
            state.tilt_subscribed = true;
        }
        self.subscribe(PulseKind::Tilt)
    }

    /// Unsubscribes from tilt pulses and forces the gate open immediately.
    pub fn stop_tilt(&self) {
        let was_subscribed = {
            let mut state = self.inner.state();
            state.gate.clear_tilt();
            std::mem::replace(&mut state.tilt_subscribed, false)
        };
        if was_subscribed {
            self.source.unsubscribe(PulseKind::Tilt);
        }
        info!("Tilt detection stopped, tilt_active forced false");
    }

    /// Feeds a pulse directly, as the source sink does.
    pub fn on_pulse(&self, pulse: Pulse) {
        self.inner.on_pulse(pulse);
    }

    pub fn is_tilt_active(&self) -> bool {
        let now_us = self.clock.now_us();
        self.inner.state().gate.is_tilt_active(now_us)
    }

    pub fn snapshot(&self) -> StepCounterSnapshot {
        let now_us = self.clock.now_us();
        let state = self.inner.state();
        StepCounterSnapshot {
            total_step_events: state.gate.total_step_events(),
            accepted_step_count: state.gate.accepted_step_count(),
            tilt_active: state.gate.is_tilt_active(now_us),
            step_subscribed: state.step_subscribed,
            tilt_subscribed: state.tilt_subscribed,
        }
    }

    fn subscribe(&self, kind: PulseKind) -> bool {
        match self.source.subscribe(kind, self.sink()) {
            Ok(()) => {
                info!(%kind, "Pulse subscription started");
                true
            }
            Err(e) => {
                warn!(error = %e, "Pulse subscription failed");
                let mut state = self.inner.state();
                match kind {
                    PulseKind::Step => state.step_subscribed = false,
                    PulseKind::Tilt => state.tilt_subscribed = false,
                    PulseKind::SignificantMotion => {}
                }
                false
            }
        }
    }

    fn sink(&self) -> PulseSink {
        let inner = Arc::downgrade(&self.inner);
        Arc::new(move |pulse: Pulse| {
            if let Some(inner) = inner.upgrade() {
                inner.on_pulse(pulse);
            }
        })
    }
}

impl<S: MotionSource> Drop for GatedStepCounter<S> {
    fn drop(&mut self) {
        self.stop();
        let tilt_subscribed = self.inner.state().tilt_subscribed;
        if tilt_subscribed {
            self.stop_tilt();
        }
    }
}

fn report_absent(reported: &mut bool, kind: PulseKind) {
    if *reported {
        debug!(%kind, "Sensor absent, start ignored");
    } else {
        *reported = true;
        warn!(%kind, "Sensor not present on this device, feature disabled");
    }
}

#[cfg(all(test, feature = "simulation"))]
mod tests {
    use super::*;
    use crate::hal_sim::SimulatedMotionSource;
    use crate::motion::{MotionEvent, StepEvent};
    use crate::timebase::ManualClock;
    use std::sync::mpsc::{sync_channel, Receiver};

    fn ms(v: u64) -> u64 {
        v * 1_000
    }

    fn counter_with(
        kinds: &[PulseKind],
    ) -> (
        Arc<SimulatedMotionSource>,
        Arc<ManualClock>,
        GatedStepCounter<SimulatedMotionSource>,
        Receiver<MotionEvent>,
    ) {
        let source = Arc::new(SimulatedMotionSource::new(kinds));
        let clock = Arc::new(ManualClock::new(0));
        let counter = GatedStepCounter::new(
            Arc::clone(&source),
            StepGateConfig::default(),
            clock.clone(),
        );
        let (tx, rx) = sync_channel(64);
        counter.set_listener(Some(Arc::new(tx)));
        (source, clock, counter, rx)
    }

    fn steps(rx: &Receiver<MotionEvent>) -> Vec<StepEvent> {
        rx.try_iter()
            .filter_map(|e| match e {
                MotionEvent::Step(step) => Some(step),
                MotionEvent::TiltDetected => None,
            })
            .collect()
    }

    #[test]
    fn gated_scenario_through_source() {
        let (source, _clock, counter, rx) = counter_with(&[PulseKind::Step, PulseKind::Tilt]);
        assert!(counter.start());
        assert!(counter.start_tilt());

        source.emit(Pulse::step(ms(0)));
        source.emit(Pulse::tilt(ms(100)));
        source.emit(Pulse::step(ms(500)));
        source.emit(Pulse::step(ms(2200)));

        let events: Vec<MotionEvent> = rx.try_iter().collect();
        assert_eq!(events.len(), 4);
        assert_eq!(events[1], MotionEvent::TiltDetected);
        assert_eq!(
            events[2],
            MotionEvent::Step(StepEvent {
                index: 2,
                tilt_active: true,
                accepted: false,
                accepted_count: 1,
            })
        );
        assert_eq!(
            events[3],
            MotionEvent::Step(StepEvent {
                index: 3,
                tilt_active: false,
                accepted: true,
                accepted_count: 2,
            })
        );
    }

    #[test]
    fn stop_tilt_overrides_pending_window() {
        let (source, clock, counter, rx) = counter_with(&[PulseKind::Step, PulseKind::Tilt]);
        counter.start();
        counter.start_tilt();
        source.emit(Pulse::tilt(ms(0)));
        clock.set_us(ms(10));
        assert!(counter.is_tilt_active());

        counter.stop_tilt();
        assert!(!counter.is_tilt_active());
        assert!(!source.is_subscribed(PulseKind::Tilt));

        source.emit(Pulse::step(ms(20)));
        let steps = steps(&rx);
        assert_eq!(steps.len(), 1);
        assert!(steps[0].accepted);
    }

    #[test]
    fn tilt_active_expires_with_clock() {
        let (source, clock, counter, _rx) = counter_with(&[PulseKind::Step, PulseKind::Tilt]);
        counter.start_tilt();
        source.emit(Pulse::tilt(ms(100)));
        clock.set_us(ms(2099));
        assert!(counter.is_tilt_active());
        clock.set_us(ms(2100));
        assert!(!counter.is_tilt_active());
    }

    #[test]
    fn start_is_idempotent_and_resets_counts() {
        let (source, _clock, counter, _rx) = counter_with(&[PulseKind::Step]);
        counter.start();
        source.emit(Pulse::step(ms(0)));
        source.emit(Pulse::step(ms(10)));
        assert!(counter.start());
        assert_eq!(counter.snapshot().total_step_events, 2);

        counter.stop();
        let snap = counter.snapshot();
        assert_eq!(snap.total_step_events, 2);
        assert_eq!(snap.accepted_step_count, 2);
        assert!(!snap.step_subscribed);

        counter.start();
        assert_eq!(counter.snapshot().total_step_events, 0);
    }

    #[test]
    fn missing_sensor_disables_feature() {
        let (source, _clock, counter, rx) = counter_with(&[PulseKind::Tilt]);
        assert!(!counter.start());
        assert!(!counter.start());
        assert!(!source.is_subscribed(PulseKind::Step));

        counter.on_pulse(Pulse::step(ms(0)));
        assert!(rx.try_recv().is_err());
        assert_eq!(counter.snapshot().total_step_events, 0);
    }

    #[test]
    fn tilt_without_subscription_is_ignored() {
        let (source, _clock, counter, _rx) = counter_with(&[PulseKind::Step, PulseKind::Tilt]);
        counter.start();
        counter.on_pulse(Pulse::tilt(ms(0)));
        source.emit(Pulse::step(ms(10)));
        assert_eq!(counter.snapshot().accepted_step_count, 1);
    }

    #[test]
    fn events_dropped_without_listener() {
        let (source, _clock, counter, rx) = counter_with(&[PulseKind::Step]);
        counter.set_listener(None);
        counter.start();
        source.emit(Pulse::step(ms(0)));
        assert!(rx.try_recv().is_err());
        assert_eq!(counter.snapshot().total_step_events, 1);
    }

    #[test]
    fn dropping_counter_releases_subscriptions() {
        let (source, _clock, counter, _rx) = counter_with(&[PulseKind::Step, PulseKind::Tilt]);
        counter.start();
        counter.start_tilt();
        drop(counter);
        assert!(!source.is_subscribed(PulseKind::Step));
        assert!(!source.is_subscribed(PulseKind::Tilt));
    }
}
