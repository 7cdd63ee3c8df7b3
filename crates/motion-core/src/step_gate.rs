use crate::motion::StepEvent;
use std::time::Duration;

/// Length of the suppression window opened by each tilt pulse.
pub const TILT_WINDOW: Duration = Duration::from_millis(2000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepGateConfig {
    pub tilt_window: Duration,
}

impl Default for StepGateConfig {
    fn default() -> Self {
        Self {
            tilt_window: TILT_WINDOW,
        }
    }
}

/// Clock-free gating state. A step at `t` is accepted iff no tilt arrived in `(t - window, t]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepGate {
    window_us: u64,
    tilt_deadline_us: Option<u64>,
    total_step_events: u64,
    accepted_step_count: u64,
}

impl StepGate {
    pub fn new(config: StepGateConfig) -> Self {
        Self {
            window_us: config.tilt_window.as_micros() as u64,
            ..Self::default()
        }
    }

    pub fn reset_counts(&mut self) {
        self.total_step_events = 0;
        self.accepted_step_count = 0;
    }

    pub fn is_tilt_active(&self, now_us: u64) -> bool {
        self.tilt_deadline_us.is_some_and(|deadline| now_us < deadline)
    }

    pub fn tilt_deadline_us(&self) -> Option<u64> {
        self.tilt_deadline_us
    }

    /// Re-arms (replaces) the deadline; bursts collapse into one window ending after the last pulse.
    pub fn on_tilt(&mut self, timestamp_us: u64) -> u64 {
        let deadline = timestamp_us.saturating_add(self.window_us);
        self.tilt_deadline_us = Some(deadline);
        deadline
    }

    /// Forces the gate open regardless of any pending deadline.
    pub fn clear_tilt(&mut self) {
        self.tilt_deadline_us = None;
    }

    pub fn on_step(&mut self, timestamp_us: u64) -> StepEvent {
        let tilt_active = self.is_tilt_active(timestamp_us);
        if !tilt_active {
            // Expired deadlines are dropped lazily.
            self.tilt_deadline_us = None;
        }
        self.total_step_events += 1;
        let accepted = !tilt_active;
        if accepted {
            self.accepted_step_count += 1;
        }
        StepEvent {
            index: self.total_step_events,
            tilt_active,
            accepted,
            accepted_count: self.accepted_step_count,
        }
    }

    pub fn total_step_events(&self) -> u64 {
        self.total_step_events
    }

    pub fn accepted_step_count(&self) -> u64 {
        self.accepted_step_count
    }
}
