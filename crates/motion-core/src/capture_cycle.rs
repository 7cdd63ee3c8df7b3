use crate::capture::{CaptureResult, ImageBytes, Lens};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CapturePhase {
    #[default]
    Idle,
    /// Waiting for the next tick.
    Running,
    CapturingFront,
    CapturingBack,
    CycleComplete,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CaptureStats {
    pub ticks: u64,
    pub cycles_completed: u64,
    pub deliveries: u64,
    pub front_failures: u64,
    pub back_failures: u64,
    pub stale_discards: u64,
    pub last_cycle_ms: u64,
    pub max_cycle_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("capture completion for epoch {epoch} arrived after stop")]
pub struct StaleCompletion {
    pub epoch: u64,
}

/// How one lens stage of a cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LensOutcome {
    Captured(ImageBytes),
    Failed,
    /// Lens not present on the device; slot stays empty without an error.
    Skipped,
}

impl LensOutcome {
    fn into_image(self) -> Option<ImageBytes> {
        match self {
            LensOutcome::Captured(bytes) => Some(bytes),
            LensOutcome::Failed | LensOutcome::Skipped => None,
        }
    }
}

/// Double-buffered cycle state. Every transition is keyed by the epoch handed out at `start()`,
/// so continuations from a stopped run cannot touch the buffers of a later one.
#[derive(Debug, Default)]
pub struct CaptureCycle {
    phase: CapturePhase,
    epoch: u64,
    previous: CaptureResult,
    in_flight_front: Option<ImageBytes>,
    in_flight_back: Option<ImageBytes>,
    stats: CaptureStats,
}

impl CaptureCycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears all buffers and opens a new epoch. `None` if already running.
    pub fn start(&mut self) -> Option<u64> {
        if self.phase != CapturePhase::Idle {
            return None;
        }
        self.epoch += 1;
        self.previous = CaptureResult::default();
        self.in_flight_front = None;
        self.in_flight_back = None;
        self.phase = CapturePhase::Running;
        Some(self.epoch)
    }

    /// Freezes the cycle. Returns whether it was running.
    pub fn stop(&mut self) -> bool {
        if self.phase == CapturePhase::Idle {
            return false;
        }
        self.phase = CapturePhase::Idle;
        true
    }

    pub fn phase(&self) -> CapturePhase {
        self.phase
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_current(&self, epoch: u64) -> bool {
        self.phase != CapturePhase::Idle && self.epoch == epoch
    }

    pub fn stats(&self) -> CaptureStats {
        self.stats.clone()
    }

    /// Result waiting for the next tick.
    pub fn pending(&self) -> &CaptureResult {
        &self.previous
    }

    /// Starts a tick and hands back the previous cycle's result, if it holds any image.
    pub fn begin_tick(&mut self, epoch: u64) -> Result<Option<CaptureResult>, StaleCompletion> {
        self.check(epoch)?;
        self.stats.ticks += 1;
        self.phase = CapturePhase::CapturingFront;
        let pending = std::mem::take(&mut self.previous);
        if pending.is_empty() {
            Ok(None)
        } else {
            self.stats.deliveries += 1;
            Ok(Some(pending))
        }
    }

    pub fn complete_front(&mut self, epoch: u64, outcome: LensOutcome) -> Result<(), StaleCompletion> {
        self.check(epoch)?;
        self.note_failure(Lens::Front, &outcome);
        self.in_flight_front = outcome.into_image();
        self.phase = CapturePhase::CapturingBack;
        Ok(())
    }

    /// Moves both in-flight slots into the pending result in one step.
    pub fn complete_back(
        &mut self,
        epoch: u64,
        outcome: LensOutcome,
        cycle_ms: u64,
    ) -> Result<(), StaleCompletion> {
        self.check(epoch)?;
        self.note_failure(Lens::Back, &outcome);
        self.in_flight_back = outcome.into_image();
        self.previous = CaptureResult {
            front: self.in_flight_front.take(),
            back: self.in_flight_back.take(),
        };
        self.phase = CapturePhase::CycleComplete;
        self.stats.cycles_completed += 1;
        self.stats.last_cycle_ms = cycle_ms;
        self.stats.max_cycle_ms = self.stats.max_cycle_ms.max(cycle_ms);
        Ok(())
    }

    pub fn arm_next(&mut self, epoch: u64) -> Result<(), StaleCompletion> {
        self.check(epoch)?;
        self.phase = CapturePhase::Running;
        Ok(())
    }

    fn check(&mut self, epoch: u64) -> Result<(), StaleCompletion> {
        if self.is_current(epoch) {
            Ok(())
        } else {
            self.stats.stale_discards += 1;
            Err(StaleCompletion { epoch })
        }
    }

    fn note_failure(&mut self, lens: Lens, outcome: &LensOutcome) {
        if *outcome == LensOutcome::Failed {
            match lens {
                Lens::Front => self.stats.front_failures += 1,
                Lens::Back => self.stats.back_failures += 1,
            }
        }
    }
}
