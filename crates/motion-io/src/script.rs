//! JSON pulse scripts and their real-time replay.
//!
//! ```json
//! { "pulses": [ { "kind": "step", "at_ms": 0 }, { "kind": "tilt", "at_ms": 100 } ] }
//! ```

use motion_core::{Clock, Pulse, PulseKind};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

const STOP_POLL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptedPulse {
    pub kind: PulseKind,
    /// Offset from the start of the replay.
    pub at_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PulseScript {
    pub pulses: Vec<ScriptedPulse>,
}

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("failed to read pulse script {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid pulse script: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("pulse {index} at {at_ms} ms precedes the previous pulse at {previous_ms} ms")]
    OutOfOrder {
        index: usize,
        at_ms: u64,
        previous_ms: u64,
    },
    #[error("failed to spawn replay thread: {0}")]
    Spawn(#[source] std::io::Error),
}

impl PulseScript {
    pub fn parse(raw: &str) -> Result<Self, ScriptError> {
        let script: PulseScript = serde_json::from_str(raw)?;
        script.validate()?;
        Ok(script)
    }

    pub fn load(path: &Path) -> Result<Self, ScriptError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ScriptError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&raw)
    }

    /// Pulses must be listed in delivery order.
    pub fn validate(&self) -> Result<(), ScriptError> {
        for (index, pair) in self.pulses.windows(2).enumerate() {
            if pair[1].at_ms < pair[0].at_ms {
                return Err(ScriptError::OutOfOrder {
                    index: index + 1,
                    at_ms: pair[1].at_ms,
                    previous_ms: pair[0].at_ms,
                });
            }
        }
        Ok(())
    }

    pub fn duration_ms(&self) -> u64 {
        self.pulses.last().map_or(0, |p| p.at_ms)
    }

    pub fn count(&self, kind: PulseKind) -> usize {
        self.pulses.iter().filter(|p| p.kind == kind).count()
    }

    /// Steady walk: one step per `cadence`, a significant-motion pulse up
    /// front, and every 12th step a pair of tilts 300 ms apart.
    pub fn synthetic_walk(duration: Duration, cadence: Duration) -> Self {
        let cadence_ms = cadence.as_millis().max(1) as u64;
        let duration_ms = duration.as_millis() as u64;
        let mut pulses = vec![ScriptedPulse {
            kind: PulseKind::SignificantMotion,
            at_ms: 0,
        }];
        let mut at_ms = cadence_ms;
        let mut step = 0u64;
        while at_ms <= duration_ms {
            step += 1;
            if step % 12 == 0 {
                pulses.push(ScriptedPulse {
                    kind: PulseKind::Tilt,
                    at_ms,
                });
                pulses.push(ScriptedPulse {
                    kind: PulseKind::Tilt,
                    at_ms: at_ms + 300,
                });
            }
            pulses.push(ScriptedPulse {
                kind: PulseKind::Step,
                at_ms,
            });
            at_ms += cadence_ms;
        }
        pulses.sort_by_key(|p| p.at_ms);
        Self { pulses }
    }
}

/// Emits every pulse at its offset on a background thread, stamped on `clock`.
///
/// The thread returns the number of pulses emitted; it exits early once `stop` is set.
pub fn replay<F>(
    script: PulseScript,
    clock: Arc<dyn Clock>,
    stop: Arc<AtomicBool>,
    emit: F,
) -> Result<thread::JoinHandle<u64>, ScriptError>
where
    F: Fn(Pulse) + Send + 'static,
{
    thread::Builder::new()
        .name("pulse-replay".to_string())
        .spawn(move || {
            let start_us = clock.now_us();
            let start = Instant::now();
            info!(pulses = script.pulses.len(), duration_ms = script.duration_ms(), "Replaying pulse script");
            let mut emitted = 0u64;
            for scripted in &script.pulses {
                let due = start + Duration::from_millis(scripted.at_ms);
                loop {
                    if stop.load(Ordering::Relaxed) {
                        debug!(emitted, "Pulse replay stopped early");
                        return emitted;
                    }
                    let now = Instant::now();
                    if now >= due {
                        break;
                    }
                    thread::sleep((due - now).min(STOP_POLL));
                }
                emit(Pulse {
                    kind: scripted.kind,
                    timestamp_us: start_us + scripted.at_ms * 1_000,
                });
                emitted += 1;
            }
            debug!(emitted, "Pulse replay finished");
            emitted
        })
        .map_err(ScriptError::Spawn)
}
