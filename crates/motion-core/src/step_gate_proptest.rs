#[cfg(test)]
mod proptest_step_gate {
    use crate::motion::PulseKind;
    use crate::step_gate::*;
    use proptest::prelude::*;

    const WINDOW_US: u64 = 2_000_000;

    fn pulse_kind() -> impl Strategy<Value = PulseKind> {
        prop_oneof![Just(PulseKind::Step), Just(PulseKind::Tilt)]
    }

    // Pulse train as (gap since previous pulse in ms, kind).
    fn pulse_train() -> impl Strategy<Value = Vec<(u64, PulseKind)>> {
        prop::collection::vec((0u64..3_000, pulse_kind()), 1..200)
    }

    fn with_timestamps(train: &[(u64, PulseKind)]) -> Vec<(u64, PulseKind)> {
        let mut now = 0u64;
        train
            .iter()
            .map(|(gap_ms, kind)| {
                now += gap_ms * 1_000;
                (now, *kind)
            })
            .collect()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(2000))]

        // Accepted steps never exceed step events; equality iff no step landed inside a tilt window.
        #[test]
        fn accepted_never_exceeds_total(train in pulse_train()) {
            let mut gate = StepGate::new(StepGateConfig::default());
            let mut any_rejected = false;
            for (ts, kind) in with_timestamps(&train) {
                match kind {
                    PulseKind::Step => {
                        let event = gate.on_step(ts);
                        any_rejected |= !event.accepted;
                        prop_assert!(event.accepted_count <= event.index);
                    }
                    _ => { gate.on_tilt(ts); }
                }
                prop_assert!(gate.accepted_step_count() <= gate.total_step_events());
            }
            let equal = gate.accepted_step_count() == gate.total_step_events();
            prop_assert_eq!(equal, !any_rejected);
        }

        // A step at t is accepted iff no tilt arrived in (t - WINDOW, t].
        #[test]
        fn acceptance_matches_window_definition(train in pulse_train()) {
            let mut gate = StepGate::new(StepGateConfig::default());
            let mut tilts: Vec<u64> = Vec::new();
            for (ts, kind) in with_timestamps(&train) {
                match kind {
                    PulseKind::Step => {
                        let expected = !tilts
                            .iter()
                            .any(|&tilt| tilt <= ts && ts < tilt + WINDOW_US);
                        let event = gate.on_step(ts);
                        prop_assert_eq!(event.accepted, expected, "step at {}us, tilts {:?}", ts, tilts);
                    }
                    _ => {
                        gate.on_tilt(ts);
                        tilts.push(ts);
                    }
                }
            }
        }

        // Clearing the tilt always lets the next step through.
        #[test]
        fn cleared_tilt_accepts_next_step(
            tilt_at in 0u64..10_000_000,
            offset in 0u64..WINDOW_US,
        ) {
            let mut gate = StepGate::new(StepGateConfig::default());
            gate.on_tilt(tilt_at);
            gate.clear_tilt();
            prop_assert!(gate.on_step(tilt_at + offset).accepted);
        }
    }
}
