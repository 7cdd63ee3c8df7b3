/// Metric names registered by the exporter.
#[derive(Debug, Clone, Copy)]
pub struct Tag {
    pub metric: &'static str,
}

pub const STEP_EVENTS: Tag = Tag {
    metric: "motion_step_events_total",
};

pub const STEPS_ACCEPTED: Tag = Tag {
    metric: "motion_steps_accepted_total",
};

pub const STEPS_REJECTED: Tag = Tag {
    metric: "motion_steps_rejected_total",
};

pub const TILT_DETECTED: Tag = Tag {
    metric: "motion_tilt_detected_total",
};

pub const TILT_ACTIVE: Tag = Tag {
    metric: "motion_tilt_active",
};

pub const CAPTURE_CYCLES: Tag = Tag {
    metric: "capture_cycles_completed_total",
};

pub const IMAGES_DELIVERED: Tag = Tag {
    metric: "capture_images_delivered_total",
};

pub const CAPTURE_FAULTS: Tag = Tag {
    metric: "capture_lens_faults_total",
};

pub const CAPTURE_CYCLE_MS: Tag = Tag {
    metric: "capture_cycle_duration_milliseconds",
};

pub const ALL: &[Tag] = &[
    STEP_EVENTS,
    STEPS_ACCEPTED,
    STEPS_REJECTED,
    TILT_DETECTED,
    TILT_ACTIVE,
    CAPTURE_CYCLES,
    IMAGES_DELIVERED,
    CAPTURE_FAULTS,
    CAPTURE_CYCLE_MS,
];
