//! Prometheus metrics for step gating and interval capture.
//!
//! Metrics are registered lazily on first touch; [`init_metrics`] forces
//! registration so every series is exported from the first scrape.

use motion_core::tags;
use motion_core::Lens;
use prometheus::{
    Encoder, Gauge, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::sync::LazyLock;
use std::thread;
use tiny_http::{Header, Response, Server};

/// Global metrics registry
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// ============================================================================
// Step Gating Metrics
// ============================================================================

/// Step pulses received, gated or not
pub static STEP_EVENTS: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(tags::STEP_EVENTS.metric, "Step pulses received").unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

/// Steps counted while no tilt window was open
pub static STEPS_ACCEPTED: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        tags::STEPS_ACCEPTED.metric,
        "Steps counted while no tilt window was open",
    )
    .unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

/// Steps suppressed by an open tilt window
pub static STEPS_REJECTED: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        tags::STEPS_REJECTED.metric,
        "Steps suppressed by an open tilt window",
    )
    .unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

/// Tilt pulses received
pub static TILT_DETECTED: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(tags::TILT_DETECTED.metric, "Tilt pulses received").unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

/// Tilt window state as of the last step or tilt event (1 = open)
pub static TILT_ACTIVE: LazyLock<Gauge> = LazyLock::new(|| {
    let gauge = Gauge::new(
        tags::TILT_ACTIVE.metric,
        "Tilt window state as of the last step or tilt event (1=open, 0=closed)",
    )
    .unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

// ============================================================================
// Capture Metrics
// ============================================================================

/// Two-lens capture cycles completed
pub static CAPTURE_CYCLES: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        tags::CAPTURE_CYCLES.metric,
        "Two-lens capture cycles completed",
    )
    .unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

/// Image pairs handed to the consumer
pub static IMAGES_DELIVERED: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        tags::IMAGES_DELIVERED.metric,
        "Capture results handed to the consumer",
    )
    .unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

/// Lens capture faults, labelled by lens
pub static CAPTURE_FAULTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(tags::CAPTURE_FAULTS.metric, "Lens capture faults"),
        &["lens"],
    )
    .unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

/// Duration from tick to back-lens completion
pub static CAPTURE_CYCLE_MS: LazyLock<Histogram> = LazyLock::new(|| {
    let histogram = Histogram::with_opts(
        HistogramOpts::new(
            tags::CAPTURE_CYCLE_MS.metric,
            "Duration from tick to back-lens completion in milliseconds",
        )
        .buckets(vec![10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0]),
    )
    .unwrap();
    REGISTRY.register(Box::new(histogram.clone())).unwrap();
    histogram
});

pub fn record_capture_fault(lens: Lens) {
    let lens = lens.to_string();
    CAPTURE_FAULTS.with_label_values(&[lens.as_str()]).inc();
}

// ============================================================================
// Metrics HTTP Server
// ============================================================================

/// Start the metrics HTTP server on the given address.
/// Returns a join handle for the server thread.
pub fn serve_metrics(bind_addr: String) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let server = match Server::http(&bind_addr) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("Failed to start metrics server on {}: {}", bind_addr, e);
                return;
            }
        };

        tracing::info!("Metrics server listening on http://{}/metrics", bind_addr);

        for request in server.incoming_requests() {
            let response = match request.url() {
                "/metrics" => match render() {
                    Ok(body) => {
                        let mut response = Response::from_data(body);
                        if let Ok(header) = Header::from_bytes(
                            &b"Content-Type"[..],
                            &b"text/plain; version=0.0.4"[..],
                        ) {
                            response.add_header(header);
                        }
                        response
                    }
                    Err(e) => {
                        tracing::warn!("Failed to encode metrics: {}", e);
                        Response::from_string("Internal Server Error").with_status_code(500)
                    }
                },
                "/health" => Response::from_string("OK"),
                // Ready once the capture loop has produced a full cycle.
                "/ready" if CAPTURE_CYCLES.get() > 0 => Response::from_string("Ready"),
                "/ready" => Response::from_string("Not Ready").with_status_code(503),
                _ => Response::from_string("Not Found").with_status_code(404),
            };
            let _ = request.respond(response);
        }
    })
}

/// Text exposition of the whole registry.
pub fn render() -> Result<Vec<u8>, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&REGISTRY.gather(), &mut buffer)?;
    Ok(buffer)
}

/// Initialize all metrics (forces lazy initialization)
pub fn init_metrics() {
    let _ = STEP_EVENTS.get();
    let _ = STEPS_ACCEPTED.get();
    let _ = STEPS_REJECTED.get();
    let _ = TILT_DETECTED.get();
    let _ = TILT_ACTIVE.get();
    let _ = CAPTURE_CYCLES.get();
    let _ = IMAGES_DELIVERED.get();
    for lens in Lens::ALL {
        let lens = lens.to_string();
        let _ = CAPTURE_FAULTS.with_label_values(&[lens.as_str()]).get();
    }
    let _ = CAPTURE_CYCLE_MS.get_sample_count();
}
