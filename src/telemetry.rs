use opentelemetry::{
    global,
    metrics::{Counter, Histogram, MeterProvider},
    KeyValue,
};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus::Registry;
use std::collections::HashSet;

pub struct Metrics {
    frames_processed: Counter<u64>,
    frames_dropped: Counter<u64>,
    inference_failures: Counter<u64>,
    signs_detected: Counter<u64>,
    inference_duration: Histogram<u64>,
    pub registry: Registry,
    // The SDK shuts its readers down once the last provider handle is gone.
    _provider: SdkMeterProvider,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()?;

        let provider = SdkMeterProvider::builder().with_reader(exporter).build();

        let meter = provider.meter("sign_detection");
        global::set_meter_provider(provider.clone());

        let frames_processed = meter
            .u64_counter("frames_processed_total")
            .with_description("Frames run through the detector")
            .build();

        let frames_dropped = meter
            .u64_counter("frames_dropped_total")
            .with_description("Queued frames discarded in favor of a newer one")
            .build();

        let inference_failures = meter
            .u64_counter("inference_failures_total")
            .with_description("Forward passes that returned an error")
            .build();

        let signs_detected = meter
            .u64_counter("signs_detected_total")
            .with_description("Frames in which the target sign was found")
            .build();

        let boundaries = generate_boundaries((5, 25, 50, 250, 1000));

        let inference_duration = meter
            .u64_histogram("inference_duration_ms")
            .with_boundaries(boundaries)
            .with_description("Duration of the forward pass in milliseconds")
            .build();

        Ok(Metrics {
            frames_processed,
            frames_dropped,
            inference_failures,
            signs_detected,
            inference_duration,
            registry,
            _provider: provider,
        })
    }

    pub fn record_frame(&self, dropped: usize, duration_ms: u64, stage: &str) {
        let attributes = vec![KeyValue::new("stage", stage.to_string())];
        self.frames_processed.add(1, &attributes);
        self.frames_dropped.add(dropped as u64, &attributes);
        self.inference_duration.record(duration_ms, &attributes);
    }

    pub fn record_failure(&self, stage: &str) {
        let attributes = vec![KeyValue::new("stage", stage.to_string())];
        self.inference_failures.add(1, &attributes);
    }

    pub fn record_sign(&self, stage: &str) {
        let attributes = vec![KeyValue::new("stage", stage.to_string())];
        self.signs_detected.add(1, &attributes);
    }
}

fn generate_boundaries(parts: (i32, i32, i32, i32, i32)) -> Vec<f64> {
    let first_step: usize = 5;
    let middle_step: usize = 5;
    let end_step: usize = 50;
    let tail_step: usize = 250;
    let first_part = (parts.0..=parts.1).step_by(first_step);
    let middle_part = (parts.1..=parts.2).step_by(middle_step);
    let end_part = (parts.2..=parts.3).step_by(end_step);
    let tail_part = (parts.3..=parts.4).step_by(tail_step);

    let mut seen = HashSet::new();
    first_part
        .chain(middle_part)
        .chain(end_part)
        .chain(tail_part)
        .filter(|&x| seen.insert(x))
        .map(|x| x as f64)
        .collect()
}
