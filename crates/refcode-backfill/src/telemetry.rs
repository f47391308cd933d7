//! # Telemetry
//!
//! Logs always go to the console through `tracing_subscriber::fmt`, filtered
//! by `RUST_LOG` (default `info`).
//!
//! ## Feature matrix
//!
//! - `metrics`: OpenTelemetry counters and histograms for the backfill.
//! - `stdout`: exports those metrics to stdout every 5 seconds.
//!
//! Without `metrics`, the recording helpers below compile to no-ops.
//!
//! ```bash
//! cargo run -p refcode-backfill --features metrics,stdout
//! ```

// Disallow using `stdout` without `metrics`
#[cfg(all(feature = "stdout", not(feature = "metrics")))]
compile_error!("The 'stdout' feature requires 'metrics' to be enabled.");

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(feature = "metrics")]
use opentelemetry::metrics::{Counter, Histogram, Meter};
#[cfg(feature = "metrics")]
use opentelemetry::{InstrumentationScope, KeyValue};
#[cfg(feature = "metrics")]
use opentelemetry_sdk::Resource;
#[cfg(feature = "metrics")]
use opentelemetry_sdk::metrics as sdkmetrics;
#[cfg(feature = "metrics")]
use opentelemetry_semantic_conventions as semvcns;
#[cfg(feature = "metrics")]
use std::sync::OnceLock;

pub struct TelemetryProviders {
    #[cfg(feature = "metrics")]
    pub meter_provider: sdkmetrics::SdkMeterProvider,
}

impl TelemetryProviders {
    /// Flushes and stops the exporters. Errors are printed, not returned:
    /// the batch result matters more than the last metrics interval.
    pub fn shutdown(self) {
        #[cfg(feature = "metrics")]
        {
            if let Err(err) = self.meter_provider.force_flush() {
                eprintln!("Error flushing metrics: {err:#?}");
            }
            if let Err(err) = self.meter_provider.shutdown() {
                eprintln!("Error shutting down meter: {err:#?}");
            }
        }
    }
}

pub fn init_telemetry() -> anyhow::Result<TelemetryProviders> {
    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_line_number(true)
                .with_target(false)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                .with_file(true),
        );
    registry.try_init()?;

    #[cfg(feature = "metrics")]
    let meter_provider = {
        let meter_provider = init_metrics();
        opentelemetry::global::set_meter_provider(meter_provider.clone());
        let scope = InstrumentationScope::builder("refcode")
            .with_version(env!("CARGO_PKG_VERSION"))
            .with_schema_url(semvcns::SCHEMA_URL)
            .build();
        init_metric_handles(&opentelemetry::global::meter_with_scope(scope));
        meter_provider
    };

    Ok(TelemetryProviders {
        #[cfg(feature = "metrics")]
        meter_provider,
    })
}

#[cfg(feature = "metrics")]
fn resource() -> Resource {
    Resource::builder()
        .with_service_name("refcode-backfill")
        .with_schema_url(
            [KeyValue::new(
                semvcns::resource::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            )],
            semvcns::SCHEMA_URL,
        )
        .build()
}

#[cfg(feature = "metrics")]
fn init_metrics() -> sdkmetrics::SdkMeterProvider {
    let builder = sdkmetrics::SdkMeterProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = {
        use opentelemetry_stdout::MetricExporter;
        let exporter = MetricExporter::default();
        let reader = sdkmetrics::PeriodicReader::builder(exporter)
            .with_interval(std::time::Duration::from_secs(5))
            .build();

        builder.with_reader(reader)
    };

    builder.build()
}

#[cfg(feature = "metrics")]
static CODES_ASSIGNED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static ASSIGN_FAILURES: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static ASSIGN_RETRIES: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static CODE_COLLISIONS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static ROUND_DURATION_MS: OnceLock<Histogram<f64>> = OnceLock::new();

#[cfg(feature = "metrics")]
fn init_metric_handles(meter: &Meter) {
    let _ = CODES_ASSIGNED.set(
        meter
            .u64_counter("codes_assigned")
            .with_description("Entities that received or propagated a code")
            .build(),
    );

    let _ = ASSIGN_FAILURES.set(
        meter
            .u64_counter("assign_failures")
            .with_description("Assignment tasks that ended in failure")
            .build(),
    );

    let _ = ASSIGN_RETRIES.set(
        meter
            .u64_counter("assign_retries")
            .with_description("Attempts restarted after a transient failure")
            .build(),
    );

    let _ = CODE_COLLISIONS.set(
        meter
            .u64_counter("code_collisions")
            .with_description("Candidates rejected as already taken")
            .build(),
    );

    let _ = ROUND_DURATION_MS.set(
        meter
            .f64_histogram("round_duration")
            .with_unit("ms")
            .with_description("Wall time of one round, resolution included")
            .build(),
    );
}

// Convenience functions that compile to no-ops when metrics are disabled
#[cfg(feature = "metrics")]
pub fn increment_codes_assigned(round: u32) {
    if let Some(counter) = CODES_ASSIGNED.get() {
        counter.add(1, &[KeyValue::new("round", i64::from(round))]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_codes_assigned(_round: u32) {}

#[cfg(feature = "metrics")]
pub fn increment_assign_failures(stage: &'static str) {
    if let Some(counter) = ASSIGN_FAILURES.get() {
        counter.add(1, &[KeyValue::new("stage", stage)]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_assign_failures(_stage: &'static str) {}

#[cfg(feature = "metrics")]
pub fn increment_assign_retries() {
    if let Some(counter) = ASSIGN_RETRIES.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_assign_retries() {}

#[cfg(feature = "metrics")]
pub fn increment_code_collisions() {
    if let Some(counter) = CODE_COLLISIONS.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_code_collisions() {}

#[cfg(feature = "metrics")]
pub fn record_round_duration(duration_ms: f64) {
    if let Some(histogram) = ROUND_DURATION_MS.get() {
        histogram.record(duration_ms, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn record_round_duration(_duration_ms: f64) {}
