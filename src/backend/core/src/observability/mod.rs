//! Observability: Distributed Tracing, Metrics, and Logging.

use opentelemetry_otlp::WithExportConfig;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;
use crate::middleware::recover::panic_message;

/// Initialize the observability stack.
///
/// `RUST_LOG` wins over the configured level when set.
pub fn init(service_name: &str, config: &ObservabilityConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;

    // Set up OpenTelemetry tracing if endpoint is provided
    let telemetry_layer = match config.otlp_endpoint.as_deref() {
        Some(endpoint) => {
            let tracer = opentelemetry_otlp::new_pipeline()
                .tracing()
                .with_exporter(
                    opentelemetry_otlp::new_exporter()
                        .tonic()
                        .with_endpoint(endpoint),
                )
                .with_trace_config(
                    opentelemetry_sdk::trace::config().with_resource(
                        opentelemetry_sdk::Resource::new(vec![opentelemetry::KeyValue::new(
                            "service.name",
                            service_name.to_string(),
                        )]),
                    ),
                )
                .install_batch(opentelemetry_sdk::runtime::Tokio)?;

            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(telemetry_layer);

    if config.json_logging {
        registry.with(fmt::layer().json()).try_init()?;
    } else {
        registry.with(fmt::layer().pretty()).try_init()?;
    }

    install_panic_hook();
    self::metrics::register_metrics();

    Ok(())
}

/// Route panics through `tracing` with a backtrace.
///
/// The hook runs on the panicking thread, inside whatever request span is
/// active, so the event carries the request id.
pub fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let backtrace = std::backtrace::Backtrace::force_capture();
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_else(|| "unknown".to_string());

        tracing::error!(
            panic = %panic_message(info.payload()),
            location = %location,
            backtrace = %backtrace,
            "Panic"
        );
    }));
}

/// Shutdown OpenTelemetry.
pub fn shutdown() {
    opentelemetry::global::shutdown_tracer_provider();
}

/// Metrics registry and helpers.
pub mod metrics {
    use metrics::{describe_counter, describe_histogram};

    /// Register all metric descriptions.
    pub fn register_metrics() {
        // Counters
        describe_counter!(
            "http_requests_total",
            "Completed HTTP requests by method and status"
        );
        describe_counter!(
            "auth_errors_total",
            "Requests rejected by the authentication layer"
        );
        describe_counter!(
            "auth_success_total",
            "Requests authenticated, by subject kind"
        );
        describe_counter!(
            "authz_decisions_total",
            "Capability checks by outcome"
        );
        describe_counter!(
            "access_log_dropped_total",
            "Access log records dropped because the writer fell behind"
        );
        describe_counter!(
            "http_panics_recovered_total",
            "Handler panics converted into 500 responses"
        );
        describe_counter!(
            "parrot_errors_total",
            "API errors by code and category"
        );

        // Histograms
        describe_histogram!(
            "http_request_duration_seconds",
            "Request latency in seconds"
        );
    }
}
