use std::sync::OnceLock;

use opentelemetry::global;
use opentelemetry::trace::TracerProvider as _;
use strum_macros::{Display, EnumString};
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::error::TelemetryError;

static TRACING_INITIALISED: OnceLock<Result<(), TelemetryError>> = OnceLock::new();

/// Output format of the log layer.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line human-readable events.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

/// Installs a global subscriber with an env-filtered log layer and an
/// OpenTelemetry layer.
///
/// The filter comes from `RUST_LOG` and falls back to `warn`. Only the first
/// call installs anything; later calls return the first result.
///
/// # Errors
///
/// Returns an error when another global subscriber is already installed.
pub fn initialise_tracing(
    service_name: &str,
    format: LogFormat,
) -> Result<(), &'static TelemetryError> {
    TRACING_INITIALISED
        .get_or_init(|| initialise_tracing_once(service_name, format))
        .as_ref()
        .copied()
}

fn initialise_tracing_once(service_name: &str, format: LogFormat) -> Result<(), TelemetryError> {
    let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder().build();
    let tracer = tracer_provider.tracer(service_name.to_owned());
    global::set_tracer_provider(tracer_provider);

    let log_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let formatting_layer = match format {
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_target(false)
            .with_filter(log_filter)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(false)
            .with_filter(log_filter)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(formatting_layer)
        .with(OpenTelemetryLayer::new(tracer))
        .try_init()?;

    Ok(())
}
