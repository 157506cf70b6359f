use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "pressroom_jobs_total",
            Unit::Count,
            "Generation job executions by job type and result."
        );
        describe_counter!(
            "pressroom_render_total",
            Unit::Count,
            "Render sessions by result."
        );
        describe_histogram!(
            "pressroom_render_ms",
            Unit::Milliseconds,
            "Render session wall time in milliseconds, teardown included."
        );
        describe_counter!(
            "pressroom_assembler_missing_assets_total",
            Unit::Count,
            "Image references dropped from print payloads because they could not be resolved."
        );
        describe_counter!(
            "pressroom_download_tokens_issued_total",
            Unit::Count,
            "Download tokens minted."
        );
        describe_counter!(
            "pressroom_download_tokens_rejected_total",
            Unit::Count,
            "Download attempts rejected as expired, consumed or mismatched."
        );
        describe_counter!(
            "pressroom_rate_limited_total",
            Unit::Count,
            "Requests refused by an hourly cap or an active lockout."
        );
        describe_counter!(
            "pressroom_notifications_publish_failed_total",
            Unit::Count,
            "Job outcome notifications that could not be published."
        );
        describe_gauge!(
            "pressroom_ws_connections",
            Unit::Count,
            "Currently authenticated notification sockets."
        );
    });
}
