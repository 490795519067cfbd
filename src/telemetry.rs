use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// Initialize tracing with structured JSON output.
///
/// Every workflow operation logs with its store key and channel attached, so
/// downstream log aggregation can reconstruct one workflow's lifecycle from
/// interleaved output.
pub fn init_telemetry() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true),
        )
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Partyline telemetry initialized with structured logging");
    Ok(())
}

/// Generate a correlation ID for linking related operations
pub fn generate_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Create a span carrying the common workflow attributes
pub fn create_workflow_span(
    workflow: &str,
    key: &str,
    channel: Option<&str>,
    correlation_id: Option<&str>,
) -> tracing::Span {
    tracing::info_span!(
        "workflow",
        workflow = workflow,
        store.key = key,
        channel = channel,
        correlation.id = correlation_id,
    )
}

/// Shutdown telemetry gracefully
pub fn shutdown_telemetry() {
    // Structured logging needs no explicit flush.
    tracing::info!("Partyline telemetry shutdown complete");
}
