use axum::{
    http::{header, HeaderValue, StatusCode},
    response::IntoResponse,
};
use metrics::{describe_counter, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use tracing::{info, warn};

static RECORDER: OnceCell<PrometheusHandle> = OnceCell::new();

/// Installs the Prometheus recorder and registers descriptions for every
/// counter this crate emits. Safe to call more than once; only the first
/// call installs.
pub fn init_telemetry() {
    if RECORDER.get().is_some() {
        return;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            let _ = RECORDER.set(handle);
            describe_counters();
            info!("metrics recorder installed");
        }
        Err(err) => {
            warn!(error = %err, "metrics recorder not installed, /metrics will stay empty");
        }
    }
}

fn describe_counters() {
    describe_counter!(
        "mfa_lockouts_total",
        Unit::Count,
        "Accounts locked after repeated failed verifications"
    );
    describe_counter!(
        "mfa_sync_failures_total",
        Unit::Count,
        "Queued sync operations that were rejected or abandoned"
    );
    describe_counter!(
        "mfa_audit_events_total",
        Unit::Count,
        "Audit events recorded, labeled by action"
    );
    describe_counter!(
        "mfa_audit_event_errors_total",
        Unit::Count,
        "Audit events that could not be persisted"
    );
}

pub async fn metrics_handler() -> impl IntoResponse {
    match RECORDER.get() {
        Some(handle) => {
            let headers = [(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            )];
            (headers, handle.render()).into_response()
        }
        None => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}
