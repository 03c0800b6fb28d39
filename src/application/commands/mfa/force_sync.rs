use axum::{
    extract::{Extension, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;

use crate::api::rest::middleware::AuthContext;
use crate::api::rest::router::AppState;

use super::responses::json_success;

/// Runs one drain pass of the local mutation queue and reports what is
/// still pending for the caller.
pub async fn force_mfa_sync(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let status = state.sync.force_sync(&auth.claims.sub).await;

    Ok(json_success(json!({
        "pending_count": status.pending_count,
        "last_error": status.last_error,
    })))
}
