use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;

use crate::api::rest::router::AppState;

use super::responses::json_success;

/// Revokes an MFA session unconditionally. Always answers success: once
/// this returns, the token is unusable on this node even if the remote
/// store could not be reached.
pub async fn revoke_mfa_session(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    state.gate.revoke_session(&token).await;

    Ok(json_success(json!({ "revoked": true })))
}
