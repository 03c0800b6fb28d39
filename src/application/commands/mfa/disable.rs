use axum::{
    extract::{Extension, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;

use crate::api::rest::middleware::AuthContext;
use crate::api::rest::router::AppState;

use super::responses::{json_success, map_mfa_error};

/// Turns MFA off for the account. The credential record is kept for audit
/// continuity; a later setup starts a fresh secret.
pub async fn disable_mfa(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    state
        .gate
        .disable(&auth.claims.sub)
        .await
        .map_err(map_mfa_error)?;

    Ok(json_success(json!({ "enabled": false })))
}
