use axum::{
    extract::{Extension, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;

use crate::api::rest::middleware::AuthContext;
use crate::api::rest::router::AppState;

use super::responses::{json_success, map_mfa_error};

#[derive(Debug, Deserialize)]
pub struct SetupVerifyRequest {
    pub code: String,
}

/// Confirms a pending setup with a live code, turning MFA on for the
/// account.
pub async fn verify_mfa_setup(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<SetupVerifyRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    state
        .gate
        .verify_and_enable(&auth.claims.sub, &body.code)
        .await
        .map_err(map_mfa_error)?;

    Ok(json_success(json!({ "enabled": true })))
}
