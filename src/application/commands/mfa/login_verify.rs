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
use crate::domain::models::device::fingerprint_from_attributes;

use super::responses::{json_error, json_success, map_mfa_error};

#[derive(Debug, Deserialize)]
pub struct LoginVerifyRequest {
    pub code: Option<String>,
    pub backup_code: Option<String>,
    pub device_name: Option<String>,
}

/// Answers the active challenge with a TOTP code or a backup code and
/// returns an MFA session token on success.
pub async fn verify_mfa_login(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<LoginVerifyRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    if body.code.is_none() && body.backup_code.is_none() {
        return Err(json_error(
            StatusCode::BAD_REQUEST,
            "Provide either a TOTP code or a backup code",
        ));
    }

    let fingerprint = body
        .device_name
        .as_deref()
        .map(|name| fingerprint_from_attributes(&[auth.claims.sub.as_str(), name]));

    let session = state
        .gate
        .verify_login(
            &auth.claims.sub,
            body.code.as_deref(),
            body.backup_code.as_deref(),
            fingerprint,
        )
        .await
        .map_err(map_mfa_error)?;

    Ok(json_success(json!({
        "session_token": session.session_token,
        "verified_at": session.verified_at,
        "expires_at": session.expires_at,
    })))
}
