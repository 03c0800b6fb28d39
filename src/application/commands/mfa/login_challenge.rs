use axum::{
    extract::{Extension, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;

use crate::api::rest::middleware::AuthContext;
use crate::api::rest::router::AppState;

use super::responses::{json_created, map_mfa_error};

/// Issues a short-lived login challenge for an MFA-enabled account.
pub async fn request_mfa_challenge(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let challenge = state
        .gate
        .request_challenge(&auth.claims.sub)
        .await
        .map_err(map_mfa_error)?;

    Ok(json_created(json!({
        "challenge_id": challenge.id,
        "issued_at": challenge.issued_at,
        "expires_at": challenge.expires_at,
    })))
}
