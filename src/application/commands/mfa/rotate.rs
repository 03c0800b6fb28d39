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

/// Re-rolls the secret and backup codes for an enabled credential. The
/// authenticator app must be re-provisioned from the returned material.
pub async fn rotate_mfa_secret(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let material = state
        .vault
        .rotate(&auth.claims.sub, &auth.claims.username)
        .await
        .map_err(map_mfa_error)?;

    Ok(json_created(json!({
        "totp": {
            "uri": material.provisioning_uri,
            "qr_code": material.qr_code,
            "secret": material.secret,
        },
        "backup_codes": material.backup_codes,
    })))
}
