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

/// Starts (or resumes) MFA setup and returns the provisioning material.
/// The secret and backup codes are only ever shown here; afterwards the
/// store holds ciphertext.
pub async fn start_mfa_setup(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let material = state
        .vault
        .generate(&auth.claims.sub, &auth.claims.username)
        .await
        .map_err(map_mfa_error)?;

    Ok(json_created(json!({
        "totp": {
            "uri": material.provisioning_uri,
            "qr_code": material.qr_code,
            "secret": material.secret,
            "digits": state.config.totp.digits,
            "step": state.config.totp.step,
            "window": state.config.totp.window,
        },
        "backup_codes": material.backup_codes,
    })))
}
