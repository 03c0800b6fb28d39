use axum::{
    extract::{Extension, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;

use crate::api::rest::middleware::AuthContext;
use crate::api::rest::router::AppState;
use crate::application::commands::mfa::responses::{json_success, map_mfa_error};

/// Credential summary plus local sync state. Served from the local cache
/// first, so the answer reflects this device's latest mutations.
pub async fn get_mfa_status(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let credential = state
        .sync
        .credential(&auth.claims.sub)
        .await
        .map_err(map_mfa_error)?;
    let sync_status = state.sync.status(&auth.claims.sub).await;

    let credential_payload = credential.as_ref().map(|cred| {
        json!({
            "enabled": cred.enabled,
            "verified": cred.verified,
            "pending_setup": cred.is_pending(),
            "backup_codes_remaining": cred.backup_codes_remaining(),
            "locked": cred.is_locked(chrono::Utc::now()),
            "locked_until": cred.locked_until,
            "last_used_at": cred.last_used_at,
            "created_at": cred.created_at,
            "updated_at": cred.updated_at,
            "version": cred.version,
        })
    });

    Ok(json_success(json!({
        "enabled": credential.as_ref().map(|cred| cred.enabled).unwrap_or(false),
        "session_state": state.gate.gate_state(&auth.claims.sub).await,
        "credential": credential_payload,
        "sync": {
            "pending_count": sync_status.pending_count,
            "last_error": sync_status.last_error,
        },
    })))
}
