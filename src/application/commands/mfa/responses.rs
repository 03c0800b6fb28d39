use axum::{http::StatusCode, Json};
use serde_json::{json, Value};

use crate::application::services::error::MfaError;
use crate::infrastructure::security::encryption::EncryptionError;

pub fn json_success(data: Value) -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({ "status": "success", "data": data })),
    )
}

pub fn json_created(data: Value) -> (StatusCode, Json<Value>) {
    (
        StatusCode::CREATED,
        Json(json!({ "status": "success", "data": data })),
    )
}

pub fn json_error(status: StatusCode, message: &str) -> (StatusCode, Json<Value>) {
    (
        status,
        Json(
            json!({ "status": if status.is_server_error() { "error" } else { "fail" }, "message": message }),
        ),
    )
}

pub fn map_mfa_error(err: MfaError) -> (StatusCode, Json<Value>) {
    match err {
        MfaError::Validation(message) => json_error(StatusCode::BAD_REQUEST, &message),
        MfaError::InvalidCode => json_error(StatusCode::UNAUTHORIZED, "Invalid authentication code"),
        MfaError::LockedOut(until) => json_error(
            StatusCode::TOO_MANY_REQUESTS,
            &format!("Too many failed attempts. Try again after {until}"),
        ),
        MfaError::Replay => json_error(
            StatusCode::CONFLICT,
            "Code has already been used in this window",
        ),
        MfaError::ChallengeNotFound => {
            json_error(StatusCode::NOT_FOUND, "Login challenge was not found")
        }
        MfaError::ExpiredChallenge => json_error(StatusCode::GONE, "Login challenge has expired"),
        MfaError::SecretNotFound => json_error(
            StatusCode::NOT_FOUND,
            "MFA is not set up for this account",
        ),
        MfaError::SyncConflict => json_error(
            StatusCode::CONFLICT,
            "MFA state changed on another device; repeat the operation",
        ),
        MfaError::StorageUnavailable => json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "MFA storage is temporarily unavailable",
        ),
        MfaError::BackupCodeExhausted => json_error(
            StatusCode::GONE,
            "All backup codes have been used; rotate to obtain new ones",
        ),
        MfaError::SessionNotFound => json_error(StatusCode::UNAUTHORIZED, "Session is not valid"),
        MfaError::SessionExpired => json_error(StatusCode::UNAUTHORIZED, "Session has expired"),
        MfaError::Internal => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "An internal error occurred",
        ),
        MfaError::Encryption(inner) => match inner {
            EncryptionError::InvalidKey => json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "MFA encryption key is invalid",
            ),
            EncryptionError::Encrypt | EncryptionError::Decrypt => json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Unable to process MFA secret",
            ),
        },
    }
}
