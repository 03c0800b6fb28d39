use axum::{response::IntoResponse, Json};
use serde_json::json;

pub async fn health_checker_handler() -> impl IntoResponse {
    Json(json!({
        "status": "success",
        "message": "MFA gate is running",
    }))
}
