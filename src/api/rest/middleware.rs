use std::convert::Infallible;

use axum::{
    body::Body,
    extract::State,
    http::{header::AUTHORIZATION, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use log::{error, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::api::rest::router::AppState;

/// Bearer-token claims issued by the surrounding login service. This crate
/// only consumes them; `sub` is the user id the MFA state is keyed by.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub username: String,
    pub exp: usize,
    pub iat: usize,
}

#[derive(Clone, Debug)]
pub struct AuthContext {
    pub claims: Claims,
}

fn parse_bearer_token(header_value: &str) -> Option<&str> {
    let mut segments = header_value.split_whitespace();

    match (segments.next(), segments.next(), segments.next()) {
        (Some(scheme), Some(token), None) if scheme.eq_ignore_ascii_case("bearer") => {
            if token.is_empty() {
                None
            } else {
                Some(token)
            }
        }
        _ => None,
    }
}

fn json_response(status: StatusCode, level: &str, message: &str) -> Response {
    let payload = Json(json!({
        "status": level,
        "message": message,
    }));

    let mut response = payload.into_response();
    *response.status_mut() = status;
    response
}

pub async fn require_jwt(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, Infallible> {
    let secret = match &state.config.jwt_secret {
        Some(secret) => secret.clone(),
        None => {
            error!("JWT_SECRET is not configured; rejecting request");
            return Ok(json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "error",
                "Authentication service is not configured correctly",
            ));
        }
    };

    let raw_header = match req.headers().get(AUTHORIZATION) {
        Some(value) => value,
        None => {
            return Ok(json_response(
                StatusCode::UNAUTHORIZED,
                "fail",
                "Missing Authorization header",
            ));
        }
    };

    let header_value = match raw_header.to_str() {
        Ok(value) => value,
        Err(_) => {
            return Ok(json_response(
                StatusCode::UNAUTHORIZED,
                "fail",
                "Authorization header is not valid UTF-8",
            ));
        }
    };

    let token = match parse_bearer_token(header_value) {
        Some(token) => token.to_owned(),
        None => {
            return Ok(json_response(
                StatusCode::UNAUTHORIZED,
                "fail",
                "Authorization header must use the Bearer scheme",
            ));
        }
    };

    match decode::<Claims>(
        &token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    ) {
        Ok(data) => {
            req.extensions_mut().insert(AuthContext {
                claims: data.claims,
            });

            Ok(next.run(req).await)
        }
        Err(err) => {
            warn!("JWT validation failed: {err}");
            Ok(json_response(
                StatusCode::UNAUTHORIZED,
                "fail",
                "Token verification failed",
            ))
        }
    }
}
