use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};

use crate::api::rest::healthcheck::health_checker_handler;
use crate::api::rest::middleware::require_jwt;
use crate::application::commands::mfa::{
    disable::disable_mfa, force_sync::force_mfa_sync, login_challenge::request_mfa_challenge,
    login_verify::verify_mfa_login, revoke_session::revoke_mfa_session,
    rotate::rotate_mfa_secret, setup_start::start_mfa_setup, setup_verify::verify_mfa_setup,
};
use crate::application::queries::mfa_status_query::get_mfa_status;
use crate::application::services::config::MfaConfig;
use crate::application::services::session_gate::SessionGate;
use crate::application::services::sync::SyncCoordinator;
use crate::application::services::vault::SecretVault;
use crate::infrastructure::telemetry::metrics_handler;

/// Everything the handlers need, injected at startup. No component reaches
/// for globals.
#[derive(Clone)]
pub struct AppState {
    pub gate: Arc<SessionGate>,
    pub vault: Arc<SecretVault>,
    pub sync: Arc<SyncCoordinator>,
    pub config: Arc<MfaConfig>,
}

pub fn create_router(state: AppState) -> Router {
    let mfa_router = Router::new()
        .route("/mfa/setup/", post(start_mfa_setup))
        .route("/mfa/setup/verify/", post(verify_mfa_setup))
        .route("/mfa/login/challenge/", post(request_mfa_challenge))
        .route("/mfa/login/verify/", post(verify_mfa_login))
        .route("/mfa/status/", get(get_mfa_status))
        .route("/mfa/rotate/", post(rotate_mfa_secret))
        .route("/mfa/sync/", post(force_mfa_sync))
        .route("/mfa/sessions/:token/", delete(revoke_mfa_session))
        .route("/mfa/", delete(disable_mfa))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_jwt));

    let api_router = mfa_router.route("/healthcheck/", get(health_checker_handler));

    Router::new()
        .nest("/api", api_router)
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}
