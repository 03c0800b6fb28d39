pub mod disable;
pub mod force_sync;
pub mod login_challenge;
pub mod login_verify;
pub mod responses;
pub mod revoke_session;
pub mod rotate;
pub mod setup_start;
pub mod setup_verify;
