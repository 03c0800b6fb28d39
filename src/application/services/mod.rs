pub mod audit;
pub mod config;
pub mod error;
pub mod events;
pub mod lockout;
pub mod session_gate;
pub mod sync;
pub mod totp;
pub mod vault;
