pub mod audit_entry;
pub mod credential;
pub mod device;
pub mod session;
pub mod sync_entry;
