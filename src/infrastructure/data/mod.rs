pub mod legacy;
pub mod memory;
pub mod port;
pub mod surreal;
