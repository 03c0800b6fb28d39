pub mod healthcheck;
pub mod middleware;
pub mod router;
