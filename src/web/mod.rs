//! HTTP gateway.
//!
//! Owner routes under `/files` and `/share` require a bearer token; the
//! share download route is anonymous and gated by the link and a password.

pub mod dto;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod server;

pub use error::ApiError;
pub use handlers::AppState;
pub use router::create_router;
pub use server::WebServer;
