//! HTTP server module for the rate limit and configuration APIs.

mod handlers;
mod server;

pub use handlers::{router, AppState};
pub use server::HttpServer;
