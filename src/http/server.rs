//! HTTP server implementation.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{error, info};

use super::handlers::{router, AppState};
use crate::error::Result;
use crate::ratelimit::RateLimiter;

/// HTTP server for the rate limit service.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The rate limiter engine
    limiter: Arc<RateLimiter>,
}

impl HttpServer {
    /// Create a new HTTP server around a rate limiter engine.
    pub fn new(addr: SocketAddr, limiter: Arc<RateLimiter>) -> Self {
        Self { addr, limiter }
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server stops accepting requests when `signal` resolves, then
    /// the engine is drained: queued requests are rejected and in-flight
    /// work runs to completion.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let app = router(AppState {
            limiter: self.limiter.clone(),
        });

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        info!(addr = %self.addr, "Starting HTTP server for rate limit service");

        axum::serve(listener, app)
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP server failed");
                e
            })?;

        self.limiter.shutdown().await;
        Ok(())
    }
}
