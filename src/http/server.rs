//! HTTP server implementation.

use std::net::SocketAddr;

use axum::Router;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::error::Result;

/// HTTP server for the rate limited API.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// Application routes
    router: Router,
}

impl HttpServer {
    pub fn new(addr: SocketAddr, router: Router) -> Self {
        Self { addr, router }
    }

    /// Start the server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves. Client
    /// addresses are exposed to the admission middleware via `ConnectInfo`.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await?;

        info!(addr = %self.addr, "Starting HTTP server");

        axum::serve(
            listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            e.into()
        })
    }
}
