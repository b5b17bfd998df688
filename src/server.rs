//! HTTP server plumbing
//!
//! Thin wrappers around axum's serve loop: bind (port 0 picks an
//! ephemeral port, which the tests rely on), serve, and serve with
//! token-driven graceful shutdown.

use axum::Router;
use std::io;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Binds a listener, returning it with the resolved local address.
///
/// # Errors
///
/// Returns an error when the address cannot be bound.
pub async fn bind(host: &str, port: u16) -> io::Result<(TcpListener, SocketAddr)> {
    let listener = TcpListener::bind(format!("{host}:{port}")).await?;
    let addr = listener.local_addr()?;
    Ok((listener, addr))
}

/// Serves the application until the connection loop ends.
///
/// # Errors
///
/// Returns an error when the server fails while running.
pub async fn serve(listener: TcpListener, app: Router) -> io::Result<()> {
    axum::serve(listener, app).await.map_err(io::Error::other)
}

/// Serves the application until the token is cancelled, then drains
/// in-flight connections.
///
/// # Errors
///
/// Returns an error when the server fails while running.
pub async fn serve_with_graceful_shutdown(
    listener: TcpListener,
    app: Router,
    shutdown: CancellationToken,
) -> io::Result<()> {
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(io::Error::other)
}
