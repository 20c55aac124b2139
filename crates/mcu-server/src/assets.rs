//! Static asset server for the browser client

use std::net::SocketAddr;
use std::path::Path;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Router serving the files under `root`, with `index.html` for directories.
pub fn router(root: impl AsRef<Path>) -> Router {
    Router::new()
        .fallback_service(ServeDir::new(root).append_index_html_on_directories(true))
        .layer(TraceLayer::new_for_http())
}

/// Serve `root` on `addr` until the listener fails.
pub async fn serve(addr: SocketAddr, root: impl AsRef<Path>) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(
        "Asset server on http://{} serving {}",
        listener.local_addr()?,
        root.as_ref().display()
    );
    axum::serve(listener, router(root)).await
}
