//! HTTP server implementation

use axum::{routing::get, Router};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::info;

use super::handlers::{health_handler, storages_handler};
use crate::service::Service;

/// Build the application router
pub fn router(service: Arc<Service>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/storages", get(storages_handler))
        .layer(CorsLayer::permissive())
        .with_state(service)
}

/// Run the admin server until the service shuts down
pub async fn run_web_server(addr: &str, service: Arc<Service>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve_web(listener, service).await
}

/// Serve the admin API on an already bound listener
pub async fn serve_web(listener: TcpListener, service: Arc<Service>) -> anyhow::Result<()> {
    info!("Admin interface available at http://{}", listener.local_addr()?);

    let shutdown = service.shutdown_token();
    axum::serve(listener, router(service))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("Admin server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    async fn http_get(addr: std::net::SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!(
            "GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
            path
        );
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_routes() {
        let service = Arc::new(Service::from_config(&Config::default()).unwrap());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(serve_web(listener, service.clone()));

        let health = http_get(addr, "/health").await;
        assert!(health.starts_with("HTTP/1.1 200"));
        assert!(health.contains(r#""status":"ok""#));

        let storages = http_get(addr, "/storages").await;
        assert!(storages.contains(r#""name":"memory""#));

        let missing = http_get(addr, "/nope").await;
        assert!(missing.starts_with("HTTP/1.1 404"));

        service.shutdown().await.unwrap();
        assert!(handle.await.unwrap().is_ok());
    }
}
