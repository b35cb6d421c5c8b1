//! HTTP routes served by the node.

use std::sync::Arc;

use axum::Json;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use meshkit_http::HttpServer;
use meshkit_registry::{Registry, RegistryError};
use serde_json::json;

/// Mount `/healthz`, `/hello` and `/services/{name}` on `server`.
pub fn mount(server: &HttpServer, registry: &Arc<dyn Registry>) {
    let name = server.options().name;

    server.handle("/healthz", get(|| async { Json(json!({ "status": "ok" })) }));
    server.handle(
        "/hello",
        get(move || {
            let name = name.clone();
            async move { format!("hello from {name}") }
        }),
    );

    let registry = Arc::clone(registry);
    server.handle(
        "/services/{name}",
        get(move |Path(service): Path<String>| {
            let registry = Arc::clone(&registry);
            async move { lookup(registry.as_ref(), &service).await }
        }),
    );
}

async fn lookup(registry: &dyn Registry, service: &str) -> Response {
    match registry.lookup(service).await {
        Ok(found) if found.is_empty() => not_found(service),
        Ok(found) => Json(found).into_response(),
        Err(RegistryError::NotFound(_)) => not_found(service),
        Err(e) => {
            tracing::warn!(service, error = %e, "registry lookup failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

fn not_found(service: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("service '{service}' not found") })),
    )
        .into_response()
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use meshkit_registry::MemoryRegistry;
    use meshkit_runtime::ServerOptions;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    async fn get_raw(addr: std::net::SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let req = format!("GET {path} HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\r\n");
        stream.write_all(req.as_bytes()).await.unwrap();
        let mut buf = String::new();
        stream.read_to_string(&mut buf).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn node_routes_answer_and_expose_the_registry() {
        let registry: Arc<dyn Registry> = Arc::new(MemoryRegistry::new());
        let server = HttpServer::new(
            ServerOptions::http_defaults()
                .with_name("edge")
                .with_address("127.0.0.1:0"),
            registry.clone(),
        );
        mount(&server, &registry);
        server.start().await.unwrap();
        let addr = server.local_addr().unwrap();

        assert!(get_raw(addr, "/hello").await.ends_with("hello from edge"));
        assert!(get_raw(addr, "/healthz").await.contains(r#"{"status":"ok"}"#));

        let own = get_raw(addr, "/services/edge").await;
        assert!(own.starts_with("HTTP/1.1 200"));
        assert!(own.contains(&addr.to_string()));
        assert!(own.contains("/services/{name}"));

        let missing = get_raw(addr, "/services/ghost").await;
        assert!(missing.starts_with("HTTP/1.1 404"));
        assert!(missing.contains("service 'ghost' not found"));

        server.stop().await;
    }
}
