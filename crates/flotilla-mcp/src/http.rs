//! HTTP transport for remote AI agents.
//!
//! Exposes the MCP protocol through rmcp's `StreamableHttpService`.
//!
//! ## Endpoints
//!
//! - `POST /mcp` - JSON-RPC requests
//! - `GET /mcp` - SSE stream for server-initiated messages
//! - `GET /health` - Health check with the managed microVM count
//! - `GET /` - Server info

use crate::server::FlotillaServer;
use axum::{
    extract::State,
    response::{Html, IntoResponse, Json},
    routing::get,
    Router,
};
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpServerConfig, StreamableHttpService,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the HTTP router for the MCP server.
pub fn build_router(server: FlotillaServer) -> Router {
    tracing::debug!("Building HTTP router");

    let session_manager = Arc::new(LocalSessionManager::default());
    let mcp_server = server.clone();
    let mcp_service = StreamableHttpService::new(
        move || Ok(mcp_server.clone()),
        session_manager,
        StreamableHttpServerConfig::default(),
    );

    Router::new()
        .route("/health", get(health_handler))
        .route("/", get(root_handler))
        .with_state(server)
        .fallback_service(mcp_service)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

async fn health_handler(State(server): State<FlotillaServer>) -> impl IntoResponse {
    tracing::trace!("Health check request");
    let orchestrator = server.orchestrator();
    let status = if orchestrator.is_closed().await {
        "closing"
    } else {
        "healthy"
    };
    Json(serde_json::json!({
        "status": status,
        "service": "flotilla-mcp",
        "namespace": orchestrator.namespace(),
        "instances": orchestrator.count().await,
    }))
}

async fn root_handler() -> impl IntoResponse {
    Html(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>Flotilla MCP Server</title>
    <style>
        body { font-family: system-ui; max-width: 800px; margin: 50px auto; padding: 20px; }
        code { background: #f4f4f4; padding: 2px 6px; border-radius: 3px; }
        pre { background: #f4f4f4; padding: 16px; border-radius: 6px; overflow-x: auto; }
    </style>
</head>
<body>
    <h1>Flotilla MCP Server</h1>
    <p>Model Context Protocol server for Firecracker microVM lifecycles.</p>

    <h2>Endpoints</h2>
    <ul>
        <li><code>POST /mcp</code> - MCP JSON-RPC requests</li>
        <li><code>GET /mcp</code> - SSE stream for server messages</li>
        <li><code>GET /health</code> - Health check</li>
    </ul>

    <h2>Example</h2>
    <pre>curl -X POST http://localhost:8080/mcp \
  -H "Content-Type: application/json" \
  -d '{"jsonrpc":"2.0","id":1,"method":"tools/list"}'</pre>

    <h2>Available Tools</h2>
    <ul>
        <li><code>create_vm</code> - Create and start a microVM</li>
        <li><code>destroy_vm</code> - Stop and remove a microVM</li>
        <li><code>list_vms</code> - List managed microVMs</li>
        <li><code>get_vm</code> - Status of one microVM</li>
        <li><code>preflight</code> - Host diagnostics</li>
    </ul>
</body>
</html>"#,
    )
}

/// Start the HTTP server. Runs until `shutdown` resolves.
pub async fn serve(
    server: FlotillaServer,
    addr: std::net::SocketAddr,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), std::io::Error> {
    let router = build_router(server);

    tracing::info!(%addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}
