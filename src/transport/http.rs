//! Shared HTTP plumbing for the event-stream and WebSocket transports.
//!
//! Both transports run one axum server exposing:
//!
//! - `GET /health`: liveness of this process
//! - the transport's own routes ([`super::sse::routes`] or
//!   [`super::websocket::routes`])
//! - `/mcp`: MCP streamable-HTTP bridge ([`crate::mcp`])
//!
//! Shutdown is driven by the transport's cancellation token: open streams
//! and sockets end, then the server stops accepting connections.

use anyhow::{bail, Context, Result};
use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use std::net::SocketAddr;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use super::sse::Sessions;
use super::{ChannelTransport, RequestSink};
use crate::config::TransportKind;
use crate::mcp::{self, McpCatalog};

#[derive(Clone)]
pub(crate) struct HttpState {
    pub sink: RequestSink,
    pub sessions: Sessions,
    pub cancel: CancellationToken,
    pub started_at: Instant,
    pub transport: &'static str,
}

/// Binds `addr` and starts the HTTP transport of the given kind.
pub async fn bind(kind: TransportKind, addr: &str, tools: McpCatalog) -> Result<(ChannelTransport, SocketAddr)> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    serve(kind, listener, tools)
}

/// Starts the HTTP transport on an already-bound listener.
pub fn serve(kind: TransportKind, listener: TcpListener, tools: McpCatalog) -> Result<(ChannelTransport, SocketAddr)> {
    let local_addr = listener.local_addr()?;
    let name = match kind {
        TransportKind::Sse => "sse",
        TransportKind::Websocket => "websocket",
        TransportKind::Stdio => bail!("stdio is not an HTTP transport"),
    };

    let (mut transport, sink) = ChannelTransport::new(name);
    let cancel = transport.cancel_token();

    let state = HttpState {
        sink: sink.clone(),
        sessions: Sessions::default(),
        cancel: cancel.clone(),
        started_at: Instant::now(),
        transport: name,
    };

    let routes = match kind {
        TransportKind::Websocket => super::websocket::routes(),
        _ => super::sse::routes(),
    };

    let app = Router::new()
        .route("/health", get(health_handler))
        .merge(routes)
        .with_state(state)
        .nest_service("/mcp", mcp::service(sink, tools, cancel.child_token()))
        .layer(CorsLayer::permissive());

    tracing::info!(transport = name, %local_addr, "HTTP transport listening");

    transport.spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(cancel.cancelled_owned())
            .await
        {
            tracing::error!(error = %e, "HTTP transport failed");
        }
    });

    Ok((transport, local_addr))
}

async fn health_handler(State(state): State<HttpState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "transport": state.transport,
        "sessions": state.sessions.len(),
        "uptime_secs": state.started_at.elapsed().as_secs(),
    }))
}
