//! WebSocket transport at `/ws`.
//!
//! Each text (or UTF-8 binary) frame carries one request; each response is
//! sent back as one text frame. A binary frame that is not UTF-8 is answered
//! with an `InvalidParameters` error. A connection's requests are dispatched
//! in arrival order and their responses may interleave.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use tokio_util::sync::CancellationToken;

use super::http::HttpState;
use super::{RequestSink, Responder};
use crate::protocol::{decode_request, decode_request_bytes};

pub const WS_PATH: &str = "/ws";

pub(crate) fn routes() -> Router<HttpState> {
    Router::new().route(WS_PATH, get(upgrade_handler))
}

async fn upgrade_handler(ws: WebSocketUpgrade, State(state): State<HttpState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_session(socket, state.sink, state.cancel))
}

async fn run_session(socket: WebSocket, sink: RequestSink, cancel: CancellationToken) {
    let connection = uuid::Uuid::new_v4();
    tracing::debug!(%connection, "websocket connected");

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (reply, mut outbound) = Responder::channel();

    let send_loop = tokio::spawn(async move {
        while let Some(response) = outbound.recv().await {
            if ws_sender
                .send(Message::Text(response.to_json_line().into()))
                .await
                .is_err()
            {
                tracing::debug!(%connection, "websocket send failed, closing");
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = ws_receiver.next() => frame,
        };
        let decoded = match frame {
            Some(Ok(Message::Text(text))) => decode_request(text.as_str()),
            Some(Ok(Message::Binary(bytes))) => decode_request_bytes(&bytes),
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                tracing::debug!(%connection, error = %e, "websocket receive failed");
                break;
            }
        };

        match decoded {
            Ok(request) => {
                if !sink.forward(request, reply.clone()).await {
                    break;
                }
            }
            Err(response) => reply.send(response),
        }
    }

    // The send loop keeps running until responses for requests already in
    // flight have been delivered.
    drop(reply);
    if let Err(e) = send_loop.await {
        tracing::debug!(%connection, error = %e, "websocket send loop ended abnormally");
    }
    tracing::debug!(%connection, "websocket disconnected");
}
