//! HTTP event-stream transport.
//!
//! A client opens `GET /sse` and receives an `endpoint` event naming its
//! session's message URL (`/messages?session_id=…`). Requests are POSTed
//! there and acknowledged with `202 Accepted`; responses arrive on the
//! stream as `message` events, matched to requests by `id`.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive},
        IntoResponse, Response as HttpResponse, Sse,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::http::HttpState;
use super::Responder;
use crate::error::ApiError;
use crate::protocol::{decode_request, Response};

pub const STREAM_PATH: &str = "/sse";
pub const MESSAGES_PATH: &str = "/messages";

/// Open event streams by session id.
#[derive(Clone, Default)]
pub(crate) struct Sessions {
    inner: Arc<Mutex<HashMap<String, Responder>>>,
}

impl Sessions {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Responder>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn insert(&self, id: String, reply: Responder) {
        self.lock().insert(id, reply);
    }

    fn get(&self, id: &str) -> Option<Responder> {
        self.lock().get(id).cloned()
    }

    fn remove(&self, id: &str) {
        self.lock().remove(id);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }
}

/// Unregisters a session when its event stream is dropped.
struct SessionGuard {
    id: String,
    sessions: Sessions,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.sessions.remove(&self.id);
        tracing::debug!(session_id = %self.id, "event stream closed");
    }
}

pub(crate) fn routes() -> Router<HttpState> {
    Router::new()
        .route(STREAM_PATH, get(stream_handler))
        .route(MESSAGES_PATH, post(message_handler))
}

async fn stream_handler(
    State(state): State<HttpState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let session_id = uuid::Uuid::new_v4().to_string();
    let (reply, rx) = Responder::channel();
    state.sessions.insert(session_id.clone(), reply);
    tracing::debug!(session_id = %session_id, "event stream opened");

    let endpoint = Event::default()
        .event("endpoint")
        .data(format!("{}?session_id={}", MESSAGES_PATH, session_id));

    let guard = SessionGuard {
        id: session_id,
        sessions: state.sessions.clone(),
    };
    let messages = UnboundedReceiverStream::new(rx).map(move |response: Response| {
        let _ = &guard;
        Event::default().event("message").data(response.to_json_line())
    });

    let stream = stream::once(async move { endpoint })
        .chain(messages)
        .map(Ok)
        .take_until(state.cancel.cancelled_owned());

    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[derive(Debug, Deserialize)]
struct MessageQuery {
    session_id: String,
}

async fn message_handler(
    State(state): State<HttpState>,
    Query(query): Query<MessageQuery>,
    body: String,
) -> HttpResponse {
    let Some(reply) = state.sessions.get(&query.session_id) else {
        let err = ApiError::NotFound(format!("unknown session: {}", query.session_id));
        return (
            StatusCode::NOT_FOUND,
            Json(Response::err(serde_json::Value::Null, &err)),
        )
            .into_response();
    };

    match decode_request(&body) {
        Ok(request) => {
            if state.sink.forward(request, reply).await {
                (StatusCode::ACCEPTED, "Accepted").into_response()
            } else {
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(Response::err(
                        serde_json::Value::Null,
                        &ApiError::ServerShuttingDown,
                    )),
                )
                    .into_response()
            }
        }
        Err(response) => {
            reply.send(response.clone());
            (StatusCode::BAD_REQUEST, Json(response)).into_response()
        }
    }
}
