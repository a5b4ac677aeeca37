//! Transport adapters.
//!
//! A transport turns bytes from some channel into decoded [`Request`]s and
//! carries [`Response`]s back. The protocol server only sees the
//! [`Transport`] trait:
//!
//! ```text
//!   stdin/stdout ─┐
//!   /sse + POST  ─┼─▶ RequestSink ─▶ mpsc ─▶ ChannelTransport::receive() ─▶ ProtocolServer
//!   /ws          ─┤                                                            │
//!   /mcp         ─┘          ◀──────────── Responder::send(Response) ◀─────────┘
//! ```
//!
//! Each [`Inbound`] carries its own [`Responder`], so one transport can
//! serve many clients (SSE sessions, WebSocket connections) through a single
//! server loop. Frames that cannot be decoded are answered directly by the
//! transport with an `InvalidParameters` response and never reach the
//! server.

pub mod http;
pub mod sse;
pub mod stdio;
pub mod websocket;

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::ApiError;
use crate::protocol::{Request, Response};

/// Bound on requests queued between transport tasks and the server loop.
pub const INBOUND_QUEUE: usize = 256;

/// How long `close()` waits for a transport task before aborting it.
const TASK_GRACE: Duration = Duration::from_secs(2);

/// A decoded request plus the handle its response goes back through.
#[derive(Debug)]
pub struct Inbound {
    pub request: Request,
    pub reply: Responder,
}

/// Return path for responses to one client.
#[derive(Debug, Clone)]
pub struct Responder {
    tx: mpsc::UnboundedSender<Response>,
}

impl Responder {
    pub fn new(tx: mpsc::UnboundedSender<Response>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Response>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// Sends a response. A client that has gone away is not an error.
    pub fn send(&self, response: Response) {
        if self.tx.send(response).is_err() {
            tracing::debug!("client disconnected before its response was ready");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Source of requests for the protocol server.
#[async_trait]
pub trait Transport: Send {
    fn name(&self) -> &'static str;

    /// Next request, or `None` once the transport has no more clients.
    async fn receive(&mut self) -> Option<Inbound>;

    /// Stops accepting input and releases background tasks.
    async fn close(&mut self);
}

/// Handle transport tasks use to submit requests to the server loop.
#[derive(Debug, Clone)]
pub struct RequestSink {
    tx: mpsc::Sender<Inbound>,
}

impl RequestSink {
    /// Queues `request`; its response will arrive through `reply`.
    /// Returns `false` if the server loop has stopped.
    pub async fn forward(&self, request: Request, reply: Responder) -> bool {
        self.tx.send(Inbound { request, reply }).await.is_ok()
    }

    /// Submits `request` and waits for its response.
    pub async fn call(&self, request: Request) -> Response {
        let id = request.id.clone();
        let (reply, mut rx) = Responder::channel();
        if !self.forward(request, reply).await {
            return Response::err(id, &ApiError::ServerShuttingDown);
        }
        match rx.recv().await {
            Some(response) => response,
            None => Response::err(id, &ApiError::ServerShuttingDown),
        }
    }
}

/// Transport backed by an mpsc queue fed by background tasks.
///
/// The concrete adapters ([`stdio`], [`sse`], [`websocket`]) differ only in
/// the tasks they spawn to fill the queue.
pub struct ChannelTransport {
    name: &'static str,
    rx: mpsc::Receiver<Inbound>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl ChannelTransport {
    pub fn new(name: &'static str) -> (Self, RequestSink) {
        let (tx, rx) = mpsc::channel(INBOUND_QUEUE);
        let transport = Self {
            name,
            rx,
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
        };
        (transport, RequestSink { tx })
    }

    /// Token cancelled by [`close`](Transport::close); background tasks
    /// should stop reading input when it fires.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn spawn<F>(&mut self, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.tasks.push(tokio::spawn(task));
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn receive(&mut self) -> Option<Inbound> {
        self.rx.recv().await
    }

    async fn close(&mut self) {
        self.cancel.cancel();
        self.rx.close();
        for mut task in self.tasks.drain(..) {
            if tokio::time::timeout(TASK_GRACE, &mut task).await.is_err() {
                tracing::debug!(transport = self.name, "aborting transport task after grace period");
                task.abort();
            }
        }
    }
}
