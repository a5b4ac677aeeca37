//! Protocol server lifecycle.
//!
//! ```text
//!   Starting ──health ok──▶ Ready ──shutdown / end of input──▶ Draining ──▶ Stopped
//!      │                                                          ▲
//!      └──────────────health failed (fatal)───────────────────────┘ (skips Ready)
//! ```
//!
//! - **Starting**: one upstream health probe. Failure is fatal; the server
//!   never becomes `Ready`.
//! - **Ready**: receive from the transport, dispatch every request on its
//!   own task, send the response through the request's [`Responder`].
//!   Requests are spawned in arrival order and may complete in any order.
//! - **Draining**: in-flight requests run to completion; new requests are
//!   answered with `ServerShuttingDown`. After the drain timeout anything
//!   still running is abandoned and its client is told `ServerShuttingDown`.
//! - **Stopped**: the transport is closed.
//!
//! [`Responder`]: crate::transport::Responder

use anyhow::anyhow;
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::dispatch::Dispatcher;
use crate::error::ApiError;
use crate::protocol::Response;
use crate::transport::{Inbound, Responder, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ServerState {
    Starting,
    Ready,
    Draining,
    Stopped,
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ServerState::Starting => "starting",
            ServerState::Ready => "ready",
            ServerState::Draining => "draining",
            ServerState::Stopped => "stopped",
        })
    }
}

pub struct ProtocolServer {
    dispatcher: Arc<Dispatcher>,
    drain_timeout: Duration,
    state: watch::Sender<ServerState>,
}

/// Requests dispatched but not yet answered, keyed by sequence number.
type Pending = HashMap<u64, (Value, Responder)>;

impl ProtocolServer {
    pub fn new(dispatcher: Arc<Dispatcher>, drain_timeout: Duration) -> Self {
        let (state, _) = watch::channel(ServerState::Starting);
        Self {
            dispatcher,
            drain_timeout,
            state,
        }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    fn transition(&self, next: ServerState) {
        let prev = self.state.send_replace(next);
        tracing::info!(from = %prev, to = %next, "server state");
    }

    /// Runs the full lifecycle on `transport` until `shutdown` fires or the
    /// transport runs out of input.
    pub async fn run<T>(&self, transport: &mut T, shutdown: CancellationToken) -> anyhow::Result<()>
    where
        T: Transport + ?Sized,
    {
        tracing::info!(transport = transport.name(), "starting protocol server");
        if let Err(e) = self.dispatcher.health().await {
            tracing::error!(error = %e, "startup health check failed");
            self.transition(ServerState::Stopped);
            transport.close().await;
            return Err(anyhow!("startup health check failed: {}", e));
        }
        self.transition(ServerState::Ready);

        let mut inflight: JoinSet<u64> = JoinSet::new();
        let mut pending: Pending = HashMap::new();
        let mut next_seq: u64 = 0;
        let mut end_of_input = false;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                inbound = transport.receive() => match inbound {
                    Some(inbound) => {
                        next_seq += 1;
                        self.spawn(&mut inflight, &mut pending, next_seq, inbound);
                    }
                    None => {
                        end_of_input = true;
                        break;
                    }
                },
                Some(done) = inflight.join_next(), if !inflight.is_empty() => {
                    settle(&mut pending, done);
                }
            }
        }

        self.transition(ServerState::Draining);
        self.drain(transport, &mut inflight, &mut pending, end_of_input)
            .await;

        transport.close().await;
        self.transition(ServerState::Stopped);
        Ok(())
    }

    fn spawn(&self, inflight: &mut JoinSet<u64>, pending: &mut Pending, seq: u64, inbound: Inbound) {
        let Inbound { request, reply } = inbound;
        pending.insert(seq, (request.id.clone(), reply.clone()));

        let dispatcher = self.dispatcher.clone();
        inflight.spawn(async move {
            let id = request.id.clone();
            let method = request.method.clone();
            let response = match AssertUnwindSafe(dispatcher.handle(request))
                .catch_unwind()
                .await
            {
                Ok(response) => response,
                Err(_) => {
                    tracing::error!(method = %method, "request handler panicked");
                    Response::err(id, &ApiError::Transient("internal error while handling request".into()))
                }
            };
            reply.send(response);
            seq
        });
    }

    async fn drain<T>(
        &self,
        transport: &mut T,
        inflight: &mut JoinSet<u64>,
        pending: &mut Pending,
        mut end_of_input: bool,
    ) where
        T: Transport + ?Sized,
    {
        tracing::info!(
            in_flight = inflight.len(),
            timeout_secs = self.drain_timeout.as_secs(),
            "draining"
        );
        let deadline = tokio::time::sleep(self.drain_timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    tracing::warn!(abandoned = inflight.len(), "drain timeout elapsed, abandoning requests");
                    inflight.abort_all();
                    for (_, (id, reply)) in pending.drain() {
                        reply.send(Response::err(id, &ApiError::ServerShuttingDown));
                    }
                    break;
                }
                done = inflight.join_next() => match done {
                    Some(done) => settle(pending, done),
                    None => break,
                },
                inbound = transport.receive(), if !end_of_input => match inbound {
                    Some(Inbound { request, reply }) => {
                        tracing::debug!(method = %request.method, "rejecting request while draining");
                        reply.send(Response::err(request.id, &ApiError::ServerShuttingDown));
                    }
                    None => end_of_input = true,
                },
            }
        }
    }
}

fn settle(pending: &mut Pending, done: Result<u64, tokio::task::JoinError>) {
    match done {
        Ok(seq) => {
            pending.remove(&seq);
        }
        Err(e) if e.is_cancelled() => {}
        Err(e) => tracing::error!(error = %e, "request task failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{KnowledgeApi, Operation};
    use crate::config::Config;
    use crate::error::{ApiResult, ErrorKind};
    use crate::protocol::Request;
    use crate::transport::ChannelTransport;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Upstream whose health can be toggled and whose searches take a while.
    struct SlowApi {
        healthy: AtomicBool,
        delay: Duration,
    }

    #[async_trait]
    impl KnowledgeApi for SlowApi {
        async fn call(&self, op: Operation, _params: Value) -> ApiResult<Value> {
            match op {
                Operation::Health if self.healthy.load(Ordering::SeqCst) => Ok(json!({ "data": [] })),
                Operation::Health => Err(ApiError::Unauthorized("bad key".into())),
                _ => {
                    tokio::time::sleep(self.delay).await;
                    Ok(json!({ "id": "ds1", "name": "Support" }))
                }
            }
        }
    }

    fn server(healthy: bool, delay: Duration, drain: Duration) -> Arc<ProtocolServer> {
        let api = Arc::new(SlowApi {
            healthy: AtomicBool::new(healthy),
            delay,
        });
        let mut config = Config::default();
        config.upstream.api_key = "dataset-test".into();
        let dispatcher = Dispatcher::from_config(api, &config).unwrap();
        Arc::new(ProtocolServer::new(Arc::new(dispatcher), drain))
    }

    #[tokio::test]
    async fn test_startup_health_failure_never_ready() {
        let server = server(false, Duration::ZERO, Duration::from_secs(1));
        let mut states = server.subscribe();
        let (mut transport, _sink) = ChannelTransport::new("test");
        let result = server.run(&mut transport, CancellationToken::new()).await;
        assert!(result.is_err());
        assert_eq!(server.state(), ServerState::Stopped);
        // Ready was never published
        assert_ne!(*states.borrow_and_update(), ServerState::Ready);
    }

    #[tokio::test]
    async fn test_end_of_input_stops_after_inflight_complete() {
        let server = server(true, Duration::from_millis(50), Duration::from_secs(5));
        let (mut transport, sink) = ChannelTransport::new("test");

        let client = tokio::spawn(async move {
            sink.call(Request::new(1, "get_dataset", json!({ "dataset_id": "ds1" })))
                .await
        });
        let run = server.run(&mut transport, CancellationToken::new());
        let (response, result) = tokio::join!(client, run);
        result.unwrap();
        let response = response.unwrap();
        assert!(response.success, "{:?}", response);
        assert_eq!(server.state(), ServerState::Stopped);
    }

    #[tokio::test]
    async fn test_draining_rejects_new_requests() {
        let server = server(true, Duration::from_millis(300), Duration::from_secs(5));
        let (mut transport, sink) = ChannelTransport::new("test");
        let shutdown = CancellationToken::new();
        let mut states = server.subscribe();

        let runner = {
            let server = server.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { server.run(&mut transport, shutdown).await })
        };

        states.wait_for(|s| *s == ServerState::Ready).await.unwrap();
        let slow = {
            let sink = sink.clone();
            tokio::spawn(async move {
                sink.call(Request::new("slow", "get_dataset", json!({ "dataset_id": "ds1" })))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();
        states.wait_for(|s| *s == ServerState::Draining).await.unwrap();

        let late = sink
            .call(Request::new("late", "server_info", json!({})))
            .await;
        assert_eq!(late.error_kind(), Some(ErrorKind::ServerShuttingDown));

        let slow = slow.await.unwrap();
        assert!(slow.success, "in-flight request must complete: {:?}", slow);

        drop(sink);
        runner.await.unwrap().unwrap();
        assert_eq!(server.state(), ServerState::Stopped);
    }

    #[tokio::test]
    async fn test_drain_timeout_abandons_work() {
        let server = server(true, Duration::from_secs(30), Duration::from_millis(100));
        let (mut transport, sink) = ChannelTransport::new("test");
        let shutdown = CancellationToken::new();
        let mut states = server.subscribe();

        let runner = {
            let server = server.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { server.run(&mut transport, shutdown).await })
        };
        states.wait_for(|s| *s == ServerState::Ready).await.unwrap();

        let stuck = tokio::spawn(async move {
            sink.call(Request::new(7, "get_dataset", json!({ "dataset_id": "ds1" })))
                .await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();

        let response = stuck.await.unwrap();
        assert_eq!(response.error_kind(), Some(ErrorKind::ServerShuttingDown));
        runner.await.unwrap().unwrap();
    }
}
