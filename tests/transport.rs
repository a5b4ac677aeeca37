//! End-to-end request flow through the stdio and event-stream transports.

mod support;

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use dify_rag_mcp::client::ApiClient;
use dify_rag_mcp::config::TransportKind;
use dify_rag_mcp::dispatch::Dispatcher;
use dify_rag_mcp::error::ErrorKind;
use dify_rag_mcp::mcp;
use dify_rag_mcp::protocol::Response;
use dify_rag_mcp::server::{ProtocolServer, ServerState};
use dify_rag_mcp::transport::{http, stdio};

async fn dispatcher() -> (support::Upstream, Arc<Dispatcher>) {
    let (upstream, base_url) = support::start().await;
    let config = support::config(&base_url);
    let api = Arc::new(ApiClient::new(&config).unwrap());
    let dispatcher = Dispatcher::from_config(api, &config).unwrap();
    (upstream, Arc::new(dispatcher))
}

#[tokio::test]
async fn test_stdio_round_trip() {
    let (_upstream, dispatcher) = dispatcher().await;
    let (mut to_server, server_in) = tokio::io::duplex(1 << 20);
    let (server_out, from_server) = tokio::io::duplex(1 << 20);

    let mut transport = stdio::pipe(server_in, server_out);
    let server = ProtocolServer::new(dispatcher, Duration::from_secs(5));
    let runner = tokio::spawn(async move {
        server.run(&mut transport, CancellationToken::new()).await
    });

    let input = [
        json!({ "id": 1, "method": "tools/list" }).to_string(),
        json!({ "id": 2, "method": "get_dataset", "params": { "dataset_id": "ds1" } }).to_string(),
        json!({ "id": 3, "method": "no_such_tool", "params": {} }).to_string(),
        "{not json".to_string(),
        String::new(),
    ];
    for line in &input {
        to_server.write_all(line.as_bytes()).await.unwrap();
        to_server.write_all(b"\n").await.unwrap();
    }
    to_server.shutdown().await.unwrap();
    drop(to_server);

    let mut responses = Vec::new();
    let mut lines = BufReader::new(from_server).lines();
    while let Some(line) = tokio::time::timeout(Duration::from_secs(10), lines.next_line())
        .await
        .unwrap()
        .unwrap()
    {
        responses.push(serde_json::from_str::<Response>(&line).unwrap());
    }
    runner.await.unwrap().unwrap();

    assert_eq!(responses.len(), 4, "{:?}", responses);
    let by_id = |id: Value| responses.iter().find(|r| r.id == id).unwrap();

    let tools = by_id(json!(1));
    assert!(tools.success);
    let names: Vec<&str> = tools.result.as_ref().unwrap()["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"multi_dataset_search"));
    assert!(names.contains(&"create_document_by_file"));

    let dataset = by_id(json!(2));
    assert!(dataset.success);
    assert_eq!(dataset.result.as_ref().unwrap()["id"], "ds1");

    assert_eq!(by_id(json!(3)).error_kind(), Some(ErrorKind::MethodNotFound));
    assert_eq!(
        by_id(Value::Null).error_kind(),
        Some(ErrorKind::InvalidParameters)
    );
}

/// Minimal reader for a `text/event-stream` body.
struct EventReader {
    response: reqwest::Response,
    buffer: String,
}

impl EventReader {
    /// Next `(event, data)` pair, skipping keep-alive comments.
    async fn next(&mut self) -> (String, String) {
        loop {
            if let Some(pos) = self.buffer.find("\n\n") {
                let frame: String = self.buffer.drain(..pos + 2).collect();
                let mut event = "message".to_string();
                let mut data = String::new();
                for line in frame.lines() {
                    if let Some(v) = line.strip_prefix("event:") {
                        event = v.trim().to_string();
                    } else if let Some(v) = line.strip_prefix("data:") {
                        data.push_str(v.trim_start());
                    }
                }
                if !data.is_empty() {
                    return (event, data);
                }
                continue;
            }
            let chunk = tokio::time::timeout(Duration::from_secs(10), self.response.chunk())
                .await
                .unwrap()
                .unwrap()
                .expect("event stream ended");
            self.buffer.push_str(&String::from_utf8_lossy(&chunk));
        }
    }
}

#[tokio::test]
async fn test_sse_round_trip() {
    let (_upstream, dispatcher) = dispatcher().await;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let (mut transport, addr) = http::serve(
        TransportKind::Sse,
        listener,
        mcp::catalog(dispatcher.tools()),
    )
    .unwrap();

    let server = Arc::new(ProtocolServer::new(dispatcher, Duration::from_secs(2)));
    let mut states = server.subscribe();
    let shutdown = CancellationToken::new();
    let runner = {
        let server = server.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { server.run(&mut transport, shutdown).await })
    };
    states.wait_for(|s| *s == ServerState::Ready).await.unwrap();

    let client = reqwest::Client::new();
    let base = format!("http://{}", addr);

    let health: Value = client
        .get(format!("{}/health", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["transport"], "sse");

    let stream = client.get(format!("{}/sse", base)).send().await.unwrap();
    assert!(stream.status().is_success());
    let mut events = EventReader {
        response: stream,
        buffer: String::new(),
    };

    let (event, endpoint) = events.next().await;
    assert_eq!(event, "endpoint");
    assert!(endpoint.starts_with("/messages?session_id="), "{}", endpoint);

    let accepted = client
        .post(format!("{}{}", base, endpoint))
        .body(
            json!({
                "id": "q1",
                "method": "semantic_search",
                "params": { "dataset_id": "ds1", "query": "refund", "top_k": 2 }
            })
            .to_string(),
        )
        .send()
        .await
        .unwrap();
    assert_eq!(accepted.status(), reqwest::StatusCode::ACCEPTED);

    let (event, data) = events.next().await;
    assert_eq!(event, "message");
    let response: Response = serde_json::from_str(&data).unwrap();
    assert_eq!(response.id, json!("q1"));
    assert!(response.success, "{:?}", response);
    assert_eq!(response.result.unwrap()["count"], 2);

    let malformed = client
        .post(format!("{}{}", base, endpoint))
        .body("{\"method\":")
        .send()
        .await
        .unwrap();
    assert_eq!(malformed.status(), reqwest::StatusCode::BAD_REQUEST);

    let unknown = client
        .post(format!("{}/messages?session_id=nope", base))
        .body(json!({ "id": 1, "method": "server_info" }).to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(unknown.status(), reqwest::StatusCode::NOT_FOUND);

    drop(events);
    shutdown.cancel();
    runner.await.unwrap().unwrap();
    assert_eq!(server.state(), ServerState::Stopped);
}
