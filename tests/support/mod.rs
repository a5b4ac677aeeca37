//! In-process stand-in for the upstream knowledge-base API.
//!
//! Serves a small fixed corpus under `/v1` on an ephemeral port and counts
//! every request it receives, keyed by `"<METHOD> <dataset_id>"` or route.
//! Retrieve calls are also counted as `"<search_method> <dataset_id>"`, and
//! as `"threshold <dataset_id>"` when the body enables a score threshold.
//!
//! Dataset ids with special behavior:
//!
//! | id | behavior |
//! |----|----------|
//! | `ds1` | five search records, two documents, segment `seg-b` in `doc-2` |
//! | `ds3` | two search records, one overlapping `ds1` by segment id |
//! | `flaky` | 503 on the first two GETs, then 200 |
//! | `down` | always 503 |
//! | `missing` | always 404 |
//! | `slow` | retrieve sleeps 1.5s |
//! | `garbled` | GET answers 200 with a body that is not a dataset |
//!
//! Creating a document by text always fails with 500.

#![allow(dead_code)]

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

use dify_rag_mcp::config::Config;

pub const API_KEY: &str = "dataset-test";

#[derive(Clone, Default)]
pub struct Upstream {
    hits: Arc<Mutex<HashMap<String, usize>>>,
}

impl Upstream {
    fn hit(&self, key: impl Into<String>) -> usize {
        let mut hits = self.hits.lock().unwrap();
        let n = hits.entry(key.into()).or_default();
        *n += 1;
        *n
    }

    pub fn hits(&self, key: &str) -> usize {
        self.hits.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    pub fn total_hits(&self) -> usize {
        self.hits.lock().unwrap().values().sum()
    }
}

/// Starts the stub and returns it with its `/v1` base URL.
pub async fn start() -> (Upstream, String) {
    let upstream = Upstream::default();
    let app = Router::new()
        .route("/v1/datasets", get(list_datasets))
        .route(
            "/v1/datasets/{dataset_id}",
            get(get_dataset).delete(delete_dataset),
        )
        .route("/v1/datasets/{dataset_id}/retrieve", post(retrieve))
        .route("/v1/datasets/{dataset_id}/documents", get(list_documents))
        .route(
            "/v1/datasets/{dataset_id}/document/create_by_text",
            post(create_by_text),
        )
        .route(
            "/v1/datasets/{dataset_id}/documents/{document_id}/segments/{segment_id}",
            get(get_segment),
        )
        .with_state(upstream.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (upstream, format!("http://{}/v1", addr))
}

/// Client configuration pointed at `base_url` with fast retries.
pub fn config(base_url: &str) -> Config {
    let mut config = Config::default();
    config.upstream.base_url = base_url.to_string();
    config.upstream.api_key = API_KEY.to_string();
    config.upstream.timeout_secs = 1;
    config.retry.base_delay_ms = 10;
    config.retry.max_delay_ms = 40;
    config.search.default_top_k = 3;
    config
}

fn error(status: StatusCode, code: &str, message: &str) -> Response {
    (status, Json(json!({ "code": code, "message": message, "status": status.as_u16() })))
        .into_response()
}

fn authorized(headers: &HeaderMap) -> Result<(), Response> {
    let expected = format!("Bearer {}", API_KEY);
    match headers.get("authorization").and_then(|v| v.to_str().ok()) {
        Some(value) if value == expected => Ok(()),
        _ => Err(error(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "Access token is invalid",
        )),
    }
}

async fn list_datasets(State(up): State<Upstream>, headers: HeaderMap) -> Response {
    up.hit("GET datasets");
    if let Err(denied) = authorized(&headers) {
        return denied;
    }
    Json(json!({
        "data": [{ "id": "ds1", "name": "Support", "document_count": 2 }],
        "has_more": false,
        "limit": 1,
        "total": 1,
        "page": 1
    }))
    .into_response()
}

async fn get_dataset(
    State(up): State<Upstream>,
    Path(dataset_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let n = up.hit(format!("GET {}", dataset_id));
    if let Err(denied) = authorized(&headers) {
        return denied;
    }
    match dataset_id.as_str() {
        "flaky" if n <= 2 => error(StatusCode::SERVICE_UNAVAILABLE, "busy", "try later"),
        "down" => error(StatusCode::SERVICE_UNAVAILABLE, "busy", "try later"),
        "missing" => error(StatusCode::NOT_FOUND, "dataset_not_found", "Dataset not found"),
        "garbled" => Json(json!({ "name": ["not", "a", "dataset"] })).into_response(),
        id => Json(json!({ "id": id, "name": format!("Dataset {}", id), "document_count": 2 }))
            .into_response(),
    }
}

async fn delete_dataset(
    State(up): State<Upstream>,
    Path(dataset_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    up.hit(format!("DELETE {}", dataset_id));
    if let Err(denied) = authorized(&headers) {
        return denied;
    }
    error(StatusCode::INTERNAL_SERVER_ERROR, "internal", "storage failure")
}

async fn create_by_text(
    State(up): State<Upstream>,
    Path(dataset_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    up.hit(format!("POST {}/create_by_text", dataset_id));
    if let Err(denied) = authorized(&headers) {
        return denied;
    }
    error(StatusCode::INTERNAL_SERVER_ERROR, "internal", "indexing queue unavailable")
}

fn record(dataset_id: &str, segment_id: &str, document_id: &str, score: f64) -> Value {
    json!({
        "segment": {
            "id": segment_id,
            "document_id": document_id,
            "content": format!("content of {}", segment_id),
            "document": { "id": document_id, "dataset_id": dataset_id, "name": format!("{}.md", document_id) }
        },
        "score": score
    })
}

async fn retrieve(
    State(up): State<Upstream>,
    Path(dataset_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    up.hit(format!("POST {}/retrieve", dataset_id));
    if let Err(denied) = authorized(&headers) {
        return denied;
    }
    if body.get("query").and_then(|q| q.as_str()).is_none() {
        return error(StatusCode::BAD_REQUEST, "invalid_param", "query is required");
    }
    let model = &body["retrieval_model"];
    if let Some(method) = model["search_method"].as_str() {
        up.hit(format!("{} {}", method, dataset_id));
    }
    if model["score_threshold_enabled"] == true {
        up.hit(format!("threshold {}", dataset_id));
    }
    let records = match dataset_id.as_str() {
        "ds1" => vec![
            record("ds1", "seg-1", "doc-1", 0.9),
            record("ds1", "seg-2", "doc-1", 0.2),
            record("ds1", "seg-3", "doc-2", 0.75),
            record("ds1", "seg-4", "doc-2", 0.5),
            record("ds1", "seg-5", "doc-2", 0.8),
        ],
        "ds3" => vec![
            record("ds3", "seg-7", "doc-7", 0.85),
            record("ds3", "seg-8", "doc-7", 0.1),
        ],
        "slow" => {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            vec![record("slow", "seg-9", "doc-9", 0.99)]
        }
        "missing" => {
            return error(StatusCode::NOT_FOUND, "dataset_not_found", "Dataset not found")
        }
        _ => Vec::new(),
    };
    Json(json!({ "query": { "content": body["query"] }, "records": records })).into_response()
}

async fn list_documents(
    State(up): State<Upstream>,
    Path(dataset_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    up.hit(format!("GET {}/documents", dataset_id));
    if let Err(denied) = authorized(&headers) {
        return denied;
    }
    Json(json!({
        "data": [
            { "id": "doc-1", "name": "faq.md", "indexing_status": "completed", "data_source_type": "upload_file" },
            { "id": "doc-2", "name": "guide.md", "indexing_status": "waiting" }
        ],
        "has_more": false,
        "limit": 100,
        "total": 2,
        "page": 1
    }))
    .into_response()
}

async fn get_segment(
    State(up): State<Upstream>,
    Path((dataset_id, document_id, segment_id)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Response {
    up.hit(format!("GET {}/segments", dataset_id));
    if let Err(denied) = authorized(&headers) {
        return denied;
    }
    if document_id == "doc-2" && segment_id == "seg-b" {
        Json(json!({
            "data": {
                "id": "seg-b",
                "content": "Refunds are issued within five business days.",
                "keywords": ["refund"],
                "enabled": true,
                "position": 2
            }
        }))
        .into_response()
    } else {
        error(StatusCode::NOT_FOUND, "not_found", "Segment not found")
    }
}
