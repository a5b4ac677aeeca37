//! Authenticated client for the upstream knowledge-base API.
//!
//! Every dataset, document, segment and search operation funnels through
//! [`ApiClient::call`]. The client owns:
//!
//! - **Authentication**: a bearer credential attached to every request,
//!   fixed for the lifetime of the process.
//! - **Deadlines**: each attempt runs under the configured timeout; an
//!   expired deadline drops the in-flight request and yields
//!   [`ApiError::Timeout`].
//! - **Retries**: see [`crate::retry`]. Reads (list/get/search/health)
//!   retry on `Transient`/`Timeout`. Writes retry only on connection
//!   failures, where the request provably never left this process.
//! - **Error normalization**: upstream status codes and `reqwest` errors
//!   are mapped into [`ApiError`] before returning.
//!
//! # Operation Catalog
//!
//! Operations are a closed enum ([`Operation`]); each knows its HTTP method,
//! its path template and whether it is idempotent. Path placeholders
//! (`{dataset_id}`, …) are taken out of the parameter object; the remaining
//! parameters become the query string (reads) or the JSON body (writes).

use async_trait::async_trait;
use base64::Engine;
use reqwest::Method;
use serde_json::{json, Map, Value};
use std::path::Path;
use std::time::Duration;

use crate::config::Config;
use crate::error::{ApiError, ApiResult};
use crate::models::SearchStrategy;
use crate::retry::{should_retry, RetryPolicy};

/// The fixed catalog of upstream operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateDataset,
    ListDatasets,
    GetDataset,
    UpdateDataset,
    DeleteDataset,
    CopyDataset,
    ListDocuments,
    CreateDocumentByText,
    CreateDocumentByFile,
    GetDocument,
    UpdateDocument,
    DeleteDocument,
    GetDocumentIndexingStatus,
    ListSegments,
    CreateSegment,
    GetSegment,
    UpdateSegment,
    DeleteSegment,
    BatchEnableSegments,
    BatchDisableSegments,
    SemanticSearch,
    KeywordSearch,
    HybridSearch,
    FulltextSearch,
    Health,
}

impl Operation {
    pub const ALL: [Operation; 25] = [
        Operation::CreateDataset,
        Operation::ListDatasets,
        Operation::GetDataset,
        Operation::UpdateDataset,
        Operation::DeleteDataset,
        Operation::CopyDataset,
        Operation::ListDocuments,
        Operation::CreateDocumentByText,
        Operation::CreateDocumentByFile,
        Operation::GetDocument,
        Operation::UpdateDocument,
        Operation::DeleteDocument,
        Operation::GetDocumentIndexingStatus,
        Operation::ListSegments,
        Operation::CreateSegment,
        Operation::GetSegment,
        Operation::UpdateSegment,
        Operation::DeleteSegment,
        Operation::BatchEnableSegments,
        Operation::BatchDisableSegments,
        Operation::SemanticSearch,
        Operation::KeywordSearch,
        Operation::HybridSearch,
        Operation::FulltextSearch,
        Operation::Health,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Operation::CreateDataset => "create_dataset",
            Operation::ListDatasets => "list_datasets",
            Operation::GetDataset => "get_dataset",
            Operation::UpdateDataset => "update_dataset",
            Operation::DeleteDataset => "delete_dataset",
            Operation::CopyDataset => "copy_dataset",
            Operation::ListDocuments => "list_documents",
            Operation::CreateDocumentByText => "create_document_by_text",
            Operation::CreateDocumentByFile => "create_document_by_file",
            Operation::GetDocument => "get_document",
            Operation::UpdateDocument => "update_document",
            Operation::DeleteDocument => "delete_document",
            Operation::GetDocumentIndexingStatus => "get_document_indexing_status",
            Operation::ListSegments => "list_segments",
            Operation::CreateSegment => "create_segment",
            Operation::GetSegment => "get_segment",
            Operation::UpdateSegment => "update_segment",
            Operation::DeleteSegment => "delete_segment",
            Operation::BatchEnableSegments => "batch_enable_segments",
            Operation::BatchDisableSegments => "batch_disable_segments",
            Operation::SemanticSearch => "semantic_search",
            Operation::KeywordSearch => "keyword_search",
            Operation::HybridSearch => "hybrid_search",
            Operation::FulltextSearch => "fulltext_search",
            Operation::Health => "health",
        }
    }

    pub fn from_name(name: &str) -> Option<Operation> {
        Operation::ALL.into_iter().find(|op| op.name() == name)
    }

    /// The upstream search operation for a single strategy.
    pub fn for_strategy(strategy: SearchStrategy) -> Operation {
        match strategy {
            SearchStrategy::Semantic => Operation::SemanticSearch,
            SearchStrategy::Keyword => Operation::KeywordSearch,
            SearchStrategy::Hybrid => Operation::HybridSearch,
            SearchStrategy::Fulltext => Operation::FulltextSearch,
        }
    }

    pub fn strategy(self) -> Option<SearchStrategy> {
        match self {
            Operation::SemanticSearch => Some(SearchStrategy::Semantic),
            Operation::KeywordSearch => Some(SearchStrategy::Keyword),
            Operation::HybridSearch => Some(SearchStrategy::Hybrid),
            Operation::FulltextSearch => Some(SearchStrategy::Fulltext),
            _ => None,
        }
    }

    /// Reads and searches can be repeated without side effects.
    pub fn is_idempotent(self) -> bool {
        matches!(
            self,
            Operation::ListDatasets
                | Operation::GetDataset
                | Operation::ListDocuments
                | Operation::GetDocument
                | Operation::GetDocumentIndexingStatus
                | Operation::ListSegments
                | Operation::GetSegment
                | Operation::SemanticSearch
                | Operation::KeywordSearch
                | Operation::HybridSearch
                | Operation::FulltextSearch
                | Operation::Health
        )
    }

    pub fn method(self) -> Method {
        match self {
            Operation::ListDatasets
            | Operation::GetDataset
            | Operation::ListDocuments
            | Operation::GetDocument
            | Operation::GetDocumentIndexingStatus
            | Operation::ListSegments
            | Operation::GetSegment
            | Operation::Health => Method::GET,
            Operation::UpdateDataset => Method::PATCH,
            Operation::DeleteDataset | Operation::DeleteDocument | Operation::DeleteSegment => {
                Method::DELETE
            }
            _ => Method::POST,
        }
    }

    /// Path template relative to the base URL.
    pub fn path_template(self) -> &'static str {
        match self {
            Operation::CreateDataset | Operation::ListDatasets | Operation::Health => "datasets",
            Operation::GetDataset | Operation::UpdateDataset | Operation::DeleteDataset => {
                "datasets/{dataset_id}"
            }
            Operation::CopyDataset => "datasets/{dataset_id}/copy",
            Operation::ListDocuments => "datasets/{dataset_id}/documents",
            Operation::CreateDocumentByText => "datasets/{dataset_id}/document/create_by_text",
            Operation::CreateDocumentByFile => "datasets/{dataset_id}/document/create_by_file",
            Operation::GetDocument | Operation::DeleteDocument => {
                "datasets/{dataset_id}/documents/{document_id}"
            }
            Operation::UpdateDocument => {
                "datasets/{dataset_id}/documents/{document_id}/update_by_text"
            }
            Operation::GetDocumentIndexingStatus => {
                "datasets/{dataset_id}/documents/{batch}/indexing-status"
            }
            Operation::ListSegments | Operation::CreateSegment => {
                "datasets/{dataset_id}/documents/{document_id}/segments"
            }
            Operation::GetSegment | Operation::UpdateSegment | Operation::DeleteSegment => {
                "datasets/{dataset_id}/documents/{document_id}/segments/{segment_id}"
            }
            Operation::BatchEnableSegments | Operation::BatchDisableSegments => {
                "datasets/{dataset_id}/documents/{document_id}/segments/batch"
            }
            Operation::SemanticSearch
            | Operation::KeywordSearch
            | Operation::HybridSearch
            | Operation::FulltextSearch => "datasets/{dataset_id}/retrieve",
        }
    }

    /// Names of the placeholders in [`path_template`](Self::path_template).
    pub fn path_params(self) -> Vec<&'static str> {
        self.path_template()
            .split('/')
            .filter_map(|seg| seg.strip_prefix('{').and_then(|s| s.strip_suffix('}')))
            .collect()
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The seam between dispatch/search and the upstream service.
///
/// [`ApiClient`] is the production implementation; tests substitute
/// in-memory fakes.
#[async_trait]
pub trait KnowledgeApi: Send + Sync {
    /// Execute one catalog operation. `params` is always a JSON object.
    async fn call(&self, op: Operation, params: Value) -> ApiResult<Value>;
}

// ============ Request preparation ============

/// A fully resolved request, reusable across retry attempts.
#[derive(Debug, Clone)]
struct RequestSpec {
    op: Operation,
    url: String,
    body: RequestBody,
}

#[derive(Debug, Clone)]
enum RequestBody {
    Query(Vec<(String, String)>),
    Json(Value),
    Multipart(FileUpload),
}

#[derive(Debug, Clone)]
struct FileUpload {
    file_name: String,
    bytes: Vec<u8>,
    data: Value,
}

impl FileUpload {
    /// Multipart forms are single-use, so each attempt builds a fresh one.
    fn form(&self) -> ApiResult<reqwest::multipart::Form> {
        let part = reqwest::multipart::Part::bytes(self.bytes.clone())
            .file_name(self.file_name.clone())
            .mime_str(mime_for(&self.file_name))
            .map_err(|e| ApiError::invalid(format!("invalid upload: {}", e)))?;
        Ok(reqwest::multipart::Form::new()
            .text("data", self.data.to_string())
            .part("file", part))
    }
}

fn mime_for(file_name: &str) -> &'static str {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("txt") => "text/plain",
        Some("md") | Some("markdown") => "text/markdown",
        Some("html") | Some("htm") => "text/html",
        Some("pdf") => "application/pdf",
        Some("csv") => "text/csv",
        Some("json") => "application/json",
        Some("docx") => {
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        }
        _ => "application/octet-stream",
    }
}

/// Removes a path parameter from `params`, enforcing a non-empty,
/// single-segment identifier.
fn take_path_param(params: &mut Map<String, Value>, name: &str) -> ApiResult<String> {
    let value = params
        .remove(name)
        .ok_or_else(|| ApiError::invalid(format!("missing required parameter: {}", name)))?;
    let id = value
        .as_str()
        .ok_or_else(|| ApiError::invalid(format!("parameter '{}' must be a string", name)))?
        .trim()
        .to_string();
    if id.is_empty() {
        return Err(ApiError::invalid(format!("{} must not be empty", name)));
    }
    if id.contains(['/', '?', '#']) {
        return Err(ApiError::invalid(format!(
            "{} contains reserved characters: {}",
            name, id
        )));
    }
    Ok(id)
}

fn query_pairs(params: Map<String, Value>) -> Vec<(String, String)> {
    params
        .into_iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| {
            let v = match v {
                Value::String(s) => s,
                other => other.to_string(),
            };
            (k, v)
        })
        .collect()
}

/// Wraps search parameters into the upstream `retrieval_model` envelope.
fn search_body(strategy: SearchStrategy, mut params: Map<String, Value>) -> ApiResult<Value> {
    let query = params
        .remove("query")
        .and_then(|q| q.as_str().map(str::to_string))
        .ok_or_else(|| ApiError::invalid("missing required parameter: query"))?;
    let top_k = params.remove("top_k").and_then(|v| v.as_u64()).unwrap_or(10);
    let threshold = params.remove("score_threshold").and_then(|v| v.as_f64());

    let mut retrieval = json!({
        "search_method": strategy.upstream_method(),
        "reranking_enable": false,
        "top_k": top_k,
        "score_threshold_enabled": threshold.is_some(),
    });
    if let Some(t) = threshold {
        retrieval["score_threshold"] = json!(t);
    }
    if strategy == SearchStrategy::Hybrid {
        let semantic = params.remove("semantic_weight").and_then(|v| v.as_f64());
        let keyword = params.remove("keyword_weight").and_then(|v| v.as_f64());
        if let (Some(s), Some(k)) = (semantic, keyword) {
            retrieval["weights"] = json!({
                "vector_setting": { "vector_weight": s },
                "keyword_setting": { "keyword_weight": k },
            });
        }
    }

    Ok(json!({ "query": query, "retrieval_model": retrieval }))
}

/// Builds the JSON body for write operations, applying upstream defaults.
fn write_body(op: Operation, mut params: Map<String, Value>) -> Value {
    match op {
        Operation::CreateDocumentByText => {
            params
                .entry("indexing_technique")
                .or_insert_with(|| json!("high_quality"));
            params
                .entry("process_rule")
                .or_insert_with(|| json!({ "mode": "automatic" }));
            Value::Object(params)
        }
        Operation::CreateSegment if !params.contains_key("segments") => {
            json!({ "segments": [Value::Object(params)] })
        }
        Operation::UpdateSegment if !params.contains_key("segment") => {
            json!({ "segment": Value::Object(params) })
        }
        Operation::BatchEnableSegments => {
            params.insert("operation".into(), json!("enable"));
            Value::Object(params)
        }
        Operation::BatchDisableSegments => {
            params.insert("operation".into(), json!("disable"));
            Value::Object(params)
        }
        _ => Value::Object(params),
    }
}

async fn file_upload(mut params: Map<String, Value>) -> ApiResult<FileUpload> {
    let mut data = match params.remove("data") {
        Some(Value::Object(map)) => map,
        Some(Value::Null) | None => Map::new(),
        Some(_) => return Err(ApiError::invalid("parameter 'data' must be an object")),
    };
    data.entry("indexing_technique")
        .or_insert_with(|| json!("high_quality"));
    data.entry("process_rule")
        .or_insert_with(|| json!({ "mode": "automatic" }));

    let path = params.remove("file_path");
    let encoded = params.remove("file_content_base64");
    let name = params
        .remove("file_name")
        .and_then(|v| v.as_str().map(str::to_string));

    let (file_name, bytes) = match (path, encoded) {
        (Some(Value::String(path)), _) => {
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|e| ApiError::invalid(format!("cannot read file '{}': {}", path, e)))?;
            let file_name = name.unwrap_or_else(|| {
                Path::new(&path)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "upload".to_string())
            });
            (file_name, bytes)
        }
        (_, Some(Value::String(encoded))) => {
            let file_name = name.ok_or_else(|| {
                ApiError::invalid("file_name is required with file_content_base64")
            })?;
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(encoded.as_bytes())
                .map_err(|e| ApiError::invalid(format!("file_content_base64: {}", e)))?;
            (file_name, bytes)
        }
        _ => {
            return Err(ApiError::invalid(
                "either file_path or file_content_base64 + file_name is required",
            ))
        }
    };

    Ok(FileUpload {
        file_name,
        bytes,
        data: Value::Object(data),
    })
}

// ============ Client ============

/// Production [`KnowledgeApi`] backed by `reqwest`.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
    retry: RetryPolicy,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

/// Outcome of one failed attempt.
struct AttemptError {
    error: ApiError,
    /// The request never reached the upstream (connection refused, DNS…).
    not_sent: bool,
}

impl From<ApiError> for AttemptError {
    fn from(error: ApiError) -> Self {
        Self {
            error,
            not_sent: false,
        }
    }
}

impl ApiClient {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(config.upstream.user_agent.clone())
            .connect_timeout(config.upstream.timeout())
            .build()?;
        Ok(Self {
            http,
            base_url: config.upstream.base_url.trim_end_matches('/').to_string(),
            api_key: config.upstream.api_key.clone(),
            timeout: config.upstream.timeout(),
            retry: RetryPolicy::from_config(&config.retry),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Resolves path, query and body for `op`. Validation failures surface
    /// as `InvalidParameters` before any network activity.
    async fn prepare(&self, op: Operation, params: Value) -> ApiResult<RequestSpec> {
        let mut params = match params {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            _ => return Err(ApiError::invalid("parameters must be a JSON object")),
        };

        let mut path = String::new();
        for seg in op.path_template().split('/') {
            if !path.is_empty() {
                path.push('/');
            }
            match seg.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                Some(name) => path.push_str(&take_path_param(&mut params, name)?),
                None => path.push_str(seg),
            }
        }
        let url = format!("{}/{}", self.base_url, path);

        let body = if let Some(strategy) = op.strategy() {
            RequestBody::Json(search_body(strategy, params)?)
        } else if op == Operation::Health {
            RequestBody::Query(vec![
                ("page".to_string(), "1".to_string()),
                ("limit".to_string(), "1".to_string()),
            ])
        } else if op == Operation::CreateDocumentByFile {
            RequestBody::Multipart(file_upload(params).await?)
        } else if op.method() == Method::GET || op.method() == Method::DELETE {
            RequestBody::Query(query_pairs(params))
        } else {
            RequestBody::Json(write_body(op, params))
        };

        Ok(RequestSpec { op, url, body })
    }

    async fn attempt(&self, spec: &RequestSpec) -> Result<Value, AttemptError> {
        let mut builder = self
            .http
            .request(spec.op.method(), &spec.url)
            .bearer_auth(&self.api_key);
        builder = match &spec.body {
            RequestBody::Query(pairs) if pairs.is_empty() => builder,
            RequestBody::Query(pairs) => builder.query(pairs),
            RequestBody::Json(body) => builder.json(body),
            RequestBody::Multipart(upload) => builder.multipart(upload.form()?),
        };

        let exchange = async {
            let response = builder.send().await.map_err(classify_send_error)?;
            let status = response.status();
            let text = response.text().await.map_err(|e| AttemptError {
                error: ApiError::Transient(format!("failed to read upstream response: {}", e)),
                not_sent: false,
            })?;
            Ok::<_, AttemptError>((status, text))
        };

        let (status, text) = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| AttemptError::from(ApiError::Timeout(self.timeout)))??;

        if status.is_success() {
            if text.trim().is_empty() {
                return Ok(json!({ "result": "success" }));
            }
            return serde_json::from_str(&text).map_err(|e| {
                AttemptError::from(ApiError::Transient(format!(
                    "invalid JSON from upstream (status {}): {}",
                    status, e
                )))
            });
        }

        Err(ApiError::from_status(
            status.as_u16(),
            format!("{} {}: {}", spec.op, status, upstream_message(&text)),
        )
        .into())
    }
}

fn classify_send_error(err: reqwest::Error) -> AttemptError {
    if err.is_builder() {
        return ApiError::invalid(format!("could not build request: {}", err)).into();
    }
    if err.is_connect() {
        return AttemptError {
            error: ApiError::Transient(format!("connection failed: {}", err)),
            not_sent: true,
        };
    }
    ApiError::Transient(format!("network error: {}", err)).into()
}

/// Extracts the human-readable message from an upstream error body.
fn upstream_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("message")
                .or_else(|| v.get("error"))
                .or_else(|| v.get("code"))
                .and_then(|m| m.as_str().map(str::to_string))
        })
        .unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                "no response body".to_string()
            } else {
                trimmed.chars().take(200).collect()
            }
        })
}

#[async_trait]
impl KnowledgeApi for ApiClient {
    async fn call(&self, op: Operation, params: Value) -> ApiResult<Value> {
        let spec = self.prepare(op, params).await?;
        let mut retry = 0u32;

        loop {
            match self.attempt(&spec).await {
                Ok(payload) => {
                    tracing::debug!(op = op.name(), retries = retry, "upstream call succeeded");
                    return Ok(payload);
                }
                Err(AttemptError { error, not_sent }) => {
                    if retry < self.retry.max_retries
                        && should_retry(&error, op.is_idempotent(), not_sent)
                    {
                        retry += 1;
                        let delay = self.retry.delay(retry);
                        tracing::warn!(
                            op = op.name(),
                            retry,
                            delay_ms = delay.as_millis() as u64,
                            error = %error,
                            "retrying upstream call"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    tracing::debug!(op = op.name(), retries = retry, error = %error, "upstream call failed");
                    return Err(error);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ApiClient {
        let mut config = Config::default();
        config.upstream.api_key = "dataset-test".into();
        config.upstream.base_url = "http://127.0.0.1:9/v1/".into();
        ApiClient::new(&config).unwrap()
    }

    #[test]
    fn test_catalog_names_round_trip() {
        for op in Operation::ALL {
            assert_eq!(Operation::from_name(op.name()), Some(op));
        }
        assert_eq!(Operation::from_name("drop_tables"), None);
    }

    #[test]
    fn test_writes_are_not_idempotent() {
        for op in [
            Operation::CreateDataset,
            Operation::UpdateDataset,
            Operation::DeleteDataset,
            Operation::CreateDocumentByText,
            Operation::DeleteSegment,
            Operation::BatchEnableSegments,
        ] {
            assert!(!op.is_idempotent(), "{} must not be idempotent", op);
        }
        assert!(Operation::GetDataset.is_idempotent());
        assert!(Operation::SemanticSearch.is_idempotent());
    }

    #[test]
    fn test_path_params() {
        assert_eq!(
            Operation::GetSegment.path_params(),
            vec!["dataset_id", "document_id", "segment_id"]
        );
        assert!(Operation::ListDatasets.path_params().is_empty());
    }

    #[tokio::test]
    async fn test_prepare_builds_path_and_query() {
        let spec = client()
            .prepare(
                Operation::ListDocuments,
                json!({ "dataset_id": "ds1", "page": 2, "keyword": "refund" }),
            )
            .await
            .unwrap();
        assert_eq!(spec.url, "http://127.0.0.1:9/v1/datasets/ds1/documents");
        match spec.body {
            RequestBody::Query(pairs) => {
                assert!(pairs.contains(&("page".to_string(), "2".to_string())));
                assert!(pairs.contains(&("keyword".to_string(), "refund".to_string())));
            }
            other => panic!("unexpected body: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_prepare_rejects_empty_and_nested_ids() {
        let c = client();
        let err = c
            .prepare(Operation::GetDataset, json!({ "dataset_id": "  " }))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidParameters);

        let err = c
            .prepare(Operation::GetDataset, json!({ "dataset_id": "a/b" }))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidParameters);
    }

    #[tokio::test]
    async fn test_search_body_shape() {
        let spec = client()
            .prepare(
                Operation::HybridSearch,
                json!({ "dataset_id": "ds1", "query": "q", "top_k": 4,
                        "semantic_weight": 0.6, "keyword_weight": 0.4 }),
            )
            .await
            .unwrap();
        let RequestBody::Json(body) = spec.body else {
            panic!("search must send JSON");
        };
        assert_eq!(body["query"], "q");
        assert_eq!(body["retrieval_model"]["search_method"], "hybrid_search");
        assert_eq!(body["retrieval_model"]["top_k"], 4);
        assert_eq!(
            body["retrieval_model"]["weights"]["vector_setting"]["vector_weight"],
            0.6
        );
    }

    #[test]
    fn test_write_body_defaults() {
        let body = write_body(
            Operation::CreateDocumentByText,
            json!({ "name": "a", "text": "b" }).as_object().unwrap().clone(),
        );
        assert_eq!(body["indexing_technique"], "high_quality");
        assert_eq!(body["process_rule"]["mode"], "automatic");

        let body = write_body(
            Operation::BatchDisableSegments,
            json!({ "segment_ids": ["s1"] }).as_object().unwrap().clone(),
        );
        assert_eq!(body["operation"], "disable");

        let body = write_body(
            Operation::CreateSegment,
            json!({ "content": "c" }).as_object().unwrap().clone(),
        );
        assert_eq!(body["segments"][0]["content"], "c");
    }

    #[tokio::test]
    async fn test_file_upload_from_base64() {
        let upload = file_upload(
            json!({ "file_content_base64": "aGVsbG8=", "file_name": "hello.txt" })
                .as_object()
                .unwrap()
                .clone(),
        )
        .await
        .unwrap();
        assert_eq!(upload.bytes, b"hello");
        assert_eq!(upload.data["process_rule"]["mode"], "automatic");
        assert_eq!(mime_for(&upload.file_name), "text/plain");
    }

    #[tokio::test]
    async fn test_file_upload_requires_source() {
        let err = file_upload(Map::new()).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidParameters);
    }

    #[test]
    fn test_upstream_message() {
        assert_eq!(
            upstream_message(r#"{"code":"not_found","message":"Dataset not found"}"#),
            "Dataset not found"
        );
        assert_eq!(upstream_message(""), "no response body");
        assert_eq!(upstream_message("Bad Gateway"), "Bad Gateway");
    }
}
