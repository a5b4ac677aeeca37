//! Tool trait, built-in tools and the tool registry.
//!
//! Every protocol method that is not a resource read is a [`Tool`]: a name,
//! a description, a JSON Schema for its parameters and an async
//! [`execute`](Tool::execute). The registry is built once at startup and is
//! immutable afterwards.
//!
//! # Built-in tools
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      ToolRegistry                        │
//! │  ┌──────────────┐ ┌──────────────┐ ┌──────────────────┐  │
//! │  │ ApiTool × 20 │ │ SearchTool×4 │ │ multi_dataset_   │  │
//! │  │ datasets/    │ │ semantic     │ │ search           │  │
//! │  │ documents/   │ │ keyword      │ ├──────────────────┤  │
//! │  │ segments     │ │ hybrid       │ │ health_check     │  │
//! │  │              │ │ fulltext     │ │ server_info      │  │
//! │  └──────┬───────┘ └──────┬───────┘ └────────┬─────────┘  │
//! └─────────┼────────────────┼──────────────────┼────────────┘
//!           ▼                ▼                  ▼
//!      KnowledgeApi    SearchAggregator    KnowledgeApi / info
//! ```
//!
//! [`ApiTool`] is data-driven: one instance per CRUD operation in the
//! [`Operation`] catalog, forwarding validated parameters to the client.

use anyhow::bail;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;

use crate::client::{KnowledgeApi, Operation};
use crate::config::{Config, SearchConfig};
use crate::error::{ApiError, ApiResult};
use crate::models::{IndexingStatus, SearchStrategy};
use crate::params::{get_opt_f64, get_opt_usize, get_str, get_str_list};
use crate::search::{HybridWeights, SearchAggregator, SearchRequest};

/// A callable protocol method.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Method name used for dispatch (e.g. `"semantic_search"`).
    fn name(&self) -> &str;

    /// One-line description for discovery.
    fn description(&self) -> &str;

    /// JSON Schema of the parameter object.
    fn parameters_schema(&self) -> Value;

    /// Whether the tool leaves upstream state untouched.
    fn read_only(&self) -> bool {
        true
    }

    /// Execute with parameters already validated against
    /// [`parameters_schema`](Tool::parameters_schema).
    async fn execute(&self, params: Value, ctx: &ToolContext) -> ApiResult<Value>;
}

/// Static facts about this server, reported by `server_info`.
#[derive(Debug, Clone, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    pub base_url: String,
    pub credential_configured: bool,
    pub transport: String,
    pub capabilities: Vec<String>,
}

impl ServerInfo {
    pub fn from_config(config: &Config) -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            base_url: config.upstream.base_url.clone(),
            credential_configured: !config.upstream.api_key.trim().is_empty(),
            transport: config.server.transport.to_string(),
            capabilities: vec!["tools".into(), "resources".into()],
        }
    }
}

/// Shared handles available to every tool invocation.
#[derive(Clone)]
pub struct ToolContext {
    pub api: Arc<dyn KnowledgeApi>,
    pub search: SearchAggregator,
    pub info: ServerInfo,
}

impl ToolContext {
    pub fn new(api: Arc<dyn KnowledgeApi>, config: &Config) -> Self {
        Self {
            search: SearchAggregator::new(api.clone(), &config.search),
            api,
            info: ServerInfo::from_config(config),
        }
    }
}

// ============ Schema helpers ============

/// Tool schemas are closed: undeclared keys are rejected, never forwarded.
fn object_schema(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false,
    })
}

fn id_prop(description: &str) -> Value {
    json!({ "type": "string", "minLength": 1, "description": description })
}

fn page_props() -> Value {
    json!({
        "page": { "type": "integer", "minimum": 1, "default": 1, "description": "Page number (1-based)" },
        "limit": { "type": "integer", "minimum": 1, "maximum": 100, "default": 20, "description": "Items per page" },
        "keyword": { "type": "string", "description": "Filter by name keyword" }
    })
}

/// Merges two JSON objects; keys in `extra` win.
fn merge(mut base: Value, extra: Value) -> Value {
    if let (Some(b), Value::Object(e)) = (base.as_object_mut(), extra) {
        b.extend(e);
    }
    base
}

// ============ ApiTool ============

/// A tool that forwards one catalog operation to the upstream.
pub struct ApiTool {
    op: Operation,
    description: &'static str,
    schema: Value,
}

impl ApiTool {
    pub fn new(op: Operation, description: &'static str, schema: Value) -> Self {
        Self {
            op,
            description,
            schema,
        }
    }

    pub fn operation(&self) -> Operation {
        self.op
    }
}

#[async_trait]
impl Tool for ApiTool {
    fn name(&self) -> &str {
        self.op.name()
    }

    fn description(&self) -> &str {
        self.description
    }

    fn parameters_schema(&self) -> Value {
        self.schema.clone()
    }

    fn read_only(&self) -> bool {
        self.op.is_idempotent()
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ApiResult<Value> {
        let dataset_id = params
            .get("dataset_id")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string());
        let document_id = params
            .get("document_id")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string());

        let payload = ctx.api.call(self.op, params).await?;
        Ok(attach_parents(
            payload,
            dataset_id.as_deref(),
            document_id.as_deref(),
        ))
    }
}

/// Stamps parent ids onto documents and segments in an upstream payload and
/// adds a normalized `status` next to the raw `indexing_status`.
pub fn attach_parents(mut payload: Value, dataset_id: Option<&str>, document_id: Option<&str>) -> Value {
    fn stamp(item: &mut Value, dataset_id: Option<&str>, document_id: Option<&str>) {
        let Some(obj) = item.as_object_mut() else {
            return;
        };
        if let Some(raw) = obj.get("indexing_status").and_then(|s| s.as_str()) {
            let status = IndexingStatus::from_upstream(raw);
            obj.insert("status".into(), json!(status));
            if let Some(ds) = dataset_id {
                obj.entry("dataset_id").or_insert_with(|| json!(ds));
            }
        }
        if obj.contains_key("content") {
            if let Some(doc) = document_id {
                obj.entry("document_id").or_insert_with(|| json!(doc));
            }
        }
    }

    stamp(&mut payload, dataset_id, document_id);
    for key in ["document", "data"] {
        match payload.get_mut(key) {
            Some(Value::Array(items)) => {
                for item in items {
                    stamp(item, dataset_id, document_id);
                }
            }
            Some(item) if item.is_object() => stamp(item, dataset_id, document_id),
            _ => {}
        }
    }
    payload
}

/// The CRUD portion of the catalog.
pub fn api_tools() -> Vec<ApiTool> {
    let dataset_fields = json!({
        "name": { "type": "string", "minLength": 1, "description": "Dataset name" },
        "description": { "type": "string", "description": "Dataset description" },
        "indexing_technique": { "type": "string", "enum": ["high_quality", "economy"] },
        "permission": { "type": "string", "enum": ["only_me", "all_team_members", "partial_members"] }
    });
    let ds = || json!({ "dataset_id": id_prop("Dataset ID") });
    let ds_doc = || {
        json!({
            "dataset_id": id_prop("Dataset ID"),
            "document_id": id_prop("Document ID")
        })
    };
    let ds_doc_seg = || {
        merge(
            ds_doc(),
            json!({ "segment_id": id_prop("Segment ID") }),
        )
    };
    let segment_ids = json!({
        "segment_ids": {
            "type": "array",
            "minItems": 1,
            "items": { "type": "string", "minLength": 1 },
            "description": "Segment IDs"
        }
    });

    vec![
        ApiTool::new(
            Operation::CreateDataset,
            "Create an empty knowledge-base dataset",
            object_schema(dataset_fields.clone(), &["name"]),
        ),
        ApiTool::new(
            Operation::ListDatasets,
            "List datasets, paginated",
            object_schema(page_props(), &[]),
        ),
        ApiTool::new(
            Operation::GetDataset,
            "Get a dataset by id",
            object_schema(ds(), &["dataset_id"]),
        ),
        ApiTool::new(
            Operation::UpdateDataset,
            "Update dataset name, description or settings",
            object_schema(merge(ds(), dataset_fields), &["dataset_id"]),
        ),
        ApiTool::new(
            Operation::DeleteDataset,
            "Delete a dataset and everything in it",
            object_schema(ds(), &["dataset_id"]),
        ),
        ApiTool::new(
            Operation::CopyDataset,
            "Copy a dataset under a new name",
            object_schema(
                merge(ds(), json!({ "name": { "type": "string", "minLength": 1 } })),
                &["dataset_id", "name"],
            ),
        ),
        ApiTool::new(
            Operation::ListDocuments,
            "List documents in a dataset",
            object_schema(
                merge(
                    merge(ds(), page_props()),
                    json!({ "status": { "type": "string", "description": "Filter by indexing status" } }),
                ),
                &["dataset_id"],
            ),
        ),
        ApiTool::new(
            Operation::CreateDocumentByText,
            "Create a document from raw text",
            object_schema(
                merge(
                    ds(),
                    json!({
                        "name": { "type": "string", "minLength": 1 },
                        "text": { "type": "string", "minLength": 1 },
                        "indexing_technique": { "type": "string", "enum": ["high_quality", "economy"] },
                        "process_rule": { "type": "object" }
                    }),
                ),
                &["dataset_id", "name", "text"],
            ),
        ),
        ApiTool::new(
            Operation::CreateDocumentByFile,
            "Create a document by uploading a file (local path or base64 content)",
            object_schema(
                merge(
                    ds(),
                    json!({
                        "file_path": { "type": "string", "minLength": 1, "description": "Local file to upload" },
                        "file_content_base64": { "type": "string", "description": "File content, base64-encoded" },
                        "file_name": { "type": "string", "minLength": 1, "description": "Name for base64 uploads" },
                        "data": { "type": "object", "description": "indexing_technique / process_rule" }
                    }),
                ),
                &["dataset_id"],
            ),
        ),
        ApiTool::new(
            Operation::GetDocument,
            "Get a document by id",
            object_schema(ds_doc(), &["dataset_id", "document_id"]),
        ),
        ApiTool::new(
            Operation::UpdateDocument,
            "Replace a document's name or text",
            object_schema(
                merge(
                    ds_doc(),
                    json!({
                        "name": { "type": "string", "minLength": 1 },
                        "text": { "type": "string" },
                        "process_rule": { "type": "object" }
                    }),
                ),
                &["dataset_id", "document_id"],
            ),
        ),
        ApiTool::new(
            Operation::DeleteDocument,
            "Delete a document",
            object_schema(ds_doc(), &["dataset_id", "document_id"]),
        ),
        ApiTool::new(
            Operation::GetDocumentIndexingStatus,
            "Get indexing progress for a document creation batch",
            object_schema(
                merge(ds(), json!({ "batch": id_prop("Batch id returned on document creation") })),
                &["dataset_id", "batch"],
            ),
        ),
        ApiTool::new(
            Operation::ListSegments,
            "List segments of a document",
            object_schema(
                merge(
                    ds_doc(),
                    json!({
                        "keyword": { "type": "string" },
                        "status": { "type": "string" },
                        "enabled": { "type": "boolean" }
                    }),
                ),
                &["dataset_id", "document_id"],
            ),
        ),
        ApiTool::new(
            Operation::CreateSegment,
            "Add a segment to a document",
            object_schema(
                merge(
                    ds_doc(),
                    json!({
                        "content": { "type": "string", "minLength": 1 },
                        "answer": { "type": "string" },
                        "keywords": { "type": "array", "items": { "type": "string" } }
                    }),
                ),
                &["dataset_id", "document_id", "content"],
            ),
        ),
        ApiTool::new(
            Operation::GetSegment,
            "Get a segment by id",
            object_schema(ds_doc_seg(), &["dataset_id", "document_id", "segment_id"]),
        ),
        ApiTool::new(
            Operation::UpdateSegment,
            "Update a segment's content, keywords or enabled flag",
            object_schema(
                merge(
                    ds_doc_seg(),
                    json!({
                        "content": { "type": "string", "minLength": 1 },
                        "answer": { "type": "string" },
                        "keywords": { "type": "array", "items": { "type": "string" } },
                        "enabled": { "type": "boolean" }
                    }),
                ),
                &["dataset_id", "document_id", "segment_id"],
            ),
        ),
        ApiTool::new(
            Operation::DeleteSegment,
            "Delete a segment",
            object_schema(ds_doc_seg(), &["dataset_id", "document_id", "segment_id"]),
        ),
        ApiTool::new(
            Operation::BatchEnableSegments,
            "Enable several segments at once",
            object_schema(
                merge(ds_doc(), segment_ids.clone()),
                &["dataset_id", "document_id", "segment_ids"],
            ),
        ),
        ApiTool::new(
            Operation::BatchDisableSegments,
            "Disable several segments at once",
            object_schema(
                merge(ds_doc(), segment_ids),
                &["dataset_id", "document_id", "segment_ids"],
            ),
        ),
    ]
}

// ============ Search tools ============

fn search_props(search: &SearchConfig) -> Value {
    json!({
        "query": { "type": "string", "minLength": 1, "description": "Search query" },
        "top_k": {
            "type": "integer",
            "minimum": 1,
            "maximum": search.max_top_k,
            "default": search.default_top_k,
            "description": "Maximum number of results"
        },
        "score_threshold": {
            "type": "number",
            "minimum": 0.0,
            "maximum": 1.0,
            "description": "Drop results scoring below this value"
        }
    })
}

fn weight_props(search: &SearchConfig) -> Value {
    json!({
        "semantic_weight": { "type": "number", "minimum": 0.0, "maximum": 1.0, "default": search.semantic_weight },
        "keyword_weight": { "type": "number", "minimum": 0.0, "maximum": 1.0, "default": search.keyword_weight }
    })
}

fn request_weights(params: &Value) -> ApiResult<Option<HybridWeights>> {
    match (
        get_opt_f64(params, "semantic_weight"),
        get_opt_f64(params, "keyword_weight"),
    ) {
        (Some(s), Some(k)) => HybridWeights::new(s, k).map(Some),
        _ => Ok(None),
    }
}

/// Single-dataset search with a fixed strategy.
pub struct SearchTool {
    strategy: SearchStrategy,
    config: SearchConfig,
}

impl SearchTool {
    pub fn new(strategy: SearchStrategy, config: SearchConfig) -> Self {
        Self { strategy, config }
    }
}

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &str {
        Operation::for_strategy(self.strategy).name()
    }

    fn description(&self) -> &str {
        match self.strategy {
            SearchStrategy::Semantic => "Vector similarity search in one dataset",
            SearchStrategy::Keyword => "Keyword search in one dataset",
            SearchStrategy::Hybrid => "Weighted semantic + keyword search in one dataset",
            SearchStrategy::Fulltext => "Full-text search in one dataset",
        }
    }

    fn parameters_schema(&self) -> Value {
        let mut props = merge(
            json!({ "dataset_id": id_prop("Dataset ID") }),
            search_props(&self.config),
        );
        if self.strategy == SearchStrategy::Hybrid {
            props = merge(props, weight_props(&self.config));
        }
        object_schema(props, &["dataset_id", "query"])
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ApiResult<Value> {
        let dataset_id = get_str(&params, "dataset_id")?;
        let req = SearchRequest {
            query: get_str(&params, "query")?.to_string(),
            dataset_ids: vec![dataset_id.to_string()],
            strategy: self.strategy,
            top_k: get_opt_usize(&params, "top_k").unwrap_or(self.config.default_top_k),
            score_threshold: get_opt_f64(&params, "score_threshold"),
            weights: request_weights(&params)?,
        };
        let results = ctx.search.search(dataset_id, &req).await?;
        Ok(json!({
            "query": req.query,
            "dataset_id": dataset_id,
            "strategy": self.strategy,
            "count": results.len(),
            "results": results,
        }))
    }
}

/// Fan-out search across several datasets.
pub struct MultiDatasetSearchTool {
    config: SearchConfig,
}

impl MultiDatasetSearchTool {
    pub fn new(config: SearchConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Tool for MultiDatasetSearchTool {
    fn name(&self) -> &str {
        "multi_dataset_search"
    }

    fn description(&self) -> &str {
        "Search several datasets concurrently and merge the ranked results"
    }

    fn parameters_schema(&self) -> Value {
        let strategies: Vec<&str> = SearchStrategy::ALL.iter().map(|s| s.as_str()).collect();
        let props = merge(
            merge(
                json!({
                    "dataset_ids": {
                        "type": "array",
                        "minItems": 1,
                        "items": { "type": "string", "minLength": 1 },
                        "description": "Datasets to search"
                    },
                    "strategy": {
                        "type": "string",
                        "enum": strategies,
                        "description": "Search strategy (default semantic)"
                    },
                    "search_method": {
                        "type": "string",
                        "enum": strategies,
                        "description": "Alias of strategy"
                    }
                }),
                search_props(&self.config),
            ),
            weight_props(&self.config),
        );
        object_schema(props, &["dataset_ids", "query"])
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ApiResult<Value> {
        let strategy = requested_strategy(&params)?;
        let req = SearchRequest {
            query: get_str(&params, "query")?.to_string(),
            dataset_ids: get_str_list(&params, "dataset_ids")?,
            strategy,
            top_k: get_opt_usize(&params, "top_k").unwrap_or(self.config.default_top_k),
            score_threshold: get_opt_f64(&params, "score_threshold"),
            weights: request_weights(&params)?,
        };
        let outcome = ctx.search.multi_dataset(&req).await?;
        Ok(json!({
            "query": req.query,
            "strategy": strategy,
            "count": outcome.results.len(),
            "results": outcome.results,
            "datasets": outcome.datasets,
        }))
    }
}

/// `strategy`, or its alias `search_method`; semantic when neither is given.
fn requested_strategy(params: &Value) -> ApiResult<SearchStrategy> {
    let field = |name: &str| {
        params
            .get(name)
            .and_then(|v| v.as_str())
            .map(SearchStrategy::parse)
            .transpose()
    };
    match (field("strategy")?, field("search_method")?) {
        (Some(a), Some(b)) if a != b => Err(ApiError::invalid(format!(
            "strategy '{}' conflicts with search_method '{}'",
            a.as_str(),
            b.as_str()
        ))),
        (Some(s), _) | (None, Some(s)) => Ok(s),
        (None, None) => Ok(SearchStrategy::Semantic),
    }
}

// ============ Service tools ============

/// Probes upstream reachability and credential validity.
pub struct HealthCheckTool;

#[async_trait]
impl Tool for HealthCheckTool {
    fn name(&self) -> &str {
        "health_check"
    }

    fn description(&self) -> &str {
        "Check that the upstream knowledge base is reachable and the credential is accepted"
    }

    fn parameters_schema(&self) -> Value {
        object_schema(json!({}), &[])
    }

    async fn execute(&self, _params: Value, ctx: &ToolContext) -> ApiResult<Value> {
        let started = Instant::now();
        ctx.api.call(Operation::Health, json!({})).await?;
        Ok(json!({
            "status": "healthy",
            "base_url": ctx.info.base_url,
            "latency_ms": started.elapsed().as_millis() as u64,
        }))
    }
}

pub struct ServerInfoTool;

#[async_trait]
impl Tool for ServerInfoTool {
    fn name(&self) -> &str {
        "server_info"
    }

    fn description(&self) -> &str {
        "Report server name, version, upstream and capabilities"
    }

    fn parameters_schema(&self) -> Value {
        object_schema(json!({}), &[])
    }

    async fn execute(&self, _params: Value, ctx: &ToolContext) -> ApiResult<Value> {
        Ok(serde_json::to_value(&ctx.info).unwrap_or(Value::Null))
    }
}

// ============ Registry ============

/// Name-keyed registry of tools; names are unique.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Registry with every built-in tool.
    pub fn with_builtins(search: &SearchConfig) -> anyhow::Result<Self> {
        let mut registry = Self::new();
        for tool in api_tools() {
            registry.register(Box::new(tool))?;
        }
        for strategy in SearchStrategy::ALL {
            registry.register(Box::new(SearchTool::new(strategy, search.clone())))?;
        }
        registry.register(Box::new(MultiDatasetSearchTool::new(search.clone())))?;
        registry.register(Box::new(HealthCheckTool))?;
        registry.register(Box::new(ServerInfoTool))?;
        Ok(registry)
    }

    /// Register a tool. Fails if the name is already taken.
    pub fn register(&mut self, tool: Box<dyn Tool>) -> anyhow::Result<()> {
        if self.find(tool.name()).is_some() {
            bail!("tool '{}' is already registered", tool.name());
        }
        self.tools.push(tool);
        Ok(())
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
