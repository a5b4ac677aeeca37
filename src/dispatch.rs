//! Method routing.
//!
//! The [`Dispatcher`] is the transport-agnostic core: it takes a decoded
//! [`Request`], resolves the method name against the protocol methods and
//! the [`ToolRegistry`], validates parameters and runs the handler.
//!
//! | Method | Handler |
//! |--------|---------|
//! | `tools/list` | tool catalog with JSON Schemas |
//! | `resources/list` | resource URI templates |
//! | `resources/read` | [`read_resource`] for `params.uri` |
//! | anything else | the registered tool of that name, or `MethodNotFound` |
//!
//! The dispatcher holds no per-request state; one instance is shared by
//! every concurrent request.

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;

use crate::client::{KnowledgeApi, Operation};
use crate::config::Config;
use crate::error::{ApiError, ApiResult};
use crate::params::{get_str, validate_params};
use crate::protocol::{Request, Response};
use crate::resources::{read_resource, templates};
use crate::tools::{ToolContext, ToolRegistry};

pub const TOOLS_LIST: &str = "tools/list";
pub const RESOURCES_LIST: &str = "resources/list";
pub const RESOURCES_READ: &str = "resources/read";

pub struct Dispatcher {
    tools: ToolRegistry,
    ctx: ToolContext,
}

impl Dispatcher {
    pub fn new(tools: ToolRegistry, ctx: ToolContext) -> Self {
        Self { tools, ctx }
    }

    /// Dispatcher with the built-in tool set over `api`.
    pub fn from_config(api: Arc<dyn KnowledgeApi>, config: &Config) -> anyhow::Result<Self> {
        let tools = ToolRegistry::with_builtins(&config.search)?;
        Ok(Self::new(tools, ToolContext::new(api, config)))
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn context(&self) -> &ToolContext {
        &self.ctx
    }

    /// Upstream reachability probe.
    pub async fn health(&self) -> ApiResult<()> {
        self.ctx.api.call(Operation::Health, json!({})).await.map(|_| ())
    }

    pub fn list_tools(&self) -> Value {
        let tools: Vec<Value> = self
            .tools
            .tools()
            .iter()
            .map(|t| {
                json!({
                    "name": t.name(),
                    "description": t.description(),
                    "input_schema": t.parameters_schema(),
                    "read_only": t.read_only(),
                })
            })
            .collect();
        json!({ "tools": tools })
    }

    pub async fn dispatch(&self, method: &str, params: Value) -> ApiResult<Value> {
        match method {
            TOOLS_LIST => Ok(self.list_tools()),
            RESOURCES_LIST => Ok(json!({ "resources": templates() })),
            RESOURCES_READ => {
                let uri = get_str(&params, "uri")?;
                let contents = read_resource(self.ctx.api.as_ref(), uri).await?;
                Ok(json!({ "uri": uri, "contents": contents }))
            }
            name => {
                let tool = self
                    .tools
                    .find(name)
                    .ok_or_else(|| ApiError::MethodNotFound(name.to_string()))?;
                let params = validate_params(&tool.parameters_schema(), &params)?;
                tool.execute(params, &self.ctx).await
            }
        }
    }

    pub async fn handle(&self, request: Request) -> Response {
        let started = Instant::now();
        let Request { id, method, params } = request;
        let result = self.dispatch(&method, params).await;
        match &result {
            Ok(_) => tracing::debug!(
                method = %method,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "request completed"
            ),
            Err(e) => tracing::info!(
                method = %method,
                kind = %e.kind(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                error = %e,
                "request failed"
            ),
        }
        Response::from_result(id, result)
    }
}
