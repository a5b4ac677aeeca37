//! MCP streamable-HTTP bridge.
//!
//! Exposes the tool catalog to standard MCP clients at `/mcp` on the HTTP
//! transports. Tool calls are not executed here: they are submitted through
//! the same [`RequestSink`] as every other transport, so they pass through
//! the protocol server's lifecycle (a call made while draining is refused
//! with `ServerShuttingDown` like any other).

use std::borrow::Cow;
use std::sync::Arc;

use rmcp::model::*;
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpServerConfig, StreamableHttpService,
};
use rmcp::{ErrorData as McpError, ServerHandler};
use tokio_util::sync::CancellationToken;

use crate::error::ErrorKind;
use crate::protocol::Request;
use crate::tools::ToolRegistry;
use crate::transport::RequestSink;

/// Tool descriptors, captured once from the registry at startup.
pub type McpCatalog = Arc<Vec<Tool>>;

pub fn catalog(registry: &ToolRegistry) -> McpCatalog {
    Arc::new(
        registry
            .tools()
            .iter()
            .map(|t| to_mcp_tool(t.as_ref()))
            .collect(),
    )
}

fn to_mcp_tool(tool: &dyn crate::tools::Tool) -> Tool {
    let input_schema: Arc<serde_json::Map<String, serde_json::Value>> =
        match tool.parameters_schema() {
            serde_json::Value::Object(map) => Arc::new(map),
            _ => Arc::new(serde_json::Map::new()),
        };

    Tool {
        name: Cow::Owned(tool.name().to_string()),
        title: None,
        description: Some(Cow::Owned(tool.description().to_string())),
        input_schema,
        output_schema: None,
        annotations: Some(ToolAnnotations::new().read_only(tool.read_only())),
        execution: None,
        icons: None,
        meta: None,
    }
}

#[derive(Clone)]
pub struct McpBridge {
    sink: RequestSink,
    tools: McpCatalog,
}

impl McpBridge {
    pub fn new(sink: RequestSink, tools: McpCatalog) -> Self {
        Self { sink, tools }
    }
}

impl ServerHandler for McpBridge {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: env!("CARGO_PKG_NAME").to_string(),
                title: Some("Dify RAG MCP".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Knowledge-base access: manage datasets, documents and segments, and search \
                 them with semantic, keyword, hybrid or full-text retrieval. Use \
                 multi_dataset_search to query several datasets at once."
                    .to_string(),
            ),
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        std::future::ready(Ok(ListToolsResult::with_all_items(
            self.tools.as_ref().clone(),
        )))
    }

    fn get_tool(&self, name: &str) -> Option<Tool> {
        self.tools.iter().find(|t| t.name == name).cloned()
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let params = request
            .arguments
            .map(serde_json::Value::Object)
            .unwrap_or(serde_json::Value::Object(serde_json::Map::new()));

        let id = uuid::Uuid::new_v4().to_string();
        let response = self
            .sink
            .call(Request::new(id, request.name.to_string(), params))
            .await;

        match (response.result, response.error) {
            (Some(result), None) => {
                let text = serde_json::to_string_pretty(&result).unwrap_or_default();
                Ok(CallToolResult::success(vec![Content::text(text)]))
            }
            (_, Some(error)) if error.kind == ErrorKind::MethodNotFound => Err(McpError::new(
                ErrorCode::METHOD_NOT_FOUND,
                format!("no tool registered with name: {}", request.name),
                None,
            )),
            (_, Some(error)) => {
                let text = serde_json::to_string_pretty(&error).unwrap_or_default();
                Ok(CallToolResult::error(vec![Content::text(text)]))
            }
            (None, None) => Ok(CallToolResult::success(vec![])),
        }
    }
}

/// Builds the `/mcp` service; sessions end when `cancel` fires.
pub fn service(
    sink: RequestSink,
    tools: McpCatalog,
    cancel: CancellationToken,
) -> StreamableHttpService<McpBridge, LocalSessionManager> {
    StreamableHttpService::new(
        move || Ok(McpBridge::new(sink.clone(), tools.clone())),
        Arc::new(LocalSessionManager::default()),
        StreamableHttpServerConfig {
            cancellation_token: cancel,
            ..Default::default()
        },
    )
}
