//! Model Context Protocol engine served behind each session's transport.

use std::future::Future;
use std::sync::Arc;

use rmcp::handler::server::{
    tool::{ToolCallContext, ToolRoute, ToolRouter},
    ServerHandler,
};
use rmcp::model::{
    CallToolRequestParam, CallToolResult, Content, Implementation, ListToolsResult,
    PaginatedRequestParam, ServerCapabilities, ServerInfo, Tool,
};
use rmcp::service::{RequestContext, RoleServer};
use serde::Deserialize;
use tracing::info_span;

/// Arguments of the `echo` tool.
#[derive(Debug, Deserialize)]
struct EchoInput {
    message: String,
}

/// MCP server exposing the relay's tool surface.
#[derive(Debug, Clone, Default)]
pub struct RelayToolServer;

impl RelayToolServer {
    /// Create a server instance; one is built per session.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Render the `echo` tool's reply text.
    #[must_use]
    pub fn echo_text(message: &str) -> String {
        format!("Tool echo: {message}")
    }

    fn tool_router() -> ToolRouter<Self> {
        let mut router = ToolRouter::new();
        router.add_route(ToolRoute::new_dyn(Self::echo_tool(), |context| {
            Box::pin(handle_echo(context))
        }));
        router
    }

    /// Convert a `serde_json::Value::Object` into the `Arc<Map>` expected by `Tool`.
    fn schema(value: serde_json::Value) -> Arc<serde_json::Map<String, serde_json::Value>> {
        match value {
            serde_json::Value::Object(map) => Arc::new(map),
            _ => Arc::new(serde_json::Map::default()),
        }
    }

    /// Every tool this server advertises.
    #[must_use]
    pub fn all_tools() -> Vec<Tool> {
        vec![Self::echo_tool()]
    }

    fn echo_tool() -> Tool {
        Tool::new(
            "echo",
            "Echo a message",
            Self::schema(serde_json::json!({
                "type": "object",
                "properties": {
                    "message": { "type": "string" }
                },
                "required": ["message"]
            })),
        )
    }
}

async fn handle_echo(
    context: ToolCallContext<'_, RelayToolServer>,
) -> Result<CallToolResult, rmcp::ErrorData> {
    let args = context.arguments.unwrap_or_default();
    let input: EchoInput = serde_json::from_value(serde_json::Value::Object(args)).map_err(|err| {
        rmcp::ErrorData::invalid_params(format!("invalid echo parameters: {err}"), None)
    })?;

    Ok(CallToolResult::success(vec![Content::text(
        RelayToolServer::echo_text(&input.message),
    )]))
}

impl ServerHandler for RelayToolServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some("Relayed MCP server. Call `echo` to round-trip a message.".into()),
            ..ServerInfo::default()
        }
    }

    fn call_tool(
        &self,
        request: CallToolRequestParam,
        context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<CallToolResult, rmcp::ErrorData>> + Send + '_ {
        let router = Self::tool_router();
        let _span = info_span!("call_tool", tool = %request.name).entered();

        async move {
            router
                .call(ToolCallContext::new(self, request, context))
                .await
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<ListToolsResult, rmcp::ErrorData>> + Send + '_ {
        std::future::ready(Ok(ListToolsResult::with_all_items(Self::all_tools())))
    }
}
