//! JSON-RPC method routing for the tool server

use pyexec_common::{
    error_codes, CallToolResult, Implementation, InitializeResponse, JsonRpcError, JsonRpcMessage,
    JsonRpcRequest, JsonRpcResponse, RequestId, ServerCapabilities, ToolCapabilities,
    PROTOCOL_VERSION,
};
use pyexec_sandbox::ToolDispatcher;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const SERVER_NAME: &str = "PythonInterpreter";

const INSTRUCTIONS: &str = "Run Python snippets with execute_python. Pass extra packages in \
`requirements`; assign to `result` to get its repr back. Use list_preinstalled_packages and \
get_environment_info to see what is already available.";

#[derive(Debug, Deserialize)]
struct CallToolParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

/// Answers `initialize`, `ping`, `tools/list` and `tools/call`
pub struct McpHandler {
    dispatcher: Arc<ToolDispatcher>,
    server_info: Implementation,
}

impl McpHandler {
    pub fn new(dispatcher: Arc<ToolDispatcher>) -> Self {
        Self {
            dispatcher,
            server_info: Implementation::new(SERVER_NAME, env!("CARGO_PKG_VERSION")),
        }
    }

    pub fn dispatcher(&self) -> &ToolDispatcher {
        &self.dispatcher
    }

    /// Handle one raw frame; `None` means nothing is sent back
    pub async fn handle_line(&self, line: &str) -> Option<JsonRpcResponse> {
        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                warn!("Unparseable frame: {}", e);
                return Some(JsonRpcResponse::failure(
                    RequestId::Null,
                    JsonRpcError::parse_error(format!("Parse error: {}", e)),
                ));
            }
        };

        // A frame with both `id` and `method` is a request; it must not
        // fall through to the notification shape when the id is malformed.
        if value.get("id").is_some() && value.get("method").is_some() {
            return Some(match serde_json::from_value::<JsonRpcRequest>(value) {
                Ok(request) => self.handle_request(request).await,
                Err(e) => invalid_request(e),
            });
        }

        match serde_json::from_value::<JsonRpcMessage>(value) {
            Ok(message) => self.handle_message(message).await,
            Err(e) => Some(invalid_request(e)),
        }
    }

    pub async fn handle_message(&self, message: JsonRpcMessage) -> Option<JsonRpcResponse> {
        match message {
            JsonRpcMessage::Request(request) => Some(self.handle_request(request).await),
            JsonRpcMessage::Notification(notification) => {
                debug!(method = %notification.method, "Notification received");
                None
            }
            JsonRpcMessage::Response(response) => {
                debug!(id = %response.id, "Ignoring response from client");
                None
            }
        }
    }

    pub async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();
        debug!(id = %id, method = %request.method, "Request received");

        let outcome = match request.method.as_str() {
            "initialize" => Ok(self.initialize()),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({ "tools": self.dispatcher.tools() })),
            "tools/call" => self.call_tool(request.params).await,
            other => Err(JsonRpcError::method_not_found(other)),
        };

        match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(error) => JsonRpcResponse::failure(id, error),
        }
    }

    fn initialize(&self) -> Value {
        let response = InitializeResponse {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolCapabilities {
                    list_changed: Some(false),
                }),
            },
            server_info: self.server_info.clone(),
            instructions: Some(INSTRUCTIONS.to_string()),
        };
        info!(protocol = PROTOCOL_VERSION, "Client initialized session");
        serde_json::to_value(response).unwrap_or_else(|_| json!({}))
    }

    async fn call_tool(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let params: CallToolParams = serde_json::from_value(params.unwrap_or(Value::Null))
            .map_err(|e| JsonRpcError::invalid_params(format!("Invalid tools/call params: {}", e)))?;

        let response = self
            .dispatcher
            .dispatch(&params.name, params.arguments)
            .await
            .map_err(|e| {
                warn!(tool = %params.name, kind = e.kind(), "Tool call rejected: {}", e);
                JsonRpcError::invalid_params(e.to_string()).with_data(json!({ "kind": e.kind() }))
            })?;

        let result = CallToolResult::from_payload(response.payload, response.is_error);
        serde_json::to_value(result).map_err(|e| {
            JsonRpcError::new(
                error_codes::INTERNAL_ERROR,
                format!("Failed to encode tool result: {}", e),
            )
        })
    }
}

fn invalid_request(err: serde_json::Error) -> JsonRpcResponse {
    warn!("Malformed request: {}", err);
    JsonRpcResponse::failure(
        RequestId::Null,
        JsonRpcError::new(
            error_codes::INVALID_REQUEST,
            format!("Invalid request: {}", err),
        ),
    )
}
