//! Tool dispatcher: names, argument shapes and response envelopes

use crate::error::DispatchError;
use crate::inspector::EnvironmentInspector;
use crate::package::PackageSpec;
use crate::service::SandboxService;
use crate::types::ExecutionRequest;
use pyexec_common::Tool;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolName {
    ExecutePython,
    ListPreinstalledPackages,
    GetEnvironmentInfo,
}

impl ToolName {
    pub const ALL: [ToolName; 3] = [
        ToolName::ExecutePython,
        ToolName::ListPreinstalledPackages,
        ToolName::GetEnvironmentInfo,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ToolName::ExecutePython => "execute_python",
            ToolName::ListPreinstalledPackages => "list_preinstalled_packages",
            ToolName::GetEnvironmentInfo => "get_environment_info",
        }
    }
}

impl FromStr for ToolName {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ToolName::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| DispatchError::UnknownTool(s.to_string()))
    }
}

impl std::fmt::Display for ToolName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of one handled call; `is_error` marks execution failures
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResponse {
    pub payload: Value,
    pub is_error: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ExecutePythonArgs {
    code: String,
    #[serde(default)]
    requirements: Option<Vec<String>>,
    #[serde(default)]
    timeout_secs: Option<u64>,
}

pub struct ToolDispatcher {
    service: Arc<SandboxService>,
    inspector: Arc<EnvironmentInspector>,
}

impl ToolDispatcher {
    pub fn new(service: Arc<SandboxService>, inspector: Arc<EnvironmentInspector>) -> Self {
        Self { service, inspector }
    }

    pub fn service(&self) -> &SandboxService {
        &self.service
    }

    /// Declared schema of every tool, in a stable order
    pub fn tools(&self) -> Vec<Tool> {
        vec![
            Tool::new(
                ToolName::ExecutePython.as_str(),
                "Execute Python code in an isolated sandbox. Optionally install \
                 packages first. Assign to `result` to get its repr back.",
                json!({
                    "type": "object",
                    "properties": {
                        "code": {
                            "type": "string",
                            "description": "Python source to run"
                        },
                        "requirements": {
                            "type": ["array", "null"],
                            "items": { "type": "string" },
                            "description": "Package specifiers such as `tabulate` or `rich==13.7.0`"
                        },
                        "timeout_secs": {
                            "type": "integer",
                            "minimum": 1,
                            "description": "Execution budget in seconds"
                        }
                    },
                    "required": ["code"],
                    "additionalProperties": false
                }),
            ),
            Tool::without_arguments(
                ToolName::ListPreinstalledPackages.as_str(),
                "List the packages available without installation",
            ),
            Tool::without_arguments(
                ToolName::GetEnvironmentInfo.as_str(),
                "Describe the interpreter, platform, memory and installed packages",
            ),
        ]
    }

    /// Route one call. Name and arguments are checked before any handler runs.
    pub async fn dispatch(&self, name: &str, arguments: Value) -> Result<ToolResponse, DispatchError> {
        let tool: ToolName = name.parse()?;
        let arguments = object_arguments(tool, arguments)?;
        info!(tool = tool.as_str(), "Dispatching tool call");

        match tool {
            ToolName::ExecutePython => {
                let request = execute_request(arguments)?;
                let result = self.service.execute_python(request).await;
                Ok(ToolResponse {
                    is_error: !result.success,
                    payload: to_payload(&result),
                })
            }
            ToolName::ListPreinstalledPackages => {
                no_arguments(tool, &arguments)?;
                let packages = self.inspector.preinstalled_packages().await;
                Ok(ToolResponse {
                    payload: json!({ "packages": packages }),
                    is_error: false,
                })
            }
            ToolName::GetEnvironmentInfo => {
                no_arguments(tool, &arguments)?;
                let snapshot = self.inspector.snapshot().await;
                Ok(ToolResponse {
                    payload: to_payload(&snapshot),
                    is_error: false,
                })
            }
        }
    }
}

fn object_arguments(tool: ToolName, arguments: Value) -> Result<Map<String, Value>, DispatchError> {
    match arguments {
        Value::Null => Ok(Map::new()),
        Value::Object(map) => Ok(map),
        other => Err(DispatchError::invalid(
            tool.as_str(),
            format!("arguments must be an object, got {}", json_type(&other)),
        )),
    }
}

fn no_arguments(tool: ToolName, arguments: &Map<String, Value>) -> Result<(), DispatchError> {
    match arguments.keys().next() {
        None => Ok(()),
        Some(key) => Err(DispatchError::invalid(
            tool.as_str(),
            format!("unexpected argument '{}'", key),
        )),
    }
}

fn execute_request(arguments: Map<String, Value>) -> Result<ExecutionRequest, DispatchError> {
    let tool = ToolName::ExecutePython.as_str();
    let args: ExecutePythonArgs = serde_json::from_value(Value::Object(arguments))
        .map_err(|e| DispatchError::invalid(tool, e.to_string()))?;

    if args.timeout_secs == Some(0) {
        return Err(DispatchError::invalid(tool, "timeout_secs must be positive"));
    }
    let packages = args
        .requirements
        .unwrap_or_default()
        .iter()
        .map(|r| PackageSpec::parse(r))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| DispatchError::invalid(tool, e.to_string()))?;

    Ok(ExecutionRequest {
        code: args.code,
        packages,
        timeout_secs: args.timeout_secs,
    })
}

fn to_payload<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|e| json!({ "error": e.to_string() }))
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
