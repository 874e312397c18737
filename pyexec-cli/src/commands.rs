//! CLI command implementations
//!
//! One-shot commands build the same dispatcher the servers use, so a
//! `pyexec run` goes through exactly the checks a tool call does.

use anyhow::{Context, Result};
use pyexec_sandbox::{
    EngineConfig, EnvironmentInspector, EnvironmentSnapshot, SecurityPolicy, ToolResponse,
    ValidationVerdict,
};
use pyexec_transport::build_dispatcher;
use serde_json::{json, Value};
use tokio::io::AsyncReadExt;
use tracing::debug;

/// Read a snippet from `path`, or from stdin when `path` is `-`
pub async fn read_source(path: &str) -> Result<String> {
    if path == "-" {
        let mut source = String::new();
        tokio::io::stdin()
            .read_to_string(&mut source)
            .await
            .context("Failed to read snippet from stdin")?;
        return Ok(source);
    }
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read snippet from {}", path))
}

fn run_arguments(code: String, requirements: Vec<String>, timeout_secs: Option<u64>) -> Value {
    let mut arguments = json!({ "code": code, "requirements": requirements });
    if let Some(secs) = timeout_secs {
        arguments["timeout_secs"] = json!(secs);
    }
    arguments
}

/// Execute a snippet through the `execute_python` tool
pub async fn execute_run(
    config: &EngineConfig,
    code: String,
    requirements: Vec<String>,
    timeout_secs: Option<u64>,
) -> Result<ToolResponse> {
    let dispatcher = build_dispatcher(config)?;
    debug!(requirements = ?requirements, "Running snippet");
    let response = dispatcher
        .dispatch("execute_python", run_arguments(code, requirements, timeout_secs))
        .await?;
    Ok(response)
}

/// Validate without executing
pub fn execute_check(config: &EngineConfig, code: &str) -> Result<ValidationVerdict> {
    let policy = SecurityPolicy::new(config.security.rules.clone())?;
    Ok(policy.validate(code))
}

pub fn list_tools(config: &EngineConfig) -> Result<Value> {
    let dispatcher = build_dispatcher(config)?;
    Ok(serde_json::to_value(dispatcher.tools())?)
}

pub async fn environment(config: &EngineConfig) -> EnvironmentSnapshot {
    EnvironmentInspector::from_config(config).snapshot().await
}
