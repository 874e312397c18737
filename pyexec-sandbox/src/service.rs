//! Sandbox service - the validate, resolve, execute pipeline

use crate::config::EngineConfig;
use crate::error::{ConfigError, ResolutionError};
use crate::execution::{collect, ExecutionId};
use crate::limits::ResourceLimits;
use crate::policy::{SecurityPolicy, ValidationVerdict};
use crate::resolver::{DependencyResolver, PipInstaller};
use crate::runtime::{ProcessRuntime, Runtime};
use crate::types::{ErrorKind, ExecutionRequest, ExecutionResult, SandboxJob};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

const TRUNCATION_MARKER: &str = "[output truncated]";

/// Runs one `execute_python` call through every stage.
///
/// Stages short-circuit: a rejected snippet never reaches the resolver and a
/// failed resolution never spawns a child. Every outcome, including
/// failures, comes back as an [`ExecutionResult`].
pub struct SandboxService {
    policy: SecurityPolicy,
    resolver: DependencyResolver,
    runtime: Arc<dyn Runtime>,
    limits: ResourceLimits,
}

impl SandboxService {
    pub fn new(
        policy: SecurityPolicy,
        resolver: DependencyResolver,
        runtime: impl Runtime + 'static,
        limits: ResourceLimits,
    ) -> Self {
        Self {
            policy,
            resolver,
            runtime: Arc::new(runtime),
            limits,
        }
    }

    /// Wire the production stages from configuration
    pub fn from_config(config: &EngineConfig) -> Result<Self, ConfigError> {
        let policy = SecurityPolicy::new(config.security.rules.clone())?;
        let installer = PipInstaller::new(&config.resolver.interpreter, config.resolver.site_dir())
            .with_no_deps(config.resolver.no_deps)
            .with_index_url(config.resolver.index_url.clone());
        let resolver = DependencyResolver::new(Arc::new(installer), config.resolver.timeout)
            .with_preinstalled(&config.resolver.preinstalled);
        let runtime = ProcessRuntime::new(config.sandbox.clone());
        Ok(Self::new(
            policy,
            resolver,
            runtime,
            config.sandbox.limits.clone(),
        ))
    }

    pub async fn execute_python(&self, request: ExecutionRequest) -> ExecutionResult {
        let id = ExecutionId::new();
        info!(
            execution_id = %id,
            runtime = self.runtime.name(),
            code_len = request.code.len(),
            packages = request.packages.len(),
            "Executing code"
        );

        for advisory in self.policy.advisories(&request.code) {
            warn!(execution_id = %id, rule = %advisory.id, "{}", advisory.reason);
        }
        if let ValidationVerdict::Rejected {
            reason,
            offending_pattern,
        } = self.policy.validate(&request.code)
        {
            warn!(execution_id = %id, rule = %offending_pattern, "Snippet rejected");
            return ExecutionResult::failed(ErrorKind::Blocked, reason);
        }

        if !request.packages.is_empty() {
            let deadline = Instant::now() + self.resolver.timeout();
            match self.resolver.resolve(&request.packages, deadline).await {
                Ok(report) => debug!(
                    execution_id = %id,
                    cached = report.satisfied.len(),
                    installed = report.installed.len(),
                    "Requirements resolved"
                ),
                Err(e) => return ExecutionResult::failed(resolution_kind(&e), e.to_string()),
            }
        }

        let timeout = self.limits.effective_timeout(request.timeout_secs);
        let job = SandboxJob {
            id,
            code: request.code,
            deadline: Instant::now() + timeout,
            python_path: self.resolver.import_paths(),
        };

        let stream = match self.runtime.execute(job).await {
            Ok(stream) => stream,
            Err(e) => {
                error!(execution_id = %id, "Runtime refused job: {:#}", e);
                return ExecutionResult::failed(ErrorKind::InternalError, e.to_string());
            }
        };
        let run = collect(stream, self.limits.max_output_bytes).await;
        let outcome = run.outcome;

        if let Some(message) = outcome.internal_error {
            return ExecutionResult::failed(ErrorKind::InternalError, message).with_output(
                run.stdout,
                run.stderr,
                outcome.duration_ms,
            );
        }
        if outcome.timed_out {
            return ExecutionResult::failed(
                ErrorKind::ExecutionTimeout,
                format!("Execution exceeded {}s", timeout.as_secs()),
            )
            .with_output(run.stdout, run.stderr, outcome.duration_ms);
        }
        match outcome.exit_code {
            Some(0) => ExecutionResult::succeeded(
                run.stdout,
                run.stderr,
                outcome.result_repr,
                outcome.duration_ms,
            ),
            code => {
                let message = runtime_error_message(&run.stderr, code);
                ExecutionResult::failed(ErrorKind::ExecutionRuntimeError, message).with_output(
                    run.stdout,
                    run.stderr,
                    outcome.duration_ms,
                )
            }
        }
    }

    pub fn policy(&self) -> &SecurityPolicy {
        &self.policy
    }

    pub fn resolver(&self) -> &DependencyResolver {
        &self.resolver
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    /// Get the runtime name
    pub fn runtime_name(&self) -> &str {
        self.runtime.name()
    }
}

fn resolution_kind(err: &ResolutionError) -> ErrorKind {
    match err {
        ResolutionError::Timeout(_) => ErrorKind::ResolutionTimeout,
        _ => ErrorKind::ResolutionFailed,
    }
}

/// The exception summary is the last line a traceback prints
fn runtime_error_message(stderr: &str, exit_code: Option<i32>) -> String {
    stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty() && *line != TRUNCATION_MARKER)
        .map(str::to_string)
        .unwrap_or_else(|| match exit_code {
            Some(code) => format!("process exited with status {}", code),
            None => "process terminated by a signal".to_string(),
        })
}
