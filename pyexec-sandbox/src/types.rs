//! Core types for sandbox execution

use crate::execution::ExecutionId;
use crate::package::PackageSpec;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

/// One inbound `execute_python` call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// The code to execute
    pub code: String,

    /// Packages that must be importable before the code runs
    #[serde(default)]
    pub packages: Vec<PackageSpec>,

    /// Optional timeout in seconds (None = configured default)
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl ExecutionRequest {
    /// Create a simple execution request
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            packages: Vec::new(),
            timeout_secs: None,
        }
    }

    /// Require a package
    pub fn with_package(mut self, spec: PackageSpec) -> Self {
        self.packages.push(spec);
        self
    }

    /// Set timeout in seconds
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }
}

/// Unit of work handed to a [`crate::Runtime`].
///
/// The runtime owns everything else the job needs (working directory,
/// captured output) and releases it before reporting the outcome.
#[derive(Debug, Clone)]
pub struct SandboxJob {
    pub id: ExecutionId,
    /// Code that already passed validation
    pub code: String,
    pub deadline: Instant,
    /// Extra import roots (the resolver's install target)
    pub python_path: Vec<PathBuf>,
}

/// Streaming execution output
pub struct ExecutionStream {
    /// Stdout stream
    pub stdout: mpsc::Receiver<Vec<u8>>,

    /// Stderr stream
    pub stderr: mpsc::Receiver<Vec<u8>>,

    /// Final outcome when the child has been reaped and its workdir removed
    pub result: oneshot::Receiver<RunOutcome>,
}

/// How a sandboxed child ended
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunOutcome {
    /// Exit code (None = killed or never started)
    pub exit_code: Option<i32>,

    /// Wall-clock milliseconds from spawn to termination
    pub duration_ms: u64,

    /// Whether the deadline elapsed first
    pub timed_out: bool,

    /// `repr()` of the snippet's `result` global, when it defined one
    pub result_repr: Option<String>,

    /// Sandbox setup or teardown failure
    pub internal_error: Option<String>,

    /// Call-scoped working directory (already removed)
    pub workdir: Option<PathBuf>,
}

impl RunOutcome {
    pub fn internal(duration_ms: u64, message: impl Into<String>) -> Self {
        Self {
            duration_ms,
            internal_error: Some(message.into()),
            ..Default::default()
        }
    }

    /// Check if the child ran to a clean exit
    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out && self.internal_error.is_none()
    }
}

/// Protocol-visible failure categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Rejected by the security validator
    Blocked,
    ResolutionTimeout,
    ResolutionFailed,
    ExecutionTimeout,
    ExecutionRuntimeError,
    InternalError,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Blocked => "Blocked",
            ErrorKind::ResolutionTimeout => "ResolutionTimeout",
            ErrorKind::ResolutionFailed => "ResolutionFailed",
            ErrorKind::ExecutionTimeout => "ExecutionTimeout",
            ErrorKind::ExecutionRuntimeError => "ExecutionRuntimeError",
            ErrorKind::InternalError => "InternalError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionError {
    pub kind: ErrorKind,
    pub message: String,
}

/// Result of one `execute_python` call.
///
/// `success == false` always carries an `error`; `result_repr` is only
/// populated on success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub result_repr: Option<String>,
    pub error: Option<ExecutionError>,
    pub duration_ms: u64,
}

impl ExecutionResult {
    pub fn succeeded(
        stdout: String,
        stderr: String,
        result_repr: Option<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            success: true,
            stdout,
            stderr,
            result_repr,
            error: None,
            duration_ms,
        }
    }

    /// A failure that happened before any output was produced
    pub fn failed(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: String::new(),
            result_repr: None,
            error: Some(ExecutionError {
                kind,
                message: message.into(),
            }),
            duration_ms: 0,
        }
    }

    /// Attach whatever output was captured before the failure
    pub fn with_output(mut self, stdout: String, stderr: String, duration_ms: u64) -> Self {
        self.stdout = stdout;
        self.stderr = stderr;
        self.duration_ms = duration_ms;
        self
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}
