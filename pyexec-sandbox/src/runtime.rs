//! Runtime trait and implementations

mod process;

use crate::types::{ExecutionStream, SandboxJob};
use crate::Result;
use async_trait::async_trait;

pub use process::ProcessRuntime;

/// Runtime abstraction for executing validated code.
///
/// Implementations own the job for its whole lifetime: they create and
/// remove its working directory and must report a [`crate::RunOutcome`]
/// on every path, including timeouts.
#[async_trait]
pub trait Runtime: Send + Sync {
    /// Start the job and return its streaming output
    async fn execute(&self, job: SandboxJob) -> Result<ExecutionStream>;

    /// Get runtime name
    fn name(&self) -> &str;
}
