//! PyExec Sandbox - validated, time-bounded Python execution
//!
//! Runs untrusted snippets through a fixed pipeline: a static security
//! pre-check, dependency resolution against a warm-instance cache, and an
//! isolated child process with a hard deadline and guaranteed teardown.
//! The [`ToolDispatcher`] exposes the pipeline as three named tools.

mod config;
mod dispatcher;
mod error;
mod execution;
mod inspector;
mod limits;
mod package;
mod policy;
mod resolver;
mod runtime;
mod service;
mod supervisor;
mod types;

pub use config::{EngineConfig, InspectorConfig, ResolverConfig, SandboxConfig, SecurityConfig};
pub use dispatcher::{ToolDispatcher, ToolName, ToolResponse};
pub use error::{ConfigError, DispatchError, ResolutionError, SandboxError};
pub use execution::{collect, CollectedRun, ExecutionId, OutputBuffer};
pub use inspector::{EnvironmentInspector, EnvironmentSnapshot, PackageInfo};
pub use limits::ResourceLimits;
pub use package::{normalize_name, PackageSpec};
pub use policy::{RuleKind, SecurityPolicy, SecurityRule, Severity, ValidationVerdict};
pub use resolver::{
    DependencyResolver, InstalledPackage, PackageCache, PackageCacheEntry, PackageInstaller,
    PipInstaller, ResolveReport,
};
pub use runtime::{ProcessRuntime, Runtime};
pub use service::SandboxService;
pub use types::{
    ErrorKind, ExecutionError, ExecutionRequest, ExecutionResult, ExecutionStream, RunOutcome,
    SandboxJob,
};

/// Re-export common error types
pub type Result<T> = anyhow::Result<T>;
