use std::path::PathBuf;
use thiserror::Error;

/// Failures while loading or validating [`crate::EngineConfig`]
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid security rule '{id}': {message}")]
    InvalidRule { id: String, message: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Sandbox setup and teardown failures, reported as internal errors
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Failed to create working directory under {root}: {source}")]
    WorkDir {
        root: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to spawn {interpreter}: {source}")]
    Spawn {
        interpreter: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Sandbox I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to remove working directory {path}: {source}")]
    Cleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Dependency resolution failures; terminal for the current call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("Package installation exceeded its {0}s budget")]
    Timeout(u64),

    #[error("Package installation failed: {stderr_tail}")]
    InstallFailed { stderr_tail: String },

    #[error("Failed to launch installer: {0}")]
    Spawn(String),

    #[error("Invalid package specifier '{0}'")]
    InvalidSpecifier(String),
}

/// Protocol-level rejections; raised before any handler runs
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments for {tool}: {message}")]
    InvalidArguments { tool: String, message: String },
}

impl DispatchError {
    /// Wire name of the error category
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::UnknownTool(_) => "UnknownTool",
            DispatchError::InvalidArguments { .. } => "InvalidArguments",
        }
    }

    pub(crate) fn invalid(tool: &str, message: impl Into<String>) -> Self {
        DispatchError::InvalidArguments {
            tool: tool.to_string(),
            message: message.into(),
        }
    }
}
