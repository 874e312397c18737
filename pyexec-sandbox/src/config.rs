//! Engine configuration
//!
//! Every section has defaults, so an empty TOML document is a valid
//! configuration. Durations use humantime notation (`"30s"`, `"2m"`).

use crate::error::ConfigError;
use crate::limits::ResourceLimits;
use crate::policy::{default_rules, SecurityPolicy, SecurityRule};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub inspector: InspectorConfig,
}

/// Execution sandbox configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Interpreter used for snippets
    pub interpreter: String,
    /// Arguments placed before the snippet
    pub interpreter_args: Vec<String>,
    /// Run through the result-capturing harness (Python only)
    pub capture_result: bool,
    /// Parent of the per-call working directories (None = system temp dir)
    pub work_root: Option<PathBuf>,
    /// Host variables passed through to the child
    pub env_allowlist: Vec<String>,
    /// Fixed variables set on every child
    pub env: BTreeMap<String, String>,
    pub limits: ResourceLimits,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        let mut env = BTreeMap::new();
        env.insert("MPLBACKEND".to_string(), "Agg".to_string());
        Self {
            interpreter: "python3".to_string(),
            interpreter_args: vec!["-s".to_string(), "-u".to_string()],
            capture_result: true,
            work_root: None,
            env_allowlist: ["PATH", "LANG", "LC_ALL", "TZ"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            env,
            limits: ResourceLimits::default(),
        }
    }
}

impl SandboxConfig {
    pub fn work_root(&self) -> PathBuf {
        self.work_root.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Dependency resolver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Interpreter whose `pip` performs installs
    pub interpreter: String,
    /// Install target, added to every child's PYTHONPATH
    pub site_dir: Option<PathBuf>,
    /// Budget for one batch install
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Install only the named distributions, not their dependencies
    pub no_deps: bool,
    pub index_url: Option<String>,
    /// Names that count as available without installing
    pub preinstalled: Vec<String>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
            site_dir: None,
            timeout: Duration::from_secs(30),
            no_deps: true,
            index_url: None,
            preinstalled: [
                "pandas",
                "numpy",
                "matplotlib",
                "scipy",
                "sklearn",
                "seaborn",
                "requests",
                "fastapi",
                "pydantic",
                "uvicorn",
                "json",
                "os",
                "re",
                "datetime",
                "math",
                "random",
                "collections",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl ResolverConfig {
    pub fn site_dir(&self) -> PathBuf {
        self.site_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("py_packages"))
    }
}

/// Ordered security rules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default = "default_rules")]
    pub rules: Vec<SecurityRule>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            rules: default_rules(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InspectorConfig {
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for InspectorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
        }
    }
}

impl EngineConfig {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Load from `path` when given, otherwise use defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject configurations the engine cannot honor
    pub fn validate(&self) -> Result<(), ConfigError> {
        let limits = &self.sandbox.limits;
        if limits.timeout.is_zero() {
            return Err(ConfigError::Invalid("sandbox.limits.timeout must be non-zero".into()));
        }
        if limits.timeout > limits.max_timeout {
            return Err(ConfigError::Invalid(format!(
                "sandbox.limits.timeout ({:?}) exceeds max_timeout ({:?})",
                limits.timeout, limits.max_timeout
            )));
        }
        if self.resolver.timeout.is_zero() {
            return Err(ConfigError::Invalid("resolver.timeout must be non-zero".into()));
        }
        if self.inspector.timeout.is_zero() {
            return Err(ConfigError::Invalid("inspector.timeout must be non-zero".into()));
        }
        if self.sandbox.interpreter.trim().is_empty() {
            return Err(ConfigError::Invalid("sandbox.interpreter is empty".into()));
        }
        SecurityPolicy::new(self.security.rules.clone())?;
        Ok(())
    }
}
