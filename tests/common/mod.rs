//! Common test utilities shared across integration and E2E tests


pub use fakes::*;

use pyexec_sandbox::{
    DependencyResolver, EngineConfig, EnvironmentInspector, PackageInstaller, ResourceLimits,
    SandboxConfig, SandboxService, SecurityPolicy, ToolDispatcher,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Setup logging for tests
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("pyexec_sandbox=debug,pyexec_transport=debug")
        .with_test_writer()
        .try_init();
}

/// Whether a usable `python3` is on PATH
pub fn python_available() -> bool {
    std::process::Command::new("python3")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Scratch directories for one engine instance
pub struct Scratch {
    pub work_root: TempDir,
    pub site_dir: TempDir,
}

impl Scratch {
    pub fn new() -> Self {
        Self {
            work_root: tempfile::tempdir().expect("Failed to create work root"),
            site_dir: tempfile::tempdir().expect("Failed to create site dir"),
        }
    }

    pub fn work_root(&self) -> &Path {
        self.work_root.path()
    }

    pub fn site_dir(&self) -> PathBuf {
        self.site_dir.path().to_path_buf()
    }

    /// Entries left behind under the work root
    pub fn leftovers(&self) -> Vec<PathBuf> {
        std::fs::read_dir(self.work_root())
            .map(|entries| entries.filter_map(|e| e.ok()).map(|e| e.path()).collect())
            .unwrap_or_default()
    }
}

impl Default for Scratch {
    fn default() -> Self {
        Self::new()
    }
}

/// Engine that runs snippets with `/bin/sh`, so process behavior is
/// testable without Python
pub fn shell_config(scratch: &Scratch) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.sandbox = SandboxConfig {
        interpreter: "sh".to_string(),
        interpreter_args: Vec::new(),
        capture_result: false,
        work_root: Some(scratch.work_root().to_path_buf()),
        limits: ResourceLimits {
            kill_grace: Duration::from_millis(500),
            ..ResourceLimits::default()
        },
        ..SandboxConfig::default()
    };
    config.resolver.site_dir = Some(scratch.site_dir());
    config
}

/// Engine that runs real Python snippets
pub fn python_config(scratch: &Scratch) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.sandbox.work_root = Some(scratch.work_root().to_path_buf());
    config.sandbox.limits.kill_grace = Duration::from_millis(500);
    config.resolver.site_dir = Some(scratch.site_dir());
    config
}

/// Service wired from `config`, with test doubles at the trait seams
pub fn service_with(
    config: &EngineConfig,
    installer: Arc<dyn PackageInstaller>,
    runtime: CountingRuntime,
) -> SandboxService {
    let resolver = DependencyResolver::new(installer, config.resolver.timeout)
        .with_preinstalled(&config.resolver.preinstalled);
    SandboxService::new(
        SecurityPolicy::new(config.security.rules.clone()).expect("valid rules"),
        resolver,
        runtime,
        config.sandbox.limits.clone(),
    )
}

pub fn dispatcher_with(
    config: &EngineConfig,
    installer: Arc<dyn PackageInstaller>,
    runtime: CountingRuntime,
) -> ToolDispatcher {
    ToolDispatcher::new(
        Arc::new(service_with(config, installer, runtime)),
        Arc::new(EnvironmentInspector::from_config(config)),
    )
}

/// A process that is gone or only waiting to be reaped
pub fn process_gone(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Err(_) => true,
        Ok(stat) => stat
            .rsplit_once(") ")
            .map(|(_, rest)| rest.starts_with('Z') || rest.starts_with('X'))
            .unwrap_or(false),
    }
}

/// Poll until `pid` is gone or `within` elapses
pub async fn wait_gone(pid: u32, within: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if process_gone(pid) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    process_gone(pid)
}
