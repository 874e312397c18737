//! Read-only view of the live execution environment

use crate::config::EngineConfig;
use crate::package::normalize_name;
use crate::supervisor::{capture, join_readers, snapshot, SupervisedChild, WaitOutcome};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, warn};

const PROBE_OUTPUT_LIMIT: usize = 4 * 1024 * 1024;

/// Prints interpreter facts and every visible distribution as one JSON object
const PROBE: &str = r#"import json, platform, sys
from importlib import metadata
seen = {}
for dist in metadata.distributions():
    name = dist.metadata["Name"]
    if name and name not in seen:
        seen[name] = dist.version
json.dump({
    "version": sys.version.split()[0],
    "platform": platform.platform(),
    "packages": sorted(seen.items()),
}, sys.stdout)
"#;

/// Import names whose distribution is published under another name
const DISTRIBUTION_ALIASES: &[(&str, &str)] = &[("sklearn", "scikit-learn")];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInfo {
    pub name: String,
    pub version: Option<String>,
}

/// Point-in-time description of the environment, recomputed on every call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentSnapshot {
    /// Interpreter version, when the probe ran
    pub runtime_version: Option<String>,
    pub platform: String,
    /// Bytes of memory available to new processes
    pub available_memory: Option<u64>,
    pub packages: Vec<PackageInfo>,
    pub temp_dir_writable: bool,
    pub temp_dir: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe_error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeReport {
    version: String,
    platform: String,
    packages: Vec<(String, String)>,
}

pub struct EnvironmentInspector {
    interpreter: String,
    interpreter_args: Vec<String>,
    python_path: Vec<PathBuf>,
    work_root: PathBuf,
    baseline: Vec<String>,
    timeout: Duration,
}

impl EnvironmentInspector {
    pub fn new(interpreter: impl Into<String>, work_root: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
            interpreter_args: Vec::new(),
            python_path: Vec::new(),
            work_root: work_root.into(),
            baseline: Vec::new(),
            timeout: Duration::from_secs(10),
        }
    }

    /// Probe the same interpreter and import path that snippets get
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            interpreter: config.sandbox.interpreter.clone(),
            interpreter_args: config.sandbox.interpreter_args.clone(),
            python_path: vec![config.resolver.site_dir()],
            work_root: config.sandbox.work_root(),
            baseline: config.resolver.preinstalled.clone(),
            timeout: config.inspector.timeout,
        }
    }

    pub fn with_python_path(mut self, paths: Vec<PathBuf>) -> Self {
        self.python_path = paths;
        self
    }

    pub fn with_baseline(mut self, names: Vec<String>) -> Self {
        self.baseline = names;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn snapshot(&self) -> EnvironmentSnapshot {
        let (probe, probe_error) = match self.probe().await {
            Ok(report) => (Some(report), None),
            Err(e) => {
                warn!(interpreter = %self.interpreter, "Environment probe failed: {}", e);
                (None, Some(e))
            }
        };

        let mut packages: Vec<PackageInfo> = probe
            .as_ref()
            .map(|p| {
                p.packages
                    .iter()
                    .map(|(name, version)| PackageInfo {
                        name: name.clone(),
                        version: Some(version.clone()),
                    })
                    .collect()
            })
            .unwrap_or_default();
        packages.sort_by_key(|p| normalize_name(&p.name));

        EnvironmentSnapshot {
            runtime_version: probe.as_ref().map(|p| p.version.clone()),
            platform: probe
                .as_ref()
                .map(|p| p.platform.clone())
                .unwrap_or_else(|| {
                    format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH)
                }),
            available_memory: available_memory(),
            packages,
            temp_dir_writable: is_writable(&self.work_root),
            temp_dir: self.work_root.clone(),
            probe_error,
        }
    }

    /// The configured baseline with live versions where the probe found them
    pub async fn preinstalled_packages(&self) -> Vec<PackageInfo> {
        let live: BTreeMap<String, String> = match self.probe().await {
            Ok(report) => report
                .packages
                .into_iter()
                .map(|(name, version)| (normalize_name(&name), version))
                .collect(),
            Err(e) => {
                warn!("Environment probe failed, versions unknown: {}", e);
                BTreeMap::new()
            }
        };

        let mut packages: Vec<PackageInfo> = self
            .baseline
            .iter()
            .map(|name| {
                let key = normalize_name(name);
                let dist = DISTRIBUTION_ALIASES
                    .iter()
                    .find(|(alias, _)| *alias == key)
                    .map(|(_, dist)| dist.to_string())
                    .unwrap_or(key);
                PackageInfo {
                    name: name.clone(),
                    version: live.get(&dist).cloned(),
                }
            })
            .collect();
        packages.sort_by(|a, b| a.name.cmp(&b.name));
        packages.dedup_by(|a, b| a.name == b.name);
        packages
    }

    async fn probe(&self) -> Result<ProbeReport, String> {
        let mut cmd = Command::new(&self.interpreter);
        cmd.args(&self.interpreter_args).arg("-c").arg(PROBE);
        cmd.env_clear();
        if let Ok(path) = std::env::var("PATH") {
            cmd.env("PATH", path);
        }
        if !self.python_path.is_empty() {
            if let Ok(joined) = std::env::join_paths(&self.python_path) {
                cmd.env("PYTHONPATH", joined);
            }
        }

        let mut child = SupervisedChild::spawn(&mut cmd)
            .map_err(|e| format!("failed to spawn {}: {}", self.interpreter, e))?;
        let mut readers = Vec::with_capacity(2);
        let stdout = child.take_stdout().map(|s| {
            let (buf, task) = capture(s, PROBE_OUTPUT_LIMIT);
            readers.push(task);
            buf
        });
        let stderr = child.take_stderr().map(|s| {
            let (buf, task) = capture(s, 64 * 1024);
            readers.push(task);
            buf
        });

        let waited = child
            .wait_until(Instant::now() + self.timeout)
            .await
            .map_err(|e| format!("probe wait failed: {}", e))?;
        join_readers(readers, Duration::from_secs(1)).await;
        let stdout = stdout.map(|b| snapshot(&b)).unwrap_or_default();
        let stderr = stderr.map(|b| snapshot(&b)).unwrap_or_default();

        match waited {
            WaitOutcome::TimedOut => Err(format!("probe exceeded {:?}", self.timeout)),
            WaitOutcome::Exited(status) if !status.success() => Err(format!(
                "probe exited with {}: {}",
                status,
                stderr.lines().last().unwrap_or_default().trim()
            )),
            WaitOutcome::Exited(_) => {
                let report: ProbeReport = serde_json::from_str(stdout.trim())
                    .map_err(|e| format!("unreadable probe output: {}", e))?;
                debug!(packages = report.packages.len(), "Environment probe finished");
                Ok(report)
            }
        }
    }
}

/// `MemAvailable` from /proc/meminfo, in bytes
fn available_memory() -> Option<u64> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    parse_mem_available(&meminfo)
}

fn parse_mem_available(meminfo: &str) -> Option<u64> {
    let line = meminfo.lines().find(|l| l.starts_with("MemAvailable:"))?;
    let kib: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kib * 1024)
}

fn is_writable(dir: &Path) -> bool {
    tempfile::NamedTempFile::new_in(dir)
        .and_then(|file| file.close())
        .is_ok()
}
