//! Dependency resolution against a warm-instance package cache

use crate::error::ResolutionError;
use crate::package::{normalize_name, PackageSpec};
use crate::supervisor::{
    capture, capture_tail, join_readers, snapshot, SupervisedChild, WaitOutcome,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

const STDERR_TAIL_LINES: usize = 20;
const UNKNOWN_VERSION: &str = "unknown";

/// One package known to be installed in this instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageCacheEntry {
    /// Normalized distribution name
    pub name: String,
    pub version: String,
    /// Specifier text that produced the install
    pub requirement: String,
    pub installed_at: DateTime<Utc>,
}

/// Append-only record of successful installs.
///
/// Starts empty on every cold start; entries are only added after the
/// installer reported success and are never mutated or removed.
#[derive(Debug, Default)]
pub struct PackageCache {
    entries: RwLock<Vec<PackageCacheEntry>>,
}

impl PackageCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exact-match rule: unconstrained specs accept any cached version,
    /// `==X` needs version X, anything else needs the identical specifier.
    pub async fn satisfies(&self, spec: &PackageSpec) -> bool {
        let entries = self.entries.read().await;
        entries
            .iter()
            .filter(|e| e.name == spec.name())
            .any(|e| match (spec.constraint(), spec.pinned_version()) {
                (None, _) => true,
                (Some(_), Some(pinned)) => e.version == pinned,
                (Some(_), None) => e.requirement == spec.to_requirement(),
            })
    }

    pub async fn record(&self, entry: PackageCacheEntry) {
        self.entries.write().await.push(entry);
    }

    pub async fn entries(&self) -> Vec<PackageCacheEntry> {
        self.entries.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

/// What the installer reports for one requested specifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledPackage {
    pub spec: PackageSpec,
    pub version: String,
}

/// Installs a batch of packages in one invocation
#[async_trait]
pub trait PackageInstaller: Send + Sync {
    async fn install(
        &self,
        packages: &[PackageSpec],
        deadline: Instant,
    ) -> Result<Vec<InstalledPackage>, ResolutionError>;

    /// Directories that must be on the import path to see installed packages
    fn import_paths(&self) -> Vec<PathBuf>;

    fn name(&self) -> &str;
}

/// `python -m pip install --target <site_dir>` under a process-group deadline
pub struct PipInstaller {
    interpreter: String,
    site_dir: PathBuf,
    no_deps: bool,
    index_url: Option<String>,
    kill_grace: Duration,
}

impl PipInstaller {
    pub fn new(interpreter: impl Into<String>, site_dir: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
            site_dir: site_dir.into(),
            no_deps: true,
            index_url: None,
            kill_grace: Duration::from_secs(2),
        }
    }

    pub fn with_no_deps(mut self, no_deps: bool) -> Self {
        self.no_deps = no_deps;
        self
    }

    pub fn with_index_url(mut self, index_url: Option<String>) -> Self {
        self.index_url = index_url;
        self
    }

    pub fn site_dir(&self) -> &Path {
        &self.site_dir
    }

    fn command(&self, packages: &[PackageSpec]) -> Command {
        let mut cmd = Command::new(&self.interpreter);
        cmd.args(["-m", "pip", "install"])
            .arg("--target")
            .arg(&self.site_dir)
            .args([
                "--disable-pip-version-check",
                "--no-input",
                "--no-color",
                "--upgrade",
            ]);
        if self.no_deps {
            cmd.arg("--no-deps");
        }
        if let Some(url) = &self.index_url {
            cmd.arg("--index-url").arg(url);
        }
        cmd.arg("--");
        cmd.args(packages.iter().map(|p| p.to_requirement()));
        cmd
    }
}

#[async_trait]
impl PackageInstaller for PipInstaller {
    async fn install(
        &self,
        packages: &[PackageSpec],
        deadline: Instant,
    ) -> Result<Vec<InstalledPackage>, ResolutionError> {
        tokio::fs::create_dir_all(&self.site_dir)
            .await
            .map_err(|e| {
                ResolutionError::Spawn(format!(
                    "cannot create {}: {}",
                    self.site_dir.display(),
                    e
                ))
            })?;

        let budget_secs = deadline
            .saturating_duration_since(Instant::now())
            .as_secs();
        let mut cmd = self.command(packages);
        let mut child =
            SupervisedChild::spawn(&mut cmd).map_err(|e| ResolutionError::Spawn(e.to_string()))?;
        info!(pid = ?child.id(), count = packages.len(), "Installer started");

        let mut readers = Vec::new();
        let stdout = child.take_stdout().map(|s| {
            let (buf, task) = capture(s, 256 * 1024);
            readers.push(task);
            buf
        });
        let stderr = child.take_stderr().map(|s| {
            let (buf, task) = capture_tail(s, 64 * 1024);
            readers.push(task);
            buf
        });

        let waited = child.wait_until(deadline).await;
        join_readers(readers, self.kill_grace).await;
        let stdout = stdout.map(|b| snapshot(&b)).unwrap_or_default();
        let stderr = stderr.map(|b| snapshot(&b)).unwrap_or_default();

        match waited {
            Ok(WaitOutcome::TimedOut) => Err(ResolutionError::Timeout(budget_secs)),
            Ok(WaitOutcome::Exited(status)) if status.success() => {
                let reported = parse_installed(&stdout);
                Ok(packages
                    .iter()
                    .map(|spec| InstalledPackage {
                        version: version_for(spec, &reported),
                        spec: spec.clone(),
                    })
                    .collect())
            }
            Ok(WaitOutcome::Exited(_)) => Err(ResolutionError::InstallFailed {
                stderr_tail: tail(&stderr, STDERR_TAIL_LINES),
            }),
            Err(e) => Err(ResolutionError::Spawn(e.to_string())),
        }
    }

    fn import_paths(&self) -> Vec<PathBuf> {
        vec![self.site_dir.clone()]
    }

    fn name(&self) -> &str {
        "pip"
    }
}

/// `(name, version)` pairs from pip's "Successfully installed a-1.0 b-2.0"
fn parse_installed(stdout: &str) -> Vec<(String, String)> {
    stdout
        .lines()
        .filter_map(|line| line.trim().strip_prefix("Successfully installed "))
        .flat_map(|rest| rest.split_whitespace())
        .filter_map(|token| {
            let (name, version) = token.rsplit_once('-')?;
            Some((normalize_name(name), version.to_string()))
        })
        .collect()
}

fn version_for(spec: &PackageSpec, reported: &[(String, String)]) -> String {
    reported
        .iter()
        .find(|(name, _)| name == spec.name())
        .map(|(_, version)| version.clone())
        .or_else(|| spec.pinned_version().map(str::to_string))
        .unwrap_or_else(|| UNKNOWN_VERSION.to_string())
}

fn tail(text: &str, lines: usize) -> String {
    let collected: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = collected.len().saturating_sub(lines);
    collected[start..].join("\n")
}

/// What one resolution did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveReport {
    /// Specifiers served by the baseline or the cache
    pub satisfied: Vec<PackageSpec>,
    /// Specifiers handed to the installer
    pub installed: Vec<PackageSpec>,
}

/// Owns the package cache for the lifetime of one warm instance
pub struct DependencyResolver {
    cache: PackageCache,
    installer: Arc<dyn PackageInstaller>,
    preinstalled: HashSet<String>,
    timeout: Duration,
    /// Serializes batch installs so two calls never race on the target dir
    install_lock: Mutex<()>,
}

impl DependencyResolver {
    pub fn new(installer: Arc<dyn PackageInstaller>, timeout: Duration) -> Self {
        Self {
            cache: PackageCache::new(),
            installer,
            preinstalled: HashSet::new(),
            timeout,
            install_lock: Mutex::new(()),
        }
    }

    /// Names that count as available without installing
    pub fn with_preinstalled<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.preinstalled = names
            .into_iter()
            .map(|n| normalize_name(n.as_ref()))
            .collect();
        self
    }

    /// Installation budget; callers derive the resolution deadline from it
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn cache(&self) -> &PackageCache {
        &self.cache
    }

    pub fn import_paths(&self) -> Vec<PathBuf> {
        self.installer.import_paths()
    }

    pub fn is_preinstalled(&self, name: &str) -> bool {
        self.preinstalled.contains(&normalize_name(name))
    }

    /// Make every package in `packages` importable before `deadline`.
    ///
    /// Already-satisfied specifiers never reach the installer; the rest go
    /// in a single batch. Only a successful batch is recorded.
    pub async fn resolve(
        &self,
        packages: &[PackageSpec],
        deadline: Instant,
    ) -> Result<ResolveReport, ResolutionError> {
        let (satisfied, pending) = self.partition(packages).await;
        if pending.is_empty() {
            debug!(count = satisfied.len(), "All requirements already satisfied");
            return Ok(ResolveReport {
                satisfied,
                installed: Vec::new(),
            });
        }

        let budget_secs = self.timeout.as_secs();
        let _guard = tokio::time::timeout_at(deadline, self.install_lock.lock())
            .await
            .map_err(|_| ResolutionError::Timeout(budget_secs))?;

        // Another call may have installed some of these while we waited.
        let (satisfied, pending) = self.partition(packages).await;
        if pending.is_empty() {
            return Ok(ResolveReport {
                satisfied,
                installed: Vec::new(),
            });
        }

        let requested: Vec<String> = pending.iter().map(|p| p.to_requirement()).collect();
        info!(
            installer = self.installer.name(),
            packages = ?requested,
            "Installing missing packages"
        );

        let installed = match self.installer.install(&pending, deadline).await {
            Ok(installed) => installed,
            Err(e) => {
                warn!(packages = ?requested, "Package installation failed: {}", e);
                return Err(e);
            }
        };

        let now = Utc::now();
        for package in &installed {
            self.cache
                .record(PackageCacheEntry {
                    name: package.spec.name().to_string(),
                    version: package.version.clone(),
                    requirement: package.spec.to_requirement(),
                    installed_at: now,
                })
                .await;
        }
        info!(packages = ?requested, "Packages installed");

        Ok(ResolveReport {
            satisfied,
            installed: pending,
        })
    }

    async fn partition(&self, packages: &[PackageSpec]) -> (Vec<PackageSpec>, Vec<PackageSpec>) {
        let mut satisfied = Vec::new();
        let mut pending: Vec<PackageSpec> = Vec::new();
        for spec in packages {
            let baseline = spec.constraint().is_none() && self.is_preinstalled(spec.name());
            if baseline || self.cache.satisfies(spec).await {
                satisfied.push(spec.clone());
            } else if !pending.contains(spec) {
                pending.push(spec.clone());
            }
        }
        (satisfied, pending)
    }
}
