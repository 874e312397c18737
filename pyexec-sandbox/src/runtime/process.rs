//! Process-based runtime

use crate::config::SandboxConfig;
use crate::error::SandboxError;
use crate::supervisor::{join_readers, SupervisedChild, WaitOutcome};
use crate::types::{ExecutionStream, RunOutcome, SandboxJob};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const SNIPPET_FILE: &str = "main.py";
const RESULT_FILE: &str = ".result";
const READ_CHUNK: usize = 8 * 1024;

/// Runs the snippet, then records `repr(result)` if the snippet bound one.
///
/// argv: <snippet path> <result path>
const HARNESS: &str = r#"import sys, traceback
_snippet, _result_path = sys.argv[1], sys.argv[2]
sys.argv = [_snippet]
with open(_snippet, encoding="utf-8") as _f:
    _source = _f.read()
_ns = {"__name__": "__main__", "__file__": _snippet, "__builtins__": __builtins__}
try:
    exec(compile(_source, "<snippet>", "exec"), _ns)
except SystemExit:
    raise
except BaseException:
    traceback.print_exc()
    sys.exit(1)
if "result" in _ns:
    try:
        _text = repr(_ns["result"])
    except Exception as _e:
        _text = "<unrepresentable result: %s>" % (_e,)
    with open(_result_path, "w", encoding="utf-8") as _f:
        _f.write(_text)
else:
    import os
    try:
        os.remove(_result_path)
    except OSError:
        pass
"#;

/// Process-based runtime - executes each job as an interpreter child
pub struct ProcessRuntime {
    config: Arc<SandboxConfig>,
}

impl ProcessRuntime {
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }
}

impl Default for ProcessRuntime {
    fn default() -> Self {
        Self::new(SandboxConfig::default())
    }
}

#[async_trait]
impl super::Runtime for ProcessRuntime {
    async fn execute(&self, job: SandboxJob) -> crate::Result<ExecutionStream> {
        let (stdout_tx, stdout_rx) = mpsc::channel(128);
        let (stderr_tx, stderr_rx) = mpsc::channel(128);
        let (result_tx, result_rx) = oneshot::channel();

        let config = Arc::clone(&self.config);
        tokio::spawn(async move {
            let outcome = run_job(&config, job, stdout_tx, stderr_tx).await;
            let _ = result_tx.send(outcome);
        });

        Ok(ExecutionStream {
            stdout: stdout_rx,
            stderr: stderr_rx,
            result: result_rx,
        })
    }

    fn name(&self) -> &str {
        "process"
    }
}

/// Materialize the call-scoped directory, run, and always remove it
async fn run_job(
    config: &SandboxConfig,
    job: SandboxJob,
    stdout_tx: mpsc::Sender<Vec<u8>>,
    stderr_tx: mpsc::Sender<Vec<u8>>,
) -> RunOutcome {
    let work_root = config.work_root();
    let workdir = match tempfile::Builder::new()
        .prefix(&format!("pyexec-{}-", job.id.short()))
        .tempdir_in(&work_root)
    {
        Ok(dir) => dir,
        Err(source) => {
            let err = SandboxError::WorkDir {
                root: work_root,
                source,
            };
            error!(execution_id = %job.id, "{}", err);
            return RunOutcome::internal(0, err.to_string());
        }
    };
    let path = workdir.path().to_path_buf();

    let started = std::time::Instant::now();
    let mut outcome = match run_in(config, &job, &path, stdout_tx, stderr_tx).await {
        Ok(outcome) => outcome,
        Err(err) => {
            error!(execution_id = %job.id, "{}", err);
            RunOutcome::internal(started.elapsed().as_millis() as u64, err.to_string())
        }
    };

    if let Err(source) = remove_workdir(workdir).await {
        let err = SandboxError::Cleanup {
            path: path.clone(),
            source,
        };
        error!(execution_id = %job.id, "{}", err);
        outcome.internal_error.get_or_insert_with(|| err.to_string());
    } else {
        debug!(execution_id = %job.id, workdir = %path.display(), "Working directory removed");
    }

    outcome.workdir = Some(path);
    outcome
}

/// Tree removal is blocking filesystem work; keep it off the async workers
async fn remove_workdir(workdir: tempfile::TempDir) -> std::io::Result<()> {
    tokio::task::spawn_blocking(move || workdir.close())
        .await
        .unwrap_or_else(|e| Err(std::io::Error::other(e)))
}

async fn run_in(
    config: &SandboxConfig,
    job: &SandboxJob,
    dir: &Path,
    stdout_tx: mpsc::Sender<Vec<u8>>,
    stderr_tx: mpsc::Sender<Vec<u8>>,
) -> Result<RunOutcome, SandboxError> {
    let snippet = dir.join(SNIPPET_FILE);
    let result_file = dir.join(RESULT_FILE);
    tokio::fs::write(&snippet, job.code.as_bytes()).await?;

    let mut cmd = Command::new(&config.interpreter);
    cmd.args(&config.interpreter_args);
    if config.capture_result {
        cmd.arg("-c").arg(HARNESS).arg(&snippet).arg(&result_file);
    } else {
        cmd.arg(&snippet);
    }
    cmd.current_dir(dir);
    apply_environment(&mut cmd, config, job, dir);

    let started = std::time::Instant::now();
    let mut child = SupervisedChild::spawn(&mut cmd).map_err(|source| SandboxError::Spawn {
        interpreter: config.interpreter.clone(),
        source,
    })?;
    info!(execution_id = %job.id, pid = ?child.id(), "Sandbox child started");

    let mut readers = Vec::with_capacity(2);
    if let Some(stdout) = child.take_stdout() {
        readers.push(forward(stdout, stdout_tx));
    }
    if let Some(stderr) = child.take_stderr() {
        readers.push(forward(stderr, stderr_tx));
    }

    let waited = child.wait_until(job.deadline).await;
    join_readers(readers, config.limits.kill_grace).await;
    let duration_ms = started.elapsed().as_millis() as u64;

    match waited? {
        WaitOutcome::Exited(status) => {
            let exit_code = status.code().unwrap_or(-1);
            info!(execution_id = %job.id, exit_code, duration_ms, "Sandbox child exited");

            let result_repr = if config.capture_result && status.success() {
                read_result(&result_file, config.limits.max_output_bytes).await
            } else {
                None
            };

            Ok(RunOutcome {
                exit_code: Some(exit_code),
                duration_ms,
                result_repr,
                ..Default::default()
            })
        }
        WaitOutcome::TimedOut => {
            warn!(execution_id = %job.id, duration_ms, "Sandbox child timed out");
            Ok(RunOutcome {
                duration_ms,
                timed_out: true,
                ..Default::default()
            })
        }
    }
}

/// Minimal allow-listed environment; nothing else leaks from the host
fn apply_environment(cmd: &mut Command, config: &SandboxConfig, job: &SandboxJob, dir: &Path) {
    cmd.env_clear();
    for key in &config.env_allowlist {
        if let Ok(value) = std::env::var(key) {
            cmd.env(key, value);
        }
    }
    cmd.env("HOME", dir)
        .env("TMPDIR", dir)
        .env("PYTHONDONTWRITEBYTECODE", "1")
        .env("PYTHONUNBUFFERED", "1")
        .env("PYTHONIOENCODING", "utf-8");

    if !job.python_path.is_empty() {
        match std::env::join_paths(&job.python_path) {
            Ok(joined) => {
                cmd.env("PYTHONPATH", joined);
            }
            Err(e) => warn!(execution_id = %job.id, "Ignoring unusable PYTHONPATH: {}", e),
        }
    }

    for (key, value) in &config.env {
        cmd.env(key, value);
    }
}

fn forward<R>(reader: R, tx: mpsc::Sender<Vec<u8>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = reader;
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send(chunk[..n].to_vec()).await.is_err() {
                        break;
                    }
                }
            }
        }
    })
}

async fn read_result(path: &Path, limit: usize) -> Option<String> {
    let text = tokio::fs::read_to_string(path).await.ok()?;
    if text.len() <= limit {
        return Some(text);
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    Some(format!("{}...", &text[..end]))
}
