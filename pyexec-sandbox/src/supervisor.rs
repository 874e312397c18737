//! Supervised child processes.
//!
//! Every child is started as the leader of its own process group and is
//! paired with a deadline. Whatever way the owner leaves, the whole group
//! is killed and the leader reaped.

use crate::execution::OutputBuffer;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

const READ_CHUNK: usize = 8 * 1024;

/// How a supervised wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitOutcome {
    Exited(ExitStatus),
    TimedOut,
}

pub(crate) struct SupervisedChild {
    child: Child,
    pgid: Option<i32>,
    reaped: bool,
}

impl SupervisedChild {
    /// Spawn `cmd` with piped stdout/stderr and no stdin
    pub(crate) fn spawn(cmd: &mut Command) -> std::io::Result<Self> {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn()?;
        let pgid = child.id().map(|pid| pid as i32);
        Ok(Self {
            child,
            pgid,
            reaped: false,
        })
    }

    pub(crate) fn id(&self) -> Option<i32> {
        self.pgid
    }

    pub(crate) fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    pub(crate) fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    /// Wait for the child until `deadline`; on timeout the group is killed.
    ///
    /// On normal exit the group is still swept so no descendant outlives
    /// the call.
    pub(crate) async fn wait_until(&mut self, deadline: Instant) -> std::io::Result<WaitOutcome> {
        match tokio::time::timeout_at(deadline, self.child.wait()).await {
            Ok(Ok(status)) => {
                self.reaped = true;
                self.kill_group();
                Ok(WaitOutcome::Exited(status))
            }
            Ok(Err(e)) => {
                self.terminate().await;
                Err(e)
            }
            Err(_) => {
                debug!(pid = ?self.pgid, "Deadline elapsed, terminating process group");
                self.terminate().await;
                Ok(WaitOutcome::TimedOut)
            }
        }
    }

    /// Kill the whole group and reap the leader
    pub(crate) async fn terminate(&mut self) {
        self.kill_group();
        if self.reaped {
            return;
        }
        if let Err(e) = self.child.kill().await {
            warn!(pid = ?self.pgid, "Failed to kill child: {}", e);
        }
        self.reaped = true;
    }

    fn kill_group(&self) {
        #[cfg(unix)]
        if let Some(pgid) = self.pgid {
            // SAFETY: killpg only signals; a stale group id yields ESRCH.
            unsafe {
                libc::killpg(pgid, libc::SIGKILL);
            }
        }
    }
}

impl Drop for SupervisedChild {
    fn drop(&mut self) {
        if !self.reaped {
            self.kill_group();
            let _ = self.child.start_kill();
        }
    }
}

/// Shared capture buffer that stays readable after the reader is aborted
pub(crate) type SharedBuffer = Arc<Mutex<OutputBuffer>>;

/// Drain `reader` into a bounded buffer on a background task
pub(crate) fn capture<R>(reader: R, limit: usize) -> (SharedBuffer, JoinHandle<()>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    capture_into(reader, OutputBuffer::new(limit))
}

/// Like [`capture`], but keeps the last `limit` bytes
pub(crate) fn capture_tail<R>(reader: R, limit: usize) -> (SharedBuffer, JoinHandle<()>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    capture_into(reader, OutputBuffer::tail(limit))
}

fn capture_into<R>(reader: R, buffer: OutputBuffer) -> (SharedBuffer, JoinHandle<()>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let buffer = Arc::new(Mutex::new(buffer));
    let sink = Arc::clone(&buffer);
    let handle = tokio::spawn(async move {
        let mut reader = reader;
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if let Ok(mut buf) = sink.lock() {
                        buf.push(&chunk[..n]);
                    }
                }
            }
        }
    });
    (buffer, handle)
}

/// Wait up to `grace` for reader tasks, aborting stragglers
pub(crate) async fn join_readers(handles: Vec<JoinHandle<()>>, grace: Duration) {
    let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();
    if tokio::time::timeout(grace, futures::future::join_all(handles))
        .await
        .is_err()
    {
        warn!("Output readers still open after {:?}, aborting", grace);
        for abort in aborts {
            abort.abort();
        }
    }
}

pub(crate) fn snapshot(buffer: &SharedBuffer) -> String {
    buffer
        .lock()
        .map(|buf| buf.to_text())
        .unwrap_or_default()
}
