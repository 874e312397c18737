//! Execution identifiers and output collection

use crate::types::{ExecutionStream, RunOutcome};
use serde::{Deserialize, Serialize};

const TRUNCATION_MARKER: &str = "\n[output truncated]";

/// Unique execution identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionId(pub uuid::Uuid);

impl ExecutionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// First 8 hex digits, enough to tell concurrent jobs apart in paths
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Byte buffer bounded at `limit` that remembers when it dropped bytes.
///
/// By default the head is kept; [`OutputBuffer::tail`] keeps the most
/// recent bytes instead, for diagnostics where the end matters.
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    bytes: Vec<u8>,
    limit: usize,
    truncated: bool,
    keep_tail: bool,
}

impl OutputBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            bytes: Vec::new(),
            limit,
            truncated: false,
            keep_tail: false,
        }
    }

    pub fn tail(limit: usize) -> Self {
        Self {
            keep_tail: true,
            ..Self::new(limit)
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        if self.keep_tail {
            self.bytes.extend_from_slice(chunk);
            if self.bytes.len() > self.limit {
                let excess = self.bytes.len() - self.limit;
                self.bytes.drain(..excess);
                self.truncated = true;
            }
            return;
        }
        let room = self.limit.saturating_sub(self.bytes.len());
        if chunk.len() > room {
            self.bytes.extend_from_slice(&chunk[..room]);
            self.truncated = true;
        } else {
            self.bytes.extend_from_slice(chunk);
        }
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Lossy UTF-8 text, with a marker where bytes were dropped
    pub fn to_text(&self) -> String {
        let text = String::from_utf8_lossy(&self.bytes).into_owned();
        match (self.truncated, self.keep_tail) {
            (false, _) => text,
            (true, false) => text + TRUNCATION_MARKER,
            (true, true) => format!("{}\n{}", TRUNCATION_MARKER.trim_start(), text),
        }
    }
}

/// Everything a finished job produced
#[derive(Debug, Clone)]
pub struct CollectedRun {
    pub stdout: String,
    pub stderr: String,
    pub outcome: RunOutcome,
}

/// Drain both output streams concurrently, then wait for the outcome.
///
/// A runtime that drops its result sender without reporting yields an
/// internal-error outcome rather than hanging.
pub async fn collect(stream: ExecutionStream, max_bytes: usize) -> CollectedRun {
    let ExecutionStream {
        mut stdout,
        mut stderr,
        result,
    } = stream;

    let drain_stdout = async {
        let mut buf = OutputBuffer::new(max_bytes);
        while let Some(chunk) = stdout.recv().await {
            buf.push(&chunk);
        }
        buf
    };
    let drain_stderr = async {
        let mut buf = OutputBuffer::new(max_bytes);
        while let Some(chunk) = stderr.recv().await {
            buf.push(&chunk);
        }
        buf
    };
    let (out, err) = tokio::join!(drain_stdout, drain_stderr);

    let outcome = match result.await {
        Ok(outcome) => outcome,
        Err(_) => RunOutcome::internal(0, "runtime dropped the job without reporting an outcome"),
    };

    CollectedRun {
        stdout: out.to_text(),
        stderr: err.to_text(),
        outcome,
    }
}
