//! Tracing probe supervision
//!
//! Owns the external tracing-probe child process for the life of the
//! collector: spawns it with captured stdio, frames its stdout into
//! newline-delimited records, and surfaces stderr and process exit as
//! events on a single channel.

use std::path::Path;
use std::process::Stdio;

use bytes::BytesMut;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::{CollectorError, Result};

const EVENT_CHANNEL_CAPACITY: usize = 1024;
const READ_CHUNK_SIZE: usize = 4096;

/// Probe lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeState {
    NotStarted,
    Running,
    /// Child terminated; `None` means it was killed by a signal.
    Exited(Option<i32>),
    /// The child could not be spawned at all.
    Failed,
}

/// One event from the supervised probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeEvent {
    /// A complete newline-terminated stdout record.
    Record(String),
    /// A line of stderr output. Diagnostic, never parsed as an event.
    Diagnostic(String),
    Exited(Option<i32>),
}

/// A running probe: event stream plus a kill switch.
///
/// Dropping the supervisor kills the child and stops the stream readers.
#[derive(Debug)]
pub struct ProbeSupervisor {
    state: ProbeState,
    events: mpsc::Receiver<ProbeEvent>,
    _kill: oneshot::Sender<()>,
}

impl ProbeSupervisor {
    /// Launch the probe executable with piped stdout/stderr.
    ///
    /// A spawn failure is terminal: no telemetry is possible without the
    /// probe, so the caller is expected to treat the error as fatal.
    pub fn spawn(path: &Path) -> Result<Self> {
        let mut child = Command::new(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CollectorError::ProbeSpawn {
                path: path.display().to_string(),
                source,
            })?;

        let stdout = child.stdout.take().ok_or_else(|| CollectorError::ProbeSpawn {
            path: path.display().to_string(),
            source: std::io::Error::other("stdout not captured"),
        })?;
        let stderr = child.stderr.take().ok_or_else(|| CollectorError::ProbeSpawn {
            path: path.display().to_string(),
            source: std::io::Error::other("stderr not captured"),
        })?;

        let (tx, events) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (kill_tx, kill_rx) = oneshot::channel();

        tokio::spawn(read_records(stdout, tx.clone()));
        tokio::spawn(read_diagnostics(stderr, tx.clone()));
        tokio::spawn(monitor_exit(child, tx, kill_rx));

        Ok(Self {
            state: ProbeState::Running,
            events,
            _kill: kill_tx,
        })
    }

    /// Receive the next probe event. Returns `None` once the child has
    /// exited and all buffered events have been drained.
    pub async fn next_event(&mut self) -> Option<ProbeEvent> {
        let event = self.events.recv().await;
        if let Some(ProbeEvent::Exited(code)) = event {
            self.state = ProbeState::Exited(code);
        }
        event
    }

    pub fn state(&self) -> ProbeState {
        self.state
    }
}

/// Read stdout chunks and emit complete framed records.
async fn read_records(stdout: tokio::process::ChildStdout, tx: mpsc::Sender<ProbeEvent>) {
    let mut stdout = stdout;
    let mut framer = LineFramer::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];
    loop {
        match stdout.read(&mut chunk).await {
            // EOF. A trailing partial line cannot be completed; discard it.
            Ok(0) => break,
            Ok(n) => {
                for line in framer.push(&chunk[..n]) {
                    if line.is_empty() {
                        continue;
                    }
                    if tx.send(ProbeEvent::Record(line)).await.is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                debug!("probe stdout read error: {}", e);
                break;
            }
        }
    }
}

/// Read stderr line by line and forward each as a diagnostic.
async fn read_diagnostics(stderr: tokio::process::ChildStderr, tx: mpsc::Sender<ProbeEvent>) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.is_empty() {
            continue;
        }
        if tx.send(ProbeEvent::Diagnostic(line)).await.is_err() {
            return;
        }
    }
}

/// Wait for the child to exit, or kill it when the supervisor is dropped.
async fn monitor_exit(
    mut child: Child,
    tx: mpsc::Sender<ProbeEvent>,
    mut kill_rx: oneshot::Receiver<()>,
) {
    tokio::select! {
        status = child.wait() => {
            let code = status.ok().and_then(|s| s.code());
            let _ = tx.send(ProbeEvent::Exited(code)).await;
        }
        _ = &mut kill_rx => {
            let _ = child.kill().await;
        }
    }
}

/// Accumulates raw stream chunks and yields only complete lines.
///
/// Pipe reads are not aligned to record boundaries: a single read may carry
/// half a record or several. Partial data is buffered across pushes and a
/// record is emitted only once its terminating newline arrives.
#[derive(Debug, Default)]
pub struct LineFramer {
    buf: BytesMut,
}

impl LineFramer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
        }
    }

    /// Append a chunk and return every line completed by it, without the
    /// trailing newline. Unterminated bytes stay buffered.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line = self.buf.split_to(pos + 1);
            lines.push(String::from_utf8_lossy(&line[..pos]).into_owned());
        }
        lines
    }

    /// Bytes currently buffered without a terminating newline.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}
