//! One capture job: launch the tool, supervise it, report its outcome.
//!
//! A runner emits `starting` as soon as it begins, then waits for a slot in
//! [`JobSlots`] before spawning the subprocess. It always ends with exactly one
//! `complete` or `error` event.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use wait_timeout::ChildExt;

use crate::command::{CaptureCommand, CaptureHeaders};
use crate::protocol::StatusEvent;
use crate::sink::EventSink;

/// Characters of stderr reported when the capture tool fails.
pub const STDERR_TAIL_CHARS: usize = 200;

pub const UNKNOWN_FAILURE: &str = "Unknown FFmpeg error";

const MAX_STDERR_BYTES: usize = 64 * 1024;
const WAIT_SLICE: Duration = Duration::from_millis(100);

/// A validated download, ready to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub url: String,
    pub output: PathBuf,
    pub headers: CaptureHeaders,
}

/// Shared cancellation flag for one job.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Bounded pool of subprocess slots.
///
/// Holds one token per slot in a bounded channel; taking a token acquires a
/// slot and the guard puts it back on drop.
#[derive(Debug, Clone)]
pub struct JobSlots {
    release: Sender<()>,
    acquire: Receiver<()>,
    capacity: usize,
}

impl JobSlots {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (release, acquire) = crossbeam_channel::bounded(capacity);
        for _ in 0..capacity {
            let _ = release.send(());
        }
        Self {
            release,
            acquire,
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots not currently held.
    pub fn available(&self) -> usize {
        self.acquire.len()
    }

    /// Block until a slot frees up. Returns `None` if `cancel` fires first.
    pub fn acquire(&self, cancel: &CancelToken) -> Option<SlotGuard> {
        loop {
            if cancel.is_cancelled() {
                return None;
            }
            match self.acquire.recv_timeout(WAIT_SLICE) {
                Ok(()) => {
                    return Some(SlotGuard {
                        release: self.release.clone(),
                    })
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }
}

pub struct SlotGuard {
    release: Sender<()>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let _ = self.release.send(());
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("failed waiting for capture process: {0}")]
    Wait(#[source] io::Error),

    #[error("capture tool exited with {status}")]
    Exit { status: ExitStatus, stderr_tail: String },

    #[error("capture timed out after {0:?}")]
    TimedOut(Duration),

    #[error("capture cancelled")]
    Cancelled,
}

impl JobError {
    /// Text for the `error` field of the job's terminal event.
    pub fn event_message(&self) -> String {
        match self {
            JobError::Exit { stderr_tail, .. } if !stderr_tail.is_empty() => stderr_tail.clone(),
            JobError::Exit { .. } => UNKNOWN_FAILURE.to_string(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug)]
pub enum JobOutcome {
    Completed,
    Failed(JobError),
}

impl JobOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, JobOutcome::Completed)
    }
}

/// Everything a runner needs besides the job itself.
pub struct JobRunner<W> {
    pub sink: EventSink<W>,
    pub program: PathBuf,
    pub slots: JobSlots,
    pub timeout: Option<Duration>,
    pub cancel: CancelToken,
}

impl<W: Write> JobRunner<W> {
    pub fn run(self, job: Job) -> JobOutcome {
        let file = job.output.display().to_string();
        let span = tracing::info_span!("job", file = %file);
        let _entered = span.enter();

        self.sink
            .emit_or_warn(&StatusEvent::Starting { file: file.clone() });

        let outcome = match self.slots.acquire(&self.cancel) {
            Some(_slot) => {
                let command = CaptureCommand::build(&self.program, &job);
                tracing::debug!(command = %command.display(), "launching capture tool");
                match supervise(&command, self.timeout, &self.cancel) {
                    Ok(()) => JobOutcome::Completed,
                    Err(err) => JobOutcome::Failed(err),
                }
            }
            None => JobOutcome::Failed(JobError::Cancelled),
        };

        match &outcome {
            JobOutcome::Completed => {
                tracing::info!("capture complete");
                self.sink.emit_or_warn(&StatusEvent::Complete { file });
            }
            JobOutcome::Failed(err) => {
                tracing::warn!(error = %err, "capture failed");
                remove_empty_placeholder(&job.output);
                self.sink.emit_or_warn(&StatusEvent::Error {
                    error: err.event_message(),
                });
            }
        }
        outcome
    }
}

fn supervise(
    command: &CaptureCommand,
    timeout: Option<Duration>,
    cancel: &CancelToken,
) -> Result<(), JobError> {
    let mut child = command
        .to_command()
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| JobError::Launch {
            program: command.program.display().to_string(),
            source,
        })?;

    // Drain both pipes while waiting so a chatty child never blocks on a full pipe.
    let stdout_thread = child
        .stdout
        .take()
        .map(|pipe| spawn_reader(pipe, 0));
    let stderr_thread = child
        .stderr
        .take()
        .map(|pipe| spawn_reader(pipe, MAX_STDERR_BYTES));

    let waited = wait_for_exit(&mut child, timeout, cancel);

    if let Some(handle) = stdout_thread {
        let _ = handle.join();
    }
    let stderr = stderr_thread
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default();

    let status = waited?;
    if status.success() {
        return Ok(());
    }
    Err(JobError::Exit {
        status,
        stderr_tail: stderr_tail(&stderr, STDERR_TAIL_CHARS),
    })
}

fn wait_for_exit(
    child: &mut Child,
    timeout: Option<Duration>,
    cancel: &CancelToken,
) -> Result<ExitStatus, JobError> {
    let deadline = timeout.map(|t| Instant::now() + t);
    loop {
        match child.wait_timeout(WAIT_SLICE) {
            Ok(Some(status)) => return Ok(status),
            Ok(None) => {}
            Err(err) => {
                kill_and_reap(child);
                return Err(JobError::Wait(err));
            }
        }

        if cancel.is_cancelled() {
            kill_and_reap(child);
            return Err(JobError::Cancelled);
        }
        if let (Some(deadline), Some(limit)) = (deadline, timeout) {
            if Instant::now() >= deadline {
                kill_and_reap(child);
                return Err(JobError::TimedOut(limit));
            }
        }
    }
}

fn kill_and_reap(child: &mut Child) {
    if let Err(err) = child.kill() {
        tracing::debug!(error = %err, "kill failed");
    }
    let _ = child.wait();
}

/// Read a pipe to EOF, keeping at most the last `keep` bytes.
fn spawn_reader<R: Read + Send + 'static>(mut pipe: R, keep: usize) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut kept = Vec::new();
        let mut chunk = [0u8; 8 * 1024];
        loop {
            let n = match pipe.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            };
            if keep == 0 {
                continue;
            }
            kept.extend_from_slice(&chunk[..n]);
            if kept.len() > keep {
                let excess = kept.len() - keep;
                kept.drain(..excess);
            }
        }
        kept
    })
}

/// Last `max_chars` characters of captured stderr, with `\r\n` and `\r`
/// normalized to `\n`.
fn stderr_tail(raw: &[u8], max_chars: usize) -> String {
    let text = String::from_utf8_lossy(raw)
        .replace("\r\n", "\n")
        .replace('\r', "\n");
    let total = text.chars().count();
    text.chars().skip(total.saturating_sub(max_chars)).collect()
}

/// Remove a reserved output file that the capture never wrote to.
pub(crate) fn remove_empty_placeholder(path: &Path) {
    match fs::metadata(path) {
        Ok(meta) if meta.is_file() && meta.len() == 0 => {
            if let Err(err) = fs::remove_file(path) {
                tracing::debug!(path = %path.display(), error = %err, "could not remove placeholder");
            }
        }
        _ => {}
    }
}
