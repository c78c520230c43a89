//! Run commands inside running containers and capture their output.
//!
//! The runtime hands back one stream carrying both stdout and stderr, each
//! frame tagged with its channel. A spawned task splits it into two buffers
//! while the caller races that task against the deadline. The buffers belong
//! to the task until it finishes and are handed over through its join
//! handle, so an abandoned copy can never touch a returned result. The task
//! is aborted whenever `execute` stops waiting for it, whether the deadline
//! passed or the caller dropped the future.

use futures::StreamExt;
use runtime::{ContainerRuntime, ExecStream, RuntimeError, StreamChannel};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("Failed to create exec in container {container}: {source}")]
    Create {
        container: String,
        #[source]
        source: RuntimeError,
    },

    #[error("Failed to attach to exec {exec_id}: {source}")]
    Attach {
        exec_id: String,
        #[source]
        source: RuntimeError,
    },

    #[error("Exec output stream failed: {0}")]
    Stream(#[source] RuntimeError),

    #[error("Failed to inspect exec {exec_id}: {source}")]
    Inspect {
        exec_id: String,
        #[source]
        source: RuntimeError,
    },

    #[error("Exec deadline of {deadline:?} exceeded")]
    DeadlineExceeded { deadline: Duration },

    #[error("Exec output copy task failed: {0}")]
    CopyTaskFailed(#[from] tokio::task::JoinError),

    #[error("Exec {exec_id} finished without an exit code")]
    MissingExitCode { exec_id: String },
}

impl ExecError {
    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self, ExecError::DeadlineExceeded { .. })
    }
}

pub type ExecOutcome<T> = Result<T, ExecError>;

/// Output and exit status of a finished exec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// A zero deadline means "wait indefinitely", not "already expired".
pub fn effective_deadline(deadline: Option<Duration>) -> Option<Duration> {
    deadline.filter(|deadline| !deadline.is_zero())
}

/// Run `command` in `container_id`, waiting at most `deadline` (if any) for
/// it to finish.
#[instrument(skip(runtime, command), fields(command = %command.join(" ")))]
pub async fn execute(
    runtime: &dyn ContainerRuntime,
    container_id: &str,
    command: &[String],
    deadline: Option<Duration>,
) -> ExecOutcome<ExecResult> {
    let exec_id = runtime
        .exec_create(container_id, command)
        .await
        .map_err(|source| ExecError::Create {
            container: container_id.to_string(),
            source,
        })?;

    let deadline = effective_deadline(deadline);
    let expires_at = deadline.map(|deadline| Instant::now() + deadline);

    let stream = bounded(expires_at, deadline, runtime.exec_attach(&exec_id))
        .await?
        .map_err(|source| ExecError::Attach {
            exec_id: exec_id.clone(),
            source,
        })?;

    let mut copy = AbortOnDrop(tokio::spawn(demultiplex(stream)));
    let (stdout, stderr) = tokio::select! {
        copied = &mut copy.0 => copied?.map_err(ExecError::Stream)?,
        _ = expiry(expires_at) => {
            warn!("Exec {} in {} exceeded its deadline", exec_id, container_id);
            return Err(ExecError::DeadlineExceeded {
                deadline: deadline.unwrap_or_default(),
            });
        }
    };

    let stdout = String::from_utf8_lossy(&stdout).into_owned();
    let stderr = String::from_utf8_lossy(&stderr).into_owned();

    let status = bounded(expires_at, deadline, runtime.exec_inspect(&exec_id))
        .await?
        .map_err(|source| ExecError::Inspect {
            exec_id: exec_id.clone(),
            source,
        })?;
    let exit_code = status
        .exit_code
        .ok_or_else(|| ExecError::MissingExitCode {
            exec_id: exec_id.clone(),
        })?;

    debug!(
        "Exec {} exited with {} ({} bytes stdout, {} bytes stderr)",
        exec_id,
        exit_code,
        stdout.len(),
        stderr.len()
    );

    Ok(ExecResult {
        stdout,
        stderr,
        exit_code,
    })
}

/// Aborts the wrapped task when dropped; a finished task is unaffected.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Drain the exec stream into separate stdout and stderr buffers.
async fn demultiplex(mut stream: ExecStream) -> Result<(Vec<u8>, Vec<u8>), RuntimeError> {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    while let Some(frame) = stream.next().await {
        let frame = frame?;
        match frame.channel {
            StreamChannel::Stdout => stdout.extend_from_slice(&frame.data),
            StreamChannel::Stderr => stderr.extend_from_slice(&frame.data),
        }
    }
    Ok((stdout, stderr))
}

async fn expiry(expires_at: Option<Instant>) {
    match expires_at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn bounded<F, T>(
    expires_at: Option<Instant>,
    deadline: Option<Duration>,
    future: F,
) -> ExecOutcome<T>
where
    F: std::future::Future<Output = T>,
{
    match expires_at {
        Some(at) => tokio::time::timeout_at(at, future)
            .await
            .map_err(|_| ExecError::DeadlineExceeded {
                deadline: deadline.unwrap_or_default(),
            }),
        None => Ok(future.await),
    }
}

/// Wrap a shell snippet as `sh -c <script>`.
pub fn shell(script: &str) -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), script.to_string()]
}
