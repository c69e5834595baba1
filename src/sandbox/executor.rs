use serde::Serialize;
use std::process::Stdio;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use super::artifact::ExecutionArtifact;
use super::policy::ExecutionPolicy;

/// Captured output of a process that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,

    /// `None` when the process was ended by a signal.
    pub exit_code: Option<i32>,

    /// At least one stream exceeded `max_output_bytes`.
    pub truncated: bool,
}

impl ExecutionResult {
    /// Stdout followed by stderr, with stderr marked by an `Error: ` prefix.
    ///
    /// Writing to stderr is legitimate script behavior, so it is reported
    /// in-band rather than as a failure.
    pub fn combined_output(&self) -> String {
        let mut out = self.stdout.clone();

        if !self.stderr.is_empty() {
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str("Error: ");
            out.push_str(&self.stderr);
        } else {
            match self.exit_code {
                Some(0) => {}
                Some(code) => {
                    if !out.is_empty() && !out.ends_with('\n') {
                        out.push('\n');
                    }
                    out.push_str(&format!("[Process exited with code {}]", code));
                }
                None => {
                    if !out.is_empty() && !out.ends_with('\n') {
                        out.push('\n');
                    }
                    out.push_str("[Process terminated by signal]");
                }
            }
        }

        if self.truncated {
            out.push_str("\n\n[Output truncated]");
        }

        out
    }
}

/// How one request ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Success(ExecutionResult),
    TimedOut,
    RuntimeError(String),
    ValidationError(String),
}

/// Run an artifact under the policy's outer deadline.
///
/// This is the parent-side function. It:
/// 1. Spawns `<interpreter> <artifact>` in a fresh process group
/// 2. Collects stdout and stderr concurrently with the exit status
/// 3. Races all of that against the outer deadline
/// 4. Kills the whole process group if the deadline wins
/// 5. Kills whatever is left of the group on every other exit too, so
///    detached descendants never outlive the request
///
/// It never returns an error: launch and I/O failures become
/// `RuntimeError`, a lost race becomes `TimedOut`.
pub async fn run_artifact(artifact: &ExecutionArtifact, policy: &ExecutionPolicy) -> ExecutionOutcome {
    let mut command = Command::new(&policy.interpreter);
    command
        .arg(artifact.path())
        .current_dir(&policy.scratch_dir)
        .env("PYTHONDONTWRITEBYTECODE", "1")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    // Own process group, so a timeout also takes down anything the script forked
    #[cfg(unix)]
    command.process_group(0);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!("Failed to start interpreter {}: {}", policy.interpreter, e);
            return ExecutionOutcome::RuntimeError(format!(
                "Failed to start interpreter '{}': {}",
                policy.interpreter, e
            ));
        }
    };

    // The group id equals the leader's pid. It stays valid after the leader
    // is reaped, as long as any member is still alive.
    let pgid = child.id();

    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        terminate(&mut child, pgid).await;
        return ExecutionOutcome::RuntimeError("Failed to capture interpreter output".to_string());
    };

    let limit = policy.max_output_bytes;
    let deadline = policy.deadlines.outer();
    let started = Instant::now();

    let completed = tokio::time::timeout(deadline, async {
        tokio::try_join!(
            child.wait(),
            read_capped(stdout, limit),
            read_capped(stderr, limit)
        )
    })
    .await;

    match completed {
        Ok(Ok((status, (stdout, stdout_truncated), (stderr, stderr_truncated)))) => {
            kill_group(pgid);
            debug!(
                "Artifact {} finished in {:?} (exit={:?})",
                artifact.id(),
                started.elapsed(),
                status.code()
            );
            ExecutionOutcome::Success(ExecutionResult {
                stdout,
                stderr,
                exit_code: status.code(),
                truncated: stdout_truncated || stderr_truncated,
            })
        }
        Ok(Err(e)) => {
            terminate(&mut child, pgid).await;
            ExecutionOutcome::RuntimeError(format!("Failed to collect interpreter output: {}", e))
        }
        Err(_) => {
            warn!(
                "Artifact {} exceeded the {:?} deadline, killing process group",
                artifact.id(),
                deadline
            );
            terminate(&mut child, pgid).await;
            ExecutionOutcome::TimedOut
        }
    }
}

/// Read a stream to the end, keeping at most `limit` bytes.
///
/// The remainder is drained and dropped so the writer never blocks on a
/// full pipe.
async fn read_capped<R: AsyncRead + Unpin>(
    mut reader: R,
    limit: usize,
) -> std::io::Result<(String, bool)> {
    let mut kept = Vec::new();
    let mut truncated = false;
    let mut buf = [0u8; 8192];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        let room = limit.saturating_sub(kept.len());
        if n > room {
            truncated = true;
        }
        kept.extend_from_slice(&buf[..n.min(room)]);
    }

    Ok((String::from_utf8_lossy(&kept).into_owned(), truncated))
}

/// Kill the child's process group and reap the child.
async fn terminate(child: &mut Child, pgid: Option<u32>) {
    kill_group(pgid);

    if let Err(e) = child.kill().await {
        debug!("Failed to kill interpreter process: {}", e);
    }
}

/// SIGKILL every process still in the run's group.
///
/// ESRCH means the group is already empty.
fn kill_group(pgid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pgid) = pgid {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;

        if let Err(e) = killpg(Pid::from_raw(pgid as i32), Signal::SIGKILL)
            && e != nix::errno::Errno::ESRCH
        {
            debug!("killpg({}) failed: {}", pgid, e);
        }
    }

    #[cfg(not(unix))]
    let _ = pgid;
}
