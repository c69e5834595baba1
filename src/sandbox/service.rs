//! Request orchestration: validate, rewrite, materialize, run, clean up.

use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info};
use uuid::Uuid;

use super::artifact::ExecutionArtifact;
use super::detect::Hazards;
use super::error::SandboxError;
use super::executor::{ExecutionOutcome, run_artifact};
use super::policy::ExecutionPolicy;
use super::transform::{TransformedCode, make_safe};

/// Report for one submission.
#[derive(Debug, Clone, Serialize)]
pub struct Execution {
    pub outcome: ExecutionOutcome,

    /// The code that ran differs from the submission.
    pub modified: bool,

    /// Explanation shown next to the output when `modified` is set.
    pub note: Option<String>,

    /// Heuristic classification of the original submission.
    pub hazards: Hazards,

    /// Identifier of the artifact used, if one was created.
    pub artifact_id: Option<Uuid>,

    pub elapsed: Duration,
}

/// User guidance for a timed-out submission, chosen by the same heuristics
/// that drive the rewrite.
pub fn timeout_message(hazards: &Hazards) -> &'static str {
    if hazards.unbounded_loop {
        "Execution timed out: This code contains an infinite loop which cannot run in the sandbox environment."
    } else if hazards.delay {
        "Execution timed out: This code appears to contain animation or sleep functions which may not work well in the sandbox environment."
    } else {
        "Execution timed out: The code took too long to run. Try simplifying it or removing long-running operations."
    }
}

/// Entry point for running submissions.
///
/// Cheap to clone; clones share the policy and the admission semaphore.
#[derive(Debug, Clone)]
pub struct SandboxService {
    policy: Arc<ExecutionPolicy>,
    permits: Option<Arc<Semaphore>>,
}

impl SandboxService {
    pub fn new(policy: ExecutionPolicy) -> Self {
        let permits = (policy.max_concurrent > 0)
            .then(|| Arc::new(Semaphore::new(policy.max_concurrent)));
        Self {
            policy: Arc::new(policy),
            permits,
        }
    }

    pub fn policy(&self) -> &ExecutionPolicy {
        &self.policy
    }

    /// Number of runs currently holding an admission permit.
    ///
    /// Always zero when no limit is configured.
    pub fn in_flight(&self) -> usize {
        self.permits
            .as_ref()
            .map(|p| self.policy.max_concurrent - p.available_permits())
            .unwrap_or(0)
    }

    /// Reject empty or oversized submissions.
    pub fn validate(&self, code: &str) -> Result<(), String> {
        if code.is_empty() {
            return Err("Code is required and must be a string".to_string());
        }

        // Byte length bounds the char count, so only count when it could matter
        let max = self.policy.max_code_chars;
        if code.len() > max && code.chars().count() > max {
            return Err(format!(
                "Code exceeds maximum length of {} characters",
                max
            ));
        }

        Ok(())
    }

    /// The code that would run for `code`, without running it.
    pub fn prepare(&self, code: &str) -> TransformedCode {
        if self.policy.rewrite {
            make_safe(code, &self.policy.safety_limits())
        } else {
            TransformedCode::unchanged(code)
        }
    }

    /// Run one submission to an outcome.
    ///
    /// Rejected input, timeouts and launch failures are reported through
    /// `Execution::outcome`. Only faults of the host itself (scratch
    /// directory or artifact I/O, admission limit) are errors.
    pub async fn execute(&self, code: &str) -> Result<Execution, SandboxError> {
        let started = Instant::now();

        if let Err(message) = self.validate(code) {
            debug!("Rejected submission: {}", message);
            return Ok(Execution {
                outcome: ExecutionOutcome::ValidationError(message),
                modified: false,
                note: None,
                hazards: Hazards::default(),
                artifact_id: None,
                elapsed: started.elapsed(),
            });
        }

        let _permit = match self.permits {
            Some(ref permits) => Some(permits.clone().try_acquire_owned().map_err(|_| {
                SandboxError::Busy {
                    max: self.policy.max_concurrent,
                }
            })?),
            None => None,
        };

        let transformed = self.prepare(code);
        if transformed.modified {
            debug!(
                "Rewrote submission (loop={}, delay={})",
                transformed.hazards.unbounded_loop, transformed.hazards.delay
            );
        }

        let artifact = ExecutionArtifact::create(&self.policy.scratch_dir, &transformed.code).await?;
        let artifact_id = artifact.id();
        let outcome = run_artifact(&artifact, &self.policy).await;
        drop(artifact);

        let elapsed = started.elapsed();
        info!(
            "Execution {} finished: {} in {:?}",
            artifact_id,
            outcome_label(&outcome),
            elapsed
        );

        Ok(Execution {
            outcome,
            modified: transformed.modified,
            note: transformed.note,
            hazards: transformed.hazards,
            artifact_id: Some(artifact_id),
            elapsed,
        })
    }
}

fn outcome_label(outcome: &ExecutionOutcome) -> &'static str {
    match outcome {
        ExecutionOutcome::Success(_) => "success",
        ExecutionOutcome::TimedOut => "timed out",
        ExecutionOutcome::RuntimeError(_) => "runtime error",
        ExecutionOutcome::ValidationError(_) => "rejected",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::detect::{UNBOUNDED_LOOP, detect_interpreter};
    use crate::sandbox::policy::Deadlines;
    use std::path::Path;

    fn python_policy(scratch: &Path) -> Option<ExecutionPolicy> {
        if !detect_interpreter("python3").is_available() {
            eprintln!("python3 not found, skipping");
            return None;
        }
        Some(ExecutionPolicy::with_scratch_dir(scratch))
    }

    fn scratch_is_empty(scratch: &Path) -> bool {
        std::fs::read_dir(scratch)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(true)
    }

    fn stdout_of(execution: &Execution) -> &str {
        match execution.outcome {
            ExecutionOutcome::Success(ref result) => &result.stdout,
            ref other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn oversized_submission_is_rejected_before_any_artifact() {
        let tmp = tempfile::tempdir().unwrap();
        let scratch = tmp.path().join("scratch");
        let service = SandboxService::new(ExecutionPolicy::with_scratch_dir(&scratch));

        let code = "x".repeat(10_001);
        let execution = service.execute(&code).await.unwrap();

        assert_eq!(
            execution.outcome,
            ExecutionOutcome::ValidationError(
                "Code exceeds maximum length of 10000 characters".to_string()
            )
        );
        assert!(execution.artifact_id.is_none());
        assert!(!scratch.exists());
    }

    #[tokio::test]
    async fn empty_submission_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let service = SandboxService::new(ExecutionPolicy::with_scratch_dir(tmp.path()));

        let execution = service.execute("").await.unwrap();
        assert!(matches!(execution.outcome, ExecutionOutcome::ValidationError(_)));
    }

    #[test]
    fn length_is_counted_in_characters() {
        let service = SandboxService::new(ExecutionPolicy::with_scratch_dir("/tmp"));
        // 10,000 characters, 20,000 bytes
        let code = "é".repeat(10_000);
        assert!(service.validate(&code).is_ok());
        assert!(service.validate(&format!("{}x", code)).is_err());
    }

    #[test]
    fn prepare_respects_rewrite_flag() {
        let mut policy = ExecutionPolicy::with_scratch_dir("/tmp");
        let code = "while True:\n    pass";

        let rewritten = SandboxService::new(policy.clone()).prepare(code);
        assert!(rewritten.modified);
        assert!(!UNBOUNDED_LOOP.is_match(&rewritten.code));

        policy.rewrite = false;
        let verbatim = SandboxService::new(policy).prepare(code);
        assert!(!verbatim.modified);
        assert_eq!(verbatim.code, code);
        assert!(verbatim.hazards.unbounded_loop);
    }

    #[test]
    fn timeout_message_follows_hazards() {
        let looping = Hazards {
            unbounded_loop: true,
            delay: true,
        };
        let sleeping = Hazards {
            unbounded_loop: false,
            delay: true,
        };
        assert!(timeout_message(&looping).contains("infinite loop"));
        assert!(timeout_message(&sleeping).contains("animation or sleep"));
        assert!(timeout_message(&Hazards::default()).contains("took too long"));
    }

    #[tokio::test]
    async fn admission_limit_rejects_overflow() {
        let tmp = tempfile::tempdir().unwrap();
        let mut policy = ExecutionPolicy::with_scratch_dir(tmp.path());
        policy.max_concurrent = 1;
        let service = SandboxService::new(policy);

        let held = service
            .permits
            .clone()
            .unwrap()
            .try_acquire_owned()
            .unwrap();
        assert_eq!(service.in_flight(), 1);

        let err = service.execute("print(1)").await.unwrap_err();
        assert!(matches!(err, SandboxError::Busy { max: 1 }));
        assert!(scratch_is_empty(tmp.path()));

        drop(held);
        assert_eq!(service.in_flight(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn launch_failure_still_removes_artifact() {
        let tmp = tempfile::tempdir().unwrap();
        let mut policy = ExecutionPolicy::with_scratch_dir(tmp.path());
        policy.interpreter = "definitely-not-an-interpreter-1234".to_string();
        let service = SandboxService::new(policy);

        let execution = service.execute("print(1)").await.unwrap();
        assert!(matches!(execution.outcome, ExecutionOutcome::RuntimeError(_)));
        assert!(execution.artifact_id.is_some());
        assert!(scratch_is_empty(tmp.path()));
    }

    #[tokio::test]
    async fn hello_runs_unmodified() {
        let tmp = tempfile::tempdir().unwrap();
        let Some(policy) = python_policy(tmp.path()) else {
            return;
        };
        let service = SandboxService::new(policy);

        let execution = service.execute("print(\"hello\")").await.unwrap();
        assert_eq!(stdout_of(&execution).trim_end(), "hello");
        assert!(!execution.modified);
        assert!(execution.note.is_none());
        assert!(scratch_is_empty(tmp.path()));
    }

    #[tokio::test]
    async fn infinite_print_loop_is_capped_at_ten() {
        let tmp = tempfile::tempdir().unwrap();
        let Some(policy) = python_policy(tmp.path()) else {
            return;
        };
        let service = SandboxService::new(policy);

        let execution = service
            .execute("while True:\n    print(\"x\")")
            .await
            .unwrap();
        assert!(execution.modified);
        assert!(execution.note.is_some());
        assert_eq!(stdout_of(&execution), "x\n".repeat(10));
        assert!(scratch_is_empty(tmp.path()));
    }

    #[tokio::test]
    async fn sleeping_loop_finishes_quickly() {
        let tmp = tempfile::tempdir().unwrap();
        let Some(policy) = python_policy(tmp.path()) else {
            return;
        };
        let service = SandboxService::new(policy);

        let execution = service
            .execute("import time\nwhile True:\n    time.sleep(5)")
            .await
            .unwrap();
        assert!(execution.modified);
        assert!(matches!(execution.outcome, ExecutionOutcome::Success(_)));
        assert!(execution.elapsed < Duration::from_secs(25));
        assert!(scratch_is_empty(tmp.path()));
    }

    #[tokio::test]
    async fn stderr_is_surfaced_not_failed() {
        let tmp = tempfile::tempdir().unwrap();
        let Some(policy) = python_policy(tmp.path()) else {
            return;
        };
        let service = SandboxService::new(policy);

        let execution = service.execute("print('ok')\nraise ValueError('bad')").await.unwrap();
        match execution.outcome {
            ExecutionOutcome::Success(ref result) => {
                let combined = result.combined_output();
                assert!(combined.starts_with("ok\nError: "));
                assert!(combined.contains("ValueError: bad"));
            }
            ref other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(scratch_is_empty(tmp.path()));
    }

    #[tokio::test]
    async fn same_submission_twice_uses_distinct_artifacts() {
        let tmp = tempfile::tempdir().unwrap();
        let Some(policy) = python_policy(tmp.path()) else {
            return;
        };
        let service = SandboxService::new(policy);

        let code = "print(sum(range(10)))";
        let first = service.execute(code).await.unwrap();
        let second = service.execute(code).await.unwrap();

        assert_ne!(first.artifact_id, second.artifact_id);
        assert_eq!(stdout_of(&first), stdout_of(&second));
        assert!(scratch_is_empty(tmp.path()));
    }

    #[tokio::test]
    async fn watchdog_stops_rewritten_code_before_the_deadline() {
        let tmp = tempfile::tempdir().unwrap();
        let Some(mut policy) = python_policy(tmp.path()) else {
            return;
        };
        policy.deadlines = Deadlines::new(Duration::from_secs(1), Duration::from_secs(5)).unwrap();
        let service = SandboxService::new(policy);

        // Flagged as a loop, but not a `while True` the rewrite can bound
        let code = "import time\nx = 0\nwhile x >= 0:\n    time.sleep(0.001)";
        let execution = service.execute(code).await.unwrap();

        assert!(execution.modified);
        assert!(stdout_of(&execution).contains("[SANDBOX] Execution time limit reached"));
        assert!(execution.elapsed < Duration::from_secs(5));
        assert!(scratch_is_empty(tmp.path()));
    }

    #[tokio::test]
    async fn unrewritten_infinite_loop_hits_outer_deadline() {
        let tmp = tempfile::tempdir().unwrap();
        let Some(mut policy) = python_policy(tmp.path()) else {
            return;
        };
        policy.rewrite = false;
        policy.deadlines = Deadlines::new(Duration::from_secs(1), Duration::from_secs(2)).unwrap();
        let service = SandboxService::new(policy);

        let execution = service.execute("while True:\n    pass").await.unwrap();

        assert_eq!(execution.outcome, ExecutionOutcome::TimedOut);
        assert!(!execution.modified);
        assert!(execution.hazards.unbounded_loop);
        assert!(execution.elapsed >= Duration::from_secs(2), "early: {:?}", execution.elapsed);
        assert!(execution.elapsed < Duration::from_secs(6), "late: {:?}", execution.elapsed);
        assert!(scratch_is_empty(tmp.path()));
    }
}
