use std::time::Duration;
use thiserror::Error;

/// Faults that stop a request before it produces an outcome.
///
/// Expected results (timeouts, scripts writing to stderr, rejected input)
/// are `ExecutionOutcome` variants, not errors.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("failed to prepare execution artifact: {0}")]
    Artifact(#[source] std::io::Error),

    #[error("scratch directory {path} is unusable: {source}")]
    Scratch {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("sandbox is at capacity ({max} concurrent executions)")]
    Busy { max: usize },

    #[error("watchdog {watchdog:?} must be at least 1s and below the outer deadline {outer:?}")]
    InvalidDeadlines { watchdog: Duration, outer: Duration },
}
