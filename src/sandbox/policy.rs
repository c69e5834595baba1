use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::error::SandboxError;
use super::transform::SafetyLimits;
use crate::config::SandboxConfig;

/// Watchdog and outer deadline for one run.
///
/// The outer deadline must strictly exceed the watchdog, so that rewritten
/// code gets the chance to stop itself before the host kills it. The
/// watchdog is armed with `signal.alarm`, which counts whole seconds, so it
/// must be at least one second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawDeadlines")]
pub struct Deadlines {
    watchdog: Duration,
    outer: Duration,
}

/// Unchecked wire form of `Deadlines`.
#[derive(Deserialize)]
struct RawDeadlines {
    watchdog: Duration,
    outer: Duration,
}

impl TryFrom<RawDeadlines> for Deadlines {
    type Error = SandboxError;

    fn try_from(raw: RawDeadlines) -> Result<Self, Self::Error> {
        Self::new(raw.watchdog, raw.outer)
    }
}

impl Deadlines {
    pub fn new(watchdog: Duration, outer: Duration) -> Result<Self, SandboxError> {
        if watchdog < Duration::from_secs(1) || outer <= watchdog {
            return Err(SandboxError::InvalidDeadlines { watchdog, outer });
        }
        Ok(Self { watchdog, outer })
    }

    /// In-process alarm armed by the injected watchdog.
    pub fn watchdog(&self) -> Duration {
        self.watchdog
    }

    /// Host-side limit on the whole child process.
    pub fn outer(&self) -> Duration {
        self.outer
    }

    pub fn margin(&self) -> Duration {
        self.outer - self.watchdog
    }
}

impl Default for Deadlines {
    fn default() -> Self {
        Self {
            watchdog: Duration::from_secs(25),
            outer: Duration::from_secs(30),
        }
    }
}

/// Everything a run needs, fixed at construction time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPolicy {
    /// Interpreter invoked as `<interpreter> <artifact>`.
    pub interpreter: String,

    /// Directory for ephemeral artifacts.
    pub scratch_dir: PathBuf,

    pub deadlines: Deadlines,

    /// Submissions longer than this many characters are rejected.
    pub max_code_chars: usize,

    /// Per-stream cap on captured output.
    pub max_output_bytes: usize,

    /// Iteration cap for rewritten `while True` loops.
    pub loop_cap: u32,

    /// Upper bound for delay arguments, in seconds.
    pub delay_clamp_secs: f64,

    /// Run the safety transformer before executing.
    pub rewrite: bool,

    /// Concurrent runs allowed; 0 means no limit.
    pub max_concurrent: usize,
}

impl ExecutionPolicy {
    /// Limits handed to the safety transformer.
    pub fn safety_limits(&self) -> SafetyLimits {
        SafetyLimits {
            loop_cap: self.loop_cap,
            delay_clamp_secs: self.delay_clamp_secs,
            // alarm() takes whole seconds; rounding down keeps it under the outer deadline
            watchdog_secs: self.deadlines.watchdog().as_secs(),
        }
    }

    /// Default limits with an explicit scratch directory.
    pub fn with_scratch_dir(scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
            ..build_policy(&SandboxConfig::default(), Path::new(""))
        }
    }
}

/// Build an `ExecutionPolicy` from sandbox config and a resolved scratch dir.
///
/// Deadlines that violate the watchdog < outer ordering fall back to the
/// defaults; `Config::validate` rejects such configs before this is reached.
pub fn build_policy(config: &SandboxConfig, scratch_dir: &Path) -> ExecutionPolicy {
    let deadlines = Deadlines::new(
        Duration::from_secs(config.watchdog_secs),
        Duration::from_secs(config.timeout_secs),
    )
    .unwrap_or_default();

    ExecutionPolicy {
        interpreter: config.interpreter.clone(),
        scratch_dir: scratch_dir.to_path_buf(),
        deadlines,
        max_code_chars: config.max_code_chars,
        max_output_bytes: config.max_output_bytes,
        loop_cap: config.loop_cap,
        delay_clamp_secs: config.delay_clamp_secs,
        rewrite: config.rewrite,
        max_concurrent: config.max_concurrent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SandboxConfig;

    #[test]
    fn test_build_policy_defaults() {
        let config = SandboxConfig::default();
        let scratch = PathBuf::from("/tmp/mdexec-scratch");
        let policy = build_policy(&config, &scratch);

        assert_eq!(policy.scratch_dir, scratch);
        assert_eq!(policy.interpreter, "python3");
        assert_eq!(policy.deadlines.watchdog(), Duration::from_secs(25));
        assert_eq!(policy.deadlines.outer(), Duration::from_secs(30));
        assert_eq!(policy.max_code_chars, 10_000);
        assert_eq!(policy.loop_cap, 10);
        assert!(policy.rewrite);
        assert_eq!(policy.max_concurrent, 0);
    }

    #[test]
    fn test_deadlines_require_margin() {
        assert!(Deadlines::new(Duration::from_secs(25), Duration::from_secs(30)).is_ok());
        assert!(Deadlines::new(Duration::from_secs(30), Duration::from_secs(30)).is_err());
        assert!(Deadlines::new(Duration::from_secs(31), Duration::from_secs(30)).is_err());
        assert!(Deadlines::new(Duration::ZERO, Duration::from_secs(30)).is_err());
    }

    #[test]
    fn test_sub_second_watchdog_is_rejected() {
        let err = Deadlines::new(Duration::from_millis(500), Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, SandboxError::InvalidDeadlines { .. }));
    }

    #[test]
    fn test_injected_alarm_stays_below_outer_deadline() {
        let mut policy = ExecutionPolicy::with_scratch_dir("/tmp");
        policy.deadlines =
            Deadlines::new(Duration::from_millis(1500), Duration::from_secs(2)).unwrap();

        let alarm = Duration::from_secs(policy.safety_limits().watchdog_secs);
        assert_eq!(alarm, Duration::from_secs(1));
        assert!(alarm < policy.deadlines.outer());
    }

    #[test]
    fn test_default_margin() {
        assert_eq!(Deadlines::default().margin(), Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_config_deadlines_fall_back() {
        let mut config = SandboxConfig::default();
        config.watchdog_secs = 40;
        let policy = build_policy(&config, Path::new("/tmp"));
        assert_eq!(policy.deadlines, Deadlines::default());
    }

    #[test]
    fn test_safety_limits_follow_policy() {
        let mut config = SandboxConfig::default();
        config.loop_cap = 4;
        config.watchdog_secs = 2;
        config.timeout_secs = 3;
        let limits = build_policy(&config, Path::new("/tmp")).safety_limits();

        assert_eq!(limits.loop_cap, 4);
        assert_eq!(limits.watchdog_secs, 2);
    }

    #[test]
    fn test_policy_serialization_roundtrip() {
        let policy = ExecutionPolicy::with_scratch_dir("/tmp/test-scratch");

        let json = serde_json::to_string(&policy).unwrap();
        let deserialized: ExecutionPolicy = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized.scratch_dir, policy.scratch_dir);
        assert_eq!(deserialized.deadlines, policy.deadlines);
        assert_eq!(deserialized.max_code_chars, policy.max_code_chars);
    }

    #[test]
    fn test_deserialized_deadlines_are_checked() {
        let inverted = r#"{"watchdog":{"secs":30,"nanos":0},"outer":{"secs":25,"nanos":0}}"#;
        assert!(serde_json::from_str::<Deadlines>(inverted).is_err());

        let sub_second = r#"{"watchdog":{"secs":0,"nanos":500000000},"outer":{"secs":1,"nanos":0}}"#;
        assert!(serde_json::from_str::<Deadlines>(sub_second).is_err());

        let valid = r#"{"watchdog":{"secs":2,"nanos":0},"outer":{"secs":3,"nanos":0}}"#;
        let deadlines: Deadlines = serde_json::from_str(valid).unwrap();
        assert_eq!(deadlines.margin(), Duration::from_secs(1));
    }
}
