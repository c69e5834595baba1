//! Execution of untrusted snippets as bounded child processes.
//!
//! A submission flows through:
//! - `detect`: heuristic hazard classification (loops, delays)
//! - `transform`: textual rewrite that bounds loops, clamps sleeps and
//!   injects a SIGALRM watchdog
//! - `artifact`: a uniquely named scratch file, deleted on drop
//! - `executor`: interpreter child process raced against the outer deadline
//! - `service`: validation and sequencing of the above
//!
//! This guards against accidental hangs only. It is not a security
//! boundary: scripts keep full filesystem and network access, and obfuscated
//! loops or memory exhaustion are not detected.

pub mod artifact;
pub mod detect;
pub mod error;
pub mod executor;
pub mod policy;
pub mod service;
pub mod transform;

pub use artifact::ExecutionArtifact;
pub use detect::{Hazards, InterpreterProbe, detect_hazards, detect_interpreter};
pub use error::SandboxError;
pub use executor::{ExecutionOutcome, ExecutionResult, run_artifact};
pub use policy::{Deadlines, ExecutionPolicy, build_policy};
pub use service::{Execution, SandboxService, timeout_message};
pub use transform::{MODIFIED_NOTE, SafetyLimits, TransformedCode, make_safe};
