use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// `while True` and `while (True)`, the idioms rewritten into bounded loops.
pub(crate) static UNBOUNDED_LOOP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\bwhile(?:\s+True\b|\s*\(\s*True\s*\))").expect("unbounded loop pattern")
});

/// Start of a delay call; the argument is located by paren matching.
pub(crate) static DELAY_CALL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:time\.)?sleep\s*\(").expect("delay call pattern"));

const ANIMATION_MARKERS: &[&str] = &["time.sleep", "animation", "clear_screen", "animate"];

/// Heuristic classification of a submission.
///
/// This is substring and pattern matching over raw text, not a parse. It
/// catches the common accidental hangs (busy loops, animation frames) and
/// nothing else: obfuscated loops, memory exhaustion, filesystem or network
/// access all pass through untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Hazards {
    /// Looks like a loop that never terminates on its own.
    pub unbounded_loop: bool,

    /// Sleeps or animates, so wall-clock time dominates.
    pub delay: bool,
}

impl Hazards {
    pub fn any(&self) -> bool {
        self.unbounded_loop || self.delay
    }
}

/// Classify `code` without modifying it.
pub fn detect_hazards(code: &str) -> Hazards {
    let unbounded_loop =
        UNBOUNDED_LOOP.is_match(code) || (code.contains("while") && code.contains("sleep"));
    let delay = DELAY_CALL.is_match(code) || ANIMATION_MARKERS.iter().any(|m| code.contains(m));

    Hazards {
        unbounded_loop,
        delay,
    }
}

/// Result of probing the configured interpreter.
#[derive(Debug, Clone)]
pub struct InterpreterProbe {
    /// Name or path as configured.
    pub command: String,

    /// Resolved location on disk, if found.
    pub resolved: Option<PathBuf>,

    /// First line of `--version` output.
    pub version: Option<String>,

    /// Whether the interpreter supports SIGALRM (the watchdog needs it).
    pub alarm_supported: bool,
}

/// Probe the interpreter used to run submissions.
pub fn detect_interpreter(command: &str) -> InterpreterProbe {
    let resolved = resolve_on_path(command);

    let version = resolved.as_ref().and_then(|path| {
        let output = Command::new(path)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .ok()?;
        // Python 2 printed its version on stderr
        let text = if output.stdout.is_empty() {
            String::from_utf8_lossy(&output.stderr).into_owned()
        } else {
            String::from_utf8_lossy(&output.stdout).into_owned()
        };
        text.lines().next().map(|l| l.trim().to_string())
    });

    InterpreterProbe {
        command: command.to_string(),
        resolved,
        version,
        alarm_supported: cfg!(unix),
    }
}

fn resolve_on_path(command: &str) -> Option<PathBuf> {
    let candidate = Path::new(command);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }

    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(command))
        .find(|p| p.is_file())
}

impl InterpreterProbe {
    pub fn is_available(&self) -> bool {
        self.resolved.is_some()
    }

    /// Human-readable status lines for `sandbox status`.
    pub fn status_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();

        match self.resolved {
            Some(ref path) => lines.push(format!(
                "  Interpreter:  {:<28} ok",
                path.display().to_string()
            )),
            None => lines.push(format!(
                "  Interpreter:  {:<28} --",
                format!("{} (not found)", self.command)
            )),
        }

        if let Some(ref version) = self.version {
            lines.push(format!("  Version:      {}", version));
        }

        if self.alarm_supported {
            lines.push("  Watchdog:     SIGALRM                      ok".to_string());
        } else {
            lines.push("  Watchdog:     unsupported platform         --".to_string());
        }

        lines
    }
}
