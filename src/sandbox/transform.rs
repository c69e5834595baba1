//! Defensive rewriting of submissions that look like they will hang.
//!
//! Everything here is textual: regex and substring matching plus paren
//! counting. There is no Python parser behind it, so the rewrite can be
//! fooled and can occasionally produce code that no longer compiles. It is
//! a mitigation for accidental hangs, not an isolation boundary.

use serde::Serialize;

use super::detect::{DELAY_CALL, Hazards, UNBOUNDED_LOOP, detect_hazards};

/// Message surfaced alongside the output when a submission was rewritten.
pub const MODIFIED_NOTE: &str = "Note: Your code was modified to run safely in the sandbox. \
Animation or infinite loops may not work as expected.";

const BANNER: &str = "\
# NOTE: This code has been modified by the sandbox to run safely
# Original animation or infinite loops may not work as expected
# The execution will be limited to prevent timeouts

";

/// Knobs for the rewrite.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SafetyLimits {
    /// Iteration cap substituted for `while True`.
    pub loop_cap: u32,

    /// Upper bound for every delay argument, in seconds.
    pub delay_clamp_secs: f64,

    /// In-process alarm, in whole seconds.
    pub watchdog_secs: u64,
}

impl Default for SafetyLimits {
    fn default() -> Self {
        Self {
            loop_cap: 10,
            delay_clamp_secs: 0.01,
            watchdog_secs: 25,
        }
    }
}

/// A submission after the safety pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransformedCode {
    pub code: String,
    pub modified: bool,
    pub note: Option<String>,
    pub hazards: Hazards,
}

impl TransformedCode {
    /// Wrap `code` without rewriting it.
    pub fn unchanged(code: &str) -> Self {
        Self {
            code: code.to_string(),
            modified: false,
            note: None,
            hazards: detect_hazards(code),
        }
    }
}

/// Rewrite `code` so that loops and delays are bounded.
///
/// Benign code (no hazard detected) is returned verbatim. This never fails;
/// the worst case is a no-op.
pub fn make_safe(code: &str, limits: &SafetyLimits) -> TransformedCode {
    let hazards = detect_hazards(code);
    if !hazards.any() {
        return TransformedCode {
            code: code.to_string(),
            modified: false,
            note: None,
            hazards,
        };
    }

    let with_import = ensure_signal_import(code);

    let bounded = UNBOUNDED_LOOP
        .replace_all(
            &with_import,
            format!("for _limited_iteration in range({})", limits.loop_cap).as_str(),
        )
        .into_owned();

    let clamped = clamp_delays(&bounded, limits.delay_clamp_secs);
    let guarded = inject_watchdog(&clamped, limits.watchdog_secs);
    let rewritten = format!("{BANNER}{guarded}");

    let modified = rewritten != code;
    TransformedCode {
        code: rewritten,
        modified,
        note: modified.then(|| MODIFIED_NOTE.to_string()),
        hazards,
    }
}

fn is_top_level_import(line: &str) -> bool {
    line.starts_with("import ") || line.starts_with("from ")
}

/// Index of the line just past the last top-level import statement,
/// following parenthesized and backslash continuations. Zero if none.
fn import_block_end(lines: &[&str]) -> usize {
    let mut end = 0;
    let mut i = 0;

    while i < lines.len() {
        if !is_top_level_import(lines[i]) {
            i += 1;
            continue;
        }

        let mut j = i;
        if lines[j].contains('(') && !lines[j].contains(')') {
            while j + 1 < lines.len() && !lines[j].contains(')') {
                j += 1;
            }
        }
        while j + 1 < lines.len() && lines[j].trim_end().ends_with('\\') {
            j += 1;
        }

        end = j + 1;
        i = j + 1;
    }

    end
}

fn ensure_signal_import(code: &str) -> String {
    let lines: Vec<&str> = code.split('\n').collect();
    if lines.iter().any(|l| l.trim_end() == "import signal") {
        return code.to_string();
    }

    let at = import_block_end(&lines);
    let mut out: Vec<&str> = Vec::with_capacity(lines.len() + 1);
    out.extend_from_slice(&lines[..at]);
    out.push("import signal");
    out.extend_from_slice(&lines[at..]);
    out.join("\n")
}

fn watchdog_block(secs: u64) -> String {
    format!(
        "
# Added by sandbox for safety
def _sandbox_timeout_handler(signum, frame):
    import os, sys
    print(\"\\n\\n[SANDBOX] Execution time limit reached. Script terminated.\")
    sys.stdout.flush()
    os._exit(0)

signal.signal(signal.SIGALRM, _sandbox_timeout_handler)
signal.alarm({secs})
"
    )
}

fn inject_watchdog(code: &str, secs: u64) -> String {
    let lines: Vec<&str> = code.split('\n').collect();
    let at = import_block_end(&lines);
    let block = watchdog_block(secs);

    let mut out: Vec<&str> = Vec::with_capacity(lines.len() + 12);
    out.extend_from_slice(&lines[..at]);
    out.extend(block.split('\n'));
    out.extend_from_slice(&lines[at..]);
    out.join("\n")
}

/// Render seconds as a Python numeric literal.
fn seconds_literal(secs: f64) -> String {
    format!("{}", secs)
}

/// Clamp the first argument of every `sleep(...)` / `time.sleep(...)` call.
fn clamp_delays(code: &str, clamp: f64) -> String {
    let literal = seconds_literal(clamp);
    let mut out = String::with_capacity(code.len());
    let mut cursor = 0;

    for m in DELAY_CALL.find_iter(code) {
        // Nested inside an argument we already rewrote
        if m.start() < cursor {
            continue;
        }
        // `def sleep(...)` declares parameters, it is not a call
        if follows_def(&code[..m.start()]) {
            continue;
        }
        let args_start = m.end();
        let Some(args_end) = matching_paren(code, args_start) else {
            continue;
        };

        out.push_str(&code[cursor..args_start]);
        out.push_str(&clamp_arguments(&code[args_start..args_end], clamp, &literal));
        cursor = args_end;
    }

    out.push_str(&code[cursor..]);
    out
}

fn follows_def(before: &str) -> bool {
    let trimmed = before.trim_end();
    if trimmed.len() == before.len() {
        return false;
    }
    trimmed.strip_suffix("def").is_some_and(|head| {
        !head
            .chars()
            .next_back()
            .is_some_and(|c| c.is_alphanumeric() || c == '_')
    })
}

/// The `expr` of a `name=expr` argument. `==` is a comparison, not a keyword.
fn keyword_value(arg: &str) -> Option<&str> {
    let eq = arg.find('=')?;
    let name = arg[..eq].trim();
    let is_ident = name
        .chars()
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_alphanumeric() || c == '_');
    if !is_ident || arg[eq + 1..].starts_with('=') {
        return None;
    }
    Some(&arg[eq + 1..])
}

/// Clamped replacement for a delay expression, `None` when it is already bounded.
fn clamp_value(expr: &str, clamp: f64, literal: &str) -> Option<String> {
    let trimmed = expr.trim();
    // `**kwargs` cannot be wrapped in a positional call
    if trimmed.is_empty() || trimmed.starts_with("**") {
        return None;
    }

    let numeric = trimmed.starts_with(|c: char| c.is_ascii_digit() || c == '.');
    match trimmed.parse::<f64>() {
        Ok(value) if numeric && value <= clamp => None,
        Ok(_) if numeric => Some(literal.to_string()),
        _ => Some(format!("min({}, {})", trimmed, literal)),
    }
}

fn clamp_arguments(args: &str, clamp: f64, literal: &str) -> String {
    let (first, rest) = match top_level_comma(args) {
        Some(idx) => (&args[..idx], &args[idx..]),
        None => (args, ""),
    };

    let (prefix, value) = match keyword_value(first) {
        Some(value) => {
            let expr_start = first.len() - value.trim_start().len();
            (first[..expr_start].trim_start(), value)
        }
        None => ("", first),
    };

    match clamp_value(value, clamp, literal) {
        Some(clamped) => format!("{prefix}{clamped}{rest}"),
        None => args.to_string(),
    }
}

/// Byte offset of the `)` closing a call whose arguments start at `start`.
fn matching_paren(code: &str, start: usize) -> Option<usize> {
    let bytes = code.as_bytes();
    let mut depth = 1usize;
    let mut quote: Option<u8> = None;
    let mut i = start;

    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == b'\\' {
                    i += 1;
                } else if b == q {
                    quote = None;
                }
            }
            None => match b {
                b'"' | b'\'' => quote = Some(b),
                b'(' | b'[' | b'{' => depth += 1,
                b')' | b']' | b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        return (b == b')').then_some(i);
                    }
                }
                _ => {}
            },
        }
        i += 1;
    }

    None
}

fn top_level_comma(args: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let bytes = args.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == b'\\' {
                    i += 1;
                } else if b == q {
                    quote = None;
                }
            }
            None => match b {
                b'"' | b'\'' => quote = Some(b),
                b'(' | b'[' | b'{' => depth += 1,
                b')' | b']' | b'}' => depth = depth.saturating_sub(1),
                b',' if depth == 0 => return Some(i),
                _ => {}
            },
        }
        i += 1;
    }

    None
}
