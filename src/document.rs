//! Runnable code blocks in markdown documents.
//!
//! Only fenced blocks whose info string names a sandboxed language are
//! runnable; every other block is left to the document renderer.

use serde::Serialize;

/// A fenced code block routed to the sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CodeBlock {
    /// Block body without the fences.
    pub code: String,

    /// Language tag as written in the info string.
    pub language: String,

    /// 1-based line of the opening fence.
    pub line: usize,
}

impl CodeBlock {
    pub fn line_count(&self) -> usize {
        self.code.lines().count()
    }

    /// First line of the block, with `...` appended when more lines follow.
    pub fn preview(&self) -> String {
        let mut lines = self.code.lines();
        let first = lines.next().unwrap_or("");
        if lines.next().is_some() {
            format!("{}...", first)
        } else {
            first.to_string()
        }
    }
}

struct Fence {
    marker: char,
    len: usize,
    indent: usize,
}

/// Parse an opening fence: up to three spaces, then three or more backticks
/// or tildes, then the info string.
fn opening_fence(line: &str) -> Option<(Fence, &str)> {
    let indent = line.len() - line.trim_start_matches(' ').len();
    if indent > 3 {
        return None;
    }
    let rest = &line[indent..];
    let marker = rest.chars().next().filter(|c| *c == '`' || *c == '~')?;
    let len = rest.len() - rest.trim_start_matches(marker).len();
    if len < 3 {
        return None;
    }
    let info = rest[len..].trim();
    if marker == '`' && info.contains('`') {
        return None;
    }
    Some((Fence { marker, len, indent }, info))
}

fn closes(fence: &Fence, line: &str) -> bool {
    let trimmed = line.trim_start_matches(' ');
    if line.len() - trimmed.len() > 3 {
        return false;
    }
    let len = trimmed.len() - trimmed.trim_start_matches(fence.marker).len();
    len >= fence.len && trimmed[len..].trim().is_empty()
}

/// Strip up to `indent` leading spaces, mirroring the opening fence.
fn dedent(line: &str, indent: usize) -> &str {
    let spaces = line.len() - line.trim_start_matches(' ').len();
    &line[spaces.min(indent)..]
}

/// Extract the fenced blocks tagged with one of `languages`.
///
/// Matching uses the first word of the info string and ignores case. An
/// unclosed fence runs to the end of the document.
pub fn runnable_blocks(markdown: &str, languages: &[String]) -> Vec<CodeBlock> {
    let mut blocks = Vec::new();
    let mut lines = markdown.lines().enumerate();

    while let Some((idx, line)) = lines.next() {
        let Some((fence, info)) = opening_fence(line) else {
            continue;
        };

        let language = info.split_whitespace().next().unwrap_or("").to_string();
        let mut body: Vec<&str> = Vec::new();

        for (_, inner) in lines.by_ref() {
            if closes(&fence, inner) {
                break;
            }
            body.push(dedent(inner, fence.indent));
        }

        let runnable = languages
            .iter()
            .any(|tag| tag.eq_ignore_ascii_case(&language));
        if runnable {
            let mut code = body.join("\n");
            if !body.is_empty() {
                code.push('\n');
            }
            blocks.push(CodeBlock {
                code,
                language,
                line: idx + 1,
            });
        }
    }

    blocks
}
