use anyhow::Result;
use clap::Args;
use serde::Serialize;
use std::path::Path;

use crate::config::Config;
use crate::document::{CodeBlock, runnable_blocks};
use crate::sandbox::{Execution, ExecutionOutcome, SandboxService, timeout_message};

#[derive(Args)]
pub struct RunArgs {
    /// Script or markdown file to execute (`-` or omitted: stdin)
    pub file: Option<String>,

    /// Treat input as markdown and run each runnable block
    /// (implied for .md and .markdown files)
    #[arg(short, long)]
    pub markdown: bool,

    /// Output format: text (default) or json
    #[arg(short, long, default_value = "text")]
    pub format: String,
}

/// One execution as reported to the terminal.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RunReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output: Option<String>,
    was_modified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    timed_out: bool,
    elapsed_ms: u128,
}

impl RunReport {
    fn from_execution(execution: Execution, line: Option<usize>) -> Self {
        let mut report = Self {
            line,
            output: None,
            was_modified: execution.modified,
            message: None,
            error: None,
            timed_out: false,
            elapsed_ms: execution.elapsed.as_millis(),
        };

        match execution.outcome {
            ExecutionOutcome::Success(result) => {
                report.output = Some(result.combined_output());
                report.message = execution.note;
            }
            ExecutionOutcome::TimedOut => {
                report.error = Some(timeout_message(&execution.hazards).to_string());
                report.timed_out = true;
            }
            ExecutionOutcome::RuntimeError(message) | ExecutionOutcome::ValidationError(message) => {
                report.error = Some(message);
            }
        }

        report
    }

    fn failed(&self) -> bool {
        self.error.is_some()
    }
}

pub async fn run(args: RunArgs, config: &Config) -> Result<()> {
    let input = super::read_input(args.file.as_deref())?;
    let markdown = args.markdown || args.file.as_deref().is_some_and(is_markdown_path);

    let service = SandboxService::new(config.execution_policy());

    let mut reports = Vec::new();
    if markdown {
        let blocks = runnable_blocks(&input, &config.sandbox.languages);
        if blocks.is_empty() {
            eprintln!(
                "No runnable blocks found (languages: {})",
                config.sandbox.languages.join(", ")
            );
            return Ok(());
        }
        for block in &blocks {
            if args.format != "json" {
                print_block_header(block);
            }
            let execution = service.execute(&block.code).await?;
            let report = RunReport::from_execution(execution, Some(block.line));
            if args.format != "json" {
                print_report(&report);
            }
            reports.push(report);
        }
    } else {
        let execution = service.execute(&input).await?;
        let report = RunReport::from_execution(execution, None);
        if args.format != "json" {
            print_report(&report);
        }
        reports.push(report);
    }

    if args.format == "json" {
        if markdown {
            println!("{}", serde_json::to_string_pretty(&reports)?);
        } else if let Some(report) = reports.first() {
            println!("{}", serde_json::to_string_pretty(report)?);
        }
    }

    let failed = reports.iter().filter(|r| r.failed()).count();
    if failed > 0 {
        anyhow::bail!("{} of {} executions failed", failed, reports.len());
    }

    Ok(())
}

fn is_markdown_path(path: &str) -> bool {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("md") || e.eq_ignore_ascii_case("markdown"))
}

fn print_block_header(block: &CodeBlock) {
    println!(
        "--- {} block at line {} ({} lines): {}",
        block.language,
        block.line,
        block.line_count(),
        block.preview()
    );
}

fn print_report(report: &RunReport) {
    if let Some(ref output) = report.output {
        print!("{}", output);
        if !output.is_empty() && !output.ends_with('\n') {
            println!();
        }
    }
    if let Some(ref message) = report.message {
        println!("[{}]", message);
    }
    if let Some(ref error) = report.error {
        eprintln!("{}", error);
    }
}
