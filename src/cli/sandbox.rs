use anyhow::Result;
use clap::{Args, Subcommand};
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::sandbox::{
    Deadlines, Execution, ExecutionOutcome, ExecutionPolicy, SandboxService, detect_interpreter,
};

#[derive(Args)]
pub struct SandboxArgs {
    #[command(subcommand)]
    pub command: SandboxCommands,
}

#[derive(Subcommand)]
pub enum SandboxCommands {
    /// Show interpreter probe and effective limits
    Status,

    /// Run smoke tests against the configured interpreter
    Test,
}

pub async fn run(args: SandboxArgs, config: &Config) -> Result<()> {
    match args.command {
        SandboxCommands::Status => run_status(config),
        SandboxCommands::Test => run_test(config).await,
    }
}

fn run_status(config: &Config) -> Result<()> {
    let probe = detect_interpreter(&config.sandbox.interpreter);
    let policy = config.execution_policy();

    println!("Sandbox Capabilities:");
    for line in probe.status_lines() {
        println!("{}", line);
    }
    println!();

    println!("Configuration:");
    println!("  Scratch dir:   {}", policy.scratch_dir.display());
    println!("  Watchdog:      {}s", policy.deadlines.watchdog().as_secs());
    println!("  Timeout:       {}s", policy.deadlines.outer().as_secs());
    println!("  Max code:      {} chars", policy.max_code_chars);
    println!("  Max output:    {} bytes", policy.max_output_bytes);
    println!(
        "  Rewrite:       {} (loop cap {}, sleep clamp {}s)",
        policy.rewrite, policy.loop_cap, policy.delay_clamp_secs
    );
    match policy.max_concurrent {
        0 => println!("  Concurrency:   unlimited"),
        n => println!("  Concurrency:   {}", n),
    }
    println!("  Languages:     {}", config.sandbox.languages.join(", "));

    Ok(())
}

/// Outcome of one smoke test.
enum Check {
    Pass(String),
    Fail(String),
}

fn output_of(execution: &Execution) -> Option<String> {
    match execution.outcome {
        ExecutionOutcome::Success(ref result) => Some(result.combined_output()),
        _ => None,
    }
}

fn describe(execution: &Execution) -> String {
    match execution.outcome {
        ExecutionOutcome::Success(ref result) => {
            let out: String = result.combined_output().chars().take(100).collect();
            format!("output={:?}", out)
        }
        ExecutionOutcome::TimedOut => "timed out".to_string(),
        ExecutionOutcome::RuntimeError(ref e) | ExecutionOutcome::ValidationError(ref e) => {
            e.clone()
        }
    }
}

async fn run_test(config: &Config) -> Result<()> {
    let probe = detect_interpreter(&config.sandbox.interpreter);
    if !probe.is_available() {
        println!(
            "Interpreter '{}' not found. Skipping smoke tests.",
            config.sandbox.interpreter
        );
        return Ok(());
    }

    let mut policy = config.execution_policy();
    // Smoke tests exercise the rewrite path regardless of config
    policy.rewrite = true;
    let loop_cap = policy.loop_cap as usize;
    let service = SandboxService::new(policy.clone());

    println!("Running sandbox smoke tests...");
    println!("  Interpreter: {}", policy.interpreter);
    println!("  Scratch:     {}", policy.scratch_dir.display());
    println!();

    let mut passed = 0;
    let mut failed = 0;
    let mut record = |label: &str, check: Check| {
        print!("  {:<38}", label);
        match check {
            Check::Pass(detail) => {
                println!("{}", detail);
                passed += 1;
            }
            Check::Fail(detail) => {
                println!("FAIL ({})", detail);
                failed += 1;
            }
        }
    };

    // Test 1: Plain output passes through untouched
    let execution = service.execute("print(\"hello\")").await?;
    let check = match output_of(&execution) {
        Some(out) if out == "hello\n" && !execution.modified => Check::Pass("ok".into()),
        _ => Check::Fail(describe(&execution)),
    };
    record("[1/5] Plain print:", check);

    // Test 2: Unbounded loop is capped
    let execution = service.execute("while True:\n    print(\"x\")").await?;
    let check = match output_of(&execution) {
        Some(out) if execution.modified && out.lines().filter(|l| *l == "x").count() == loop_cap => {
            Check::Pass(format!("{} iterations (ok)", loop_cap))
        }
        _ => Check::Fail(describe(&execution)),
    };
    record("[2/5] Unbounded loop capped:", check);

    // Test 3: Sleep inside a loop is clamped
    let start = Instant::now();
    let execution = service
        .execute("import time\nwhile True:\n    time.sleep(5)")
        .await?;
    let elapsed = start.elapsed();
    let check = match execution.outcome {
        ExecutionOutcome::Success(_) if execution.modified && elapsed < Duration::from_secs(5) => {
            Check::Pass(format!("finished in {:.2}s (ok)", elapsed.as_secs_f64()))
        }
        _ => Check::Fail(describe(&execution)),
    };
    record("[3/5] Sleep clamped:", check);

    // Test 4: Exceptions come back as output
    let execution = service.execute("raise ValueError(\"boom\")").await?;
    let check = match output_of(&execution) {
        Some(out) if out.starts_with("Error: ") && out.contains("ValueError: boom") => {
            Check::Pass("folded into output (ok)".into())
        }
        _ => Check::Fail(describe(&execution)),
    };
    record("[4/5] Stderr folded:", check);

    // Test 5: Outer deadline kills an unrewritten loop
    let mut strict = ExecutionPolicy {
        rewrite: false,
        ..policy
    };
    strict.deadlines = Deadlines::new(Duration::from_secs(1), Duration::from_secs(2))?;
    let strict_service = SandboxService::new(strict);
    let start = Instant::now();
    let execution = strict_service.execute("while True:\n    pass").await?;
    let elapsed = start.elapsed();
    let on_time = killed_on_time(elapsed, strict_service.policy().deadlines);
    let check = match execution.outcome {
        ExecutionOutcome::TimedOut if on_time => {
            Check::Pass(format!("killed after {:.1}s (ok)", elapsed.as_secs_f64()))
        }
        ExecutionOutcome::TimedOut => {
            Check::Fail(format!("killed after {:.1}s", elapsed.as_secs_f64()))
        }
        _ => Check::Fail(describe(&execution)),
    };
    record("[5/5] Timeout enforcement:", check);

    println!();
    if failed == 0 {
        println!("All {} tests passed.", passed);
    } else {
        println!("{} passed, {} failed.", passed, failed);
    }

    Ok(())
}

/// A timed-out run must have lasted at least the outer deadline, and not
/// much longer.
fn killed_on_time(elapsed: Duration, deadlines: Deadlines) -> bool {
    elapsed >= deadlines.outer() && elapsed < deadlines.outer() + Duration::from_secs(8)
}
