pub mod config;
pub mod paths;
pub mod run;
pub mod sandbox;
pub mod serve;
pub mod transform;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "mdexec")]
#[command(author, version, about = "Run untrusted Python snippets from markdown documents under hard limits")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file
    #[arg(short, long, global = true, env = "MDEXEC_CONFIG")]
    pub config: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP execution service
    Serve(serve::ServeArgs),

    /// Execute a script, or the runnable blocks of a markdown document
    Run(run::RunArgs),

    /// Show how a script would be rewritten, without running it
    Transform(transform::TransformArgs),

    /// Interpreter probe and smoke tests
    Sandbox(sandbox::SandboxArgs),

    /// Configuration management
    Config(config::ConfigArgs),

    /// Show resolved XDG directory paths
    Paths,
}

/// Read a file argument, with `-` or no argument meaning stdin.
pub(crate) fn read_input(file: Option<&str>) -> anyhow::Result<String> {
    use anyhow::Context;
    use std::io::Read;

    match file {
        None | Some("-") => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read stdin")?;
            Ok(buf)
        }
        Some(path) => {
            let expanded = shellexpand::tilde(path);
            std::fs::read_to_string(&*expanded)
                .with_context(|| format!("Failed to read {}", path))
        }
    }
}
