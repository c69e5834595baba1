use anyhow::Result;
use clap::Args;

use crate::config::Config;
use crate::sandbox::make_safe;

#[derive(Args)]
pub struct TransformArgs {
    /// Script to rewrite (`-` or omitted: stdin)
    pub file: Option<String>,

    /// Output format: text (default) or json
    #[arg(short, long, default_value = "text")]
    pub format: String,
}

pub async fn run(args: TransformArgs, config: &Config) -> Result<()> {
    let code = super::read_input(args.file.as_deref())?;
    let limits = config.execution_policy().safety_limits();
    let transformed = make_safe(&code, &limits);

    match args.format.as_str() {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&transformed)?);
        }
        _ => {
            // Summary on stderr so stdout stays a runnable script
            eprintln!(
                "hazards: unbounded_loop={}, delay={}; modified={}",
                transformed.hazards.unbounded_loop,
                transformed.hazards.delay,
                transformed.modified
            );
            print!("{}", transformed.code);
        }
    }

    Ok(())
}
