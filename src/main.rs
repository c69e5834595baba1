use anyhow::Result;
use clap::Parser;

use mdexec::cli::{self, Cli, Commands};
use mdexec::config::Config;

fn main() -> Result<()> {
    let cli = Cli::parse();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(cli))
}

/// RUST_LOG wins, then --verbose, then `logging.level` from config.
fn init_logging(verbose: bool, config: Option<&Config>) {
    let level = if verbose {
        "debug".to_string()
    } else {
        config
            .map(|c| c.logging.level.clone())
            .unwrap_or_else(|| "info".to_string())
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if config.is_some_and(|c| c.logging.json) {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn async_main(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();

    // Config management must work even when the config itself is broken
    match cli.command {
        Commands::Config(args) => {
            init_logging(cli.verbose, None);
            return cli::config::run(args, config_path).await;
        }
        Commands::Paths => {
            init_logging(cli.verbose, None);
            return cli::paths::run(config_path);
        }
        _ => {}
    }

    let config = Config::load_with(config_path)?;
    init_logging(cli.verbose, Some(&config));

    match cli.command {
        Commands::Serve(args) => cli::serve::run(args, &config).await,
        Commands::Run(args) => cli::run::run(args, &config).await,
        Commands::Transform(args) => cli::transform::run(args, &config).await,
        Commands::Sandbox(args) => cli::sandbox::run(args, &config).await,
        Commands::Config(_) | Commands::Paths => Ok(()),
    }
}
