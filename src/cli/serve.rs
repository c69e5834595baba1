use anyhow::Result;
use clap::Args;

use crate::config::Config;
use crate::sandbox::detect_interpreter;
use crate::server::Server;

#[derive(Args)]
pub struct ServeArgs {
    /// Port to listen on (overrides config)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Address to bind (overrides config)
    #[arg(short, long)]
    pub bind: Option<String>,
}

pub async fn run(args: ServeArgs, config: &Config) -> Result<()> {
    let mut config = config.clone();
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }

    let probe = detect_interpreter(&config.sandbox.interpreter);
    if !probe.is_available() {
        tracing::warn!(
            "Interpreter '{}' not found on PATH; every execution will fail",
            config.sandbox.interpreter
        );
    }

    let server = Server::new(&config)?;
    server.run().await
}
