//! CLI subcommand: `mdexec paths`
//!
//! Prints all resolved XDG-compliant paths for debugging and scripting.

use anyhow::Result;

use crate::config::Config;
use crate::paths::Paths;

pub fn run(config_path: Option<&str>) -> Result<()> {
    let paths = Paths::resolve()?;

    println!("mdexec Paths (XDG Base Directory)");
    println!("==================================");
    println!();
    println!("Config:     {}", paths.config_dir.display());
    match config_path {
        Some(p) => println!("  config file:    {} (--config)", p),
        None => println!("  config file:    {}", paths.config_file().display()),
    }
    println!();
    println!("State:      {}", paths.state_dir.display());
    println!("  logs:           {}", paths.logs_dir().display());
    println!();
    match paths.runtime_dir {
        Some(ref dir) => println!("Runtime:    {}", dir.display()),
        None => println!("Runtime:    (not available)"),
    }
    println!();

    // A scratch_dir set in config wins over the resolved default
    let scratch = Config::load_with(config_path)
        .map(|c| c.scratch_dir())
        .unwrap_or_else(|_| paths.scratch_dir.clone());
    println!("Scratch:    {}", scratch.display());

    Ok(())
}
