//! Config command handlers.

use anyhow::{Context, Result};
use gptmd_core::config;

pub fn path() {
    let config_path = config::paths::config_path();
    println!("{}", config_path.display());
    if !config_path.exists() {
        eprintln!("(not created yet; run `gptmd config init`)");
    }
}

pub fn init() -> Result<()> {
    let config_path = config::paths::config_path();
    config::Config::init(&config_path)
        .with_context(|| format!("init config at {}", config_path.display()))?;
    println!("Created config at {}", config_path.display());
    Ok(())
}

pub fn generate() -> Result<()> {
    let toml = config::Config::generate()?;
    print!("{toml}");
    Ok(())
}
