use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use ofdrm::Config;
use tracing_subscriber::EnvFilter;

use crate::commands::{KeysCommand, PsshCommand, RulesCommand, SignCommand, WvdCommand};

/**
    Request signing and Widevine key acquisition tool.
*/
#[derive(Parser)]
#[command(name = "ofdrm")]
pub struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

/// Options shared by every subcommand.
#[derive(Args)]
pub struct GlobalArgs {
    /// YAML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory for cached rules, devices and secrets.
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Upstream proxy for every request (http, https or socks5 URL).
    #[arg(long, global = true)]
    proxy: Option<String>,

    /// Verbose logging, including API response bodies.
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Compose and check WVD device containers.
    Wvd(WvdCommand),
    /// Resolve and print the active signing rules.
    Rules(RulesCommand),
    /// Print signed headers for an API path.
    Sign(SignCommand),
    /// Print the Widevine PSSH of a DRM reference.
    Pssh(PsshCommand),
    /// Resolve the decryption key of a DRM reference.
    Keys(KeysCommand),
}

impl GlobalArgs {
    /// Configuration file (or defaults) with command-line overrides applied.
    pub fn config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => Config::default(),
        };
        if let Some(dir) = &self.cache_dir {
            config.cache_dir = dir.clone();
        }
        if let Some(proxy) = &self.proxy {
            config.proxy = Some(proxy.clone());
        }
        config.debug |= self.debug;
        Ok(config)
    }
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let config = self.global.config()?;
        init_logging(config.debug);

        match self.command {
            Command::Wvd(cmd) => cmd.run(),
            Command::Rules(cmd) => cmd.run(&config).await,
            Command::Sign(cmd) => cmd.run(&config).await,
            Command::Pssh(cmd) => cmd.run(&config).await,
            Command::Keys(cmd) => cmd.run(&config).await,
        }
    }
}

fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
