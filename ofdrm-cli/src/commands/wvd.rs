use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use ofdrm::WidevineCdm;

const DEFAULT_OUTPUT: &str = "wvd_client";

/**
    WVD device container commands.
*/
#[derive(Args)]
pub struct WvdCommand {
    #[command(subcommand)]
    command: WvdSubcommand,
}

#[derive(Subcommand)]
enum WvdSubcommand {
    Compose(ComposeCommand),
    Check(CheckCommand),
}

impl WvdCommand {
    pub fn run(self) -> Result<()> {
        match self.command {
            WvdSubcommand::Compose(cmd) => cmd.run(),
            WvdSubcommand::Check(cmd) => cmd.run(),
        }
    }
}

/**
    Build a WVD container from a client id blob and an RSA private key.
*/
#[derive(Args)]
pub struct ComposeCommand {
    /// ClientIdentification blob file.
    #[arg(short, long)]
    client_id: PathBuf,

    /// RSA private key file (PEM or DER, PKCS#1 or PKCS#8).
    #[arg(short = 'k', long)]
    private_key: PathBuf,

    /// Output file. Defaults to `wvd_client` next to the client id file.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

impl ComposeCommand {
    pub fn run(self) -> Result<()> {
        let client_id = std::fs::read(&self.client_id)
            .with_context(|| format!("failed to read {}", self.client_id.display()))?;
        let private_key = std::fs::read(&self.private_key)
            .with_context(|| format!("failed to read {}", self.private_key.display()))?;

        let wvd = ofdrm::device::compose(&WidevineCdm::new(), &client_id, &private_key)
            .context("failed to compose device")?;

        let output = self
            .output
            .unwrap_or_else(|| default_output(&self.client_id));
        std::fs::write(&output, &wvd)
            .with_context(|| format!("failed to write {}", output.display()))?;

        eprintln!("Created {} ({} bytes)", output.display(), wvd.len());
        Ok(())
    }
}

fn default_output(client_id: &Path) -> PathBuf {
    client_id
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(DEFAULT_OUTPUT)
}

/**
    Check that a WVD file is usable by the CDM.
*/
#[derive(Args)]
pub struct CheckCommand {
    /// WVD file.
    path: PathBuf,
}

impl CheckCommand {
    pub fn run(self) -> Result<()> {
        let data = std::fs::read(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        let parts = ofdrm::wvd::decode(&data).context("not a WVD container")?;

        println!("Version:         {}", parts.header.version);
        println!("Device Type:     {}", parts.header.device_type);
        println!("Security Level:  {}", parts.header.security_level);
        println!("Private Key:     {} bytes", parts.private_key.len());
        println!("Client ID:       {} bytes", parts.client_id.len());

        ofdrm::device::validate(&WidevineCdm::new(), &data).context("device rejected by CDM")?;
        println!("Status:          ok");
        Ok(())
    }
}
