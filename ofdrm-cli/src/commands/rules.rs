use anyhow::{Context, Result};
use clap::Args;
use ofdrm::{Config, RulesStore};

/**
    Resolve the active signing rules and print them as JSON.
*/
#[derive(Args)]
pub struct RulesCommand {
    /// Use a valid cached rule set without fetching.
    #[arg(long)]
    prefer_cache: bool,
}

impl RulesCommand {
    pub async fn run(self, config: &Config) -> Result<()> {
        let http = super::http_client(config)?;
        let mut options = config.rules.clone();
        options.prefer_cache |= self.prefer_cache;

        let rules = RulesStore::new(http, config.rules_dir())
            .load(&options)
            .await
            .context("failed to load signing rules")?;

        println!("{}", serde_json::to_string_pretty(&rules)?);
        Ok(())
    }
}
