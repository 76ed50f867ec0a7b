use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use ofdrm::{AuthIdentity, Config, DrmOrchestrator, DrmReference, ResolveOptions, WidevineCdm};

/**
    Resolve the decryption key of a DRM reference.

    Prints one `kid:key` per line on stdout; with `--headers` the download
    headers follow as JSON.
*/
#[derive(Args)]
pub struct KeysCommand {
    /// Identity as `user_id:=.. || user_agent:=.. || x_bc:=.. || cookie:=..`.
    #[arg(short, long)]
    auth: AuthIdentity,

    /// `manifest,policy,signature,keyPairId,mediaId,postId`.
    reference: DrmReference,

    /// Only use the local device, never a relay.
    #[arg(long)]
    force_client: bool,

    /// Ignore cached secrets.
    #[arg(long)]
    no_cache: bool,

    /// Also print the headers needed to download segments.
    #[arg(long)]
    headers: bool,
}

impl KeysCommand {
    pub async fn run(self, config: &Config) -> Result<()> {
        let http = super::http_client(config)?;
        let signer = super::signer(config, &http, self.auth).await?;
        let orchestrator = DrmOrchestrator::new(config, http, signer, Arc::new(WidevineCdm::new()));

        let options = ResolveOptions {
            force_client_only: self.force_client,
            disable_cache: self.no_cache,
        };
        let secret = orchestrator
            .resolve(&self.reference, options)
            .await
            .with_context(|| format!("failed to resolve key for media {}", self.reference.media_id))?;

        for key in secret.keys() {
            println!("{key}");
        }
        if self.headers {
            println!("{}", serde_json::to_string_pretty(&secret.headers)?);
        }
        Ok(())
    }
}
