use anyhow::{Context, Result};
use clap::Args;
use ofdrm::{AuthIdentity, Config, DrmReference, ManifestClient};

/**
    Fetch a protected manifest and print its Widevine PSSH.
*/
#[derive(Args)]
pub struct PsshCommand {
    /// Identity as `user_id:=.. || user_agent:=.. || x_bc:=.. || cookie:=..`.
    #[arg(short, long)]
    auth: AuthIdentity,

    /// `manifest,policy,signature,keyPairId,mediaId,postId`.
    reference: DrmReference,

    /// Also print the manifest's Last-Modified time.
    #[arg(long)]
    last_modified: bool,
}

impl PsshCommand {
    pub async fn run(self, config: &Config) -> Result<()> {
        let http = super::http_client(config)?;
        let signer = super::signer(config, &http, self.auth).await?;
        let manifests = ManifestClient::new(http);

        let pssh = manifests
            .get_pssh(&self.reference, &signer)
            .await
            .context("failed to get PSSH")?;
        println!("{pssh}");

        if self.last_modified {
            let modified = manifests
                .last_modified(&self.reference, &signer)
                .await
                .context("failed to get Last-Modified")?;
            println!("{}", modified.to_rfc3339());
        }
        Ok(())
    }
}
