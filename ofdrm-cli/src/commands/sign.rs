use anyhow::Result;
use clap::Args;
use ofdrm::{AuthIdentity, Config};

/**
    Print the signed header set for an API path as JSON.
*/
#[derive(Args)]
pub struct SignCommand {
    /// Identity as `user_id:=.. || user_agent:=.. || x_bc:=.. || cookie:=..`.
    #[arg(short, long)]
    auth: AuthIdentity,

    /// API path, with or without the base path prefix.
    path: String,

    /// Sign for this Unix time in milliseconds instead of now.
    #[arg(long)]
    timestamp: Option<i64>,
}

impl SignCommand {
    pub async fn run(self, config: &Config) -> Result<()> {
        let http = super::http_client(config)?;
        let signer = super::signer(config, &http, self.auth).await?;

        let headers = match self.timestamp {
            Some(ts) => signer.signed_headers_at(&self.path, ts)?,
            None => signer.signed_headers(&self.path)?,
        };

        eprintln!("URL: {}", signer.url(&self.path)?);
        println!("{}", serde_json::to_string_pretty(&headers)?);
        Ok(())
    }
}
