mod keys;
mod pssh;
mod rules;
mod sign;
mod wvd;

use anyhow::{Context, Result};
use ofdrm::{AuthIdentity, Config, HttpClient, RequestSigner, RulesStore};

pub use self::keys::KeysCommand;
pub use self::pssh::PsshCommand;
pub use self::rules::RulesCommand;
pub use self::sign::SignCommand;
pub use self::wvd::WvdCommand;

/**
    HTTP client whose in-flight requests are cancelled on Ctrl-C.
*/
fn http_client(config: &Config) -> Result<HttpClient> {
    let http = HttpClient::new(config).context("failed to create HTTP client")?;
    let token = http.cancellation().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, cancelling requests");
            token.cancel();
        }
    });
    Ok(http)
}

async fn signer(config: &Config, http: &HttpClient, identity: AuthIdentity) -> Result<RequestSigner> {
    let rules = RulesStore::new(http.clone(), config.rules_dir())
        .load(&config.rules)
        .await
        .context("failed to load signing rules")?;
    RequestSigner::new(identity, rules, config.endpoint.clone()).context("invalid signing setup")
}
