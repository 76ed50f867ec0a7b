use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::auth::AuthIdentity;
use crate::cdm::Cdm;
use crate::config::Config;
use crate::device::{DeviceOptions, DeviceStore};
use crate::error::{Error, Result};
use crate::fallback::{Strategy, first_success};
use crate::http::HttpClient;
use crate::license::LicenseExchanger;
use crate::manifest::ManifestClient;
use crate::reference::DrmReference;
use crate::relay::RemoteKeyResolver;
use crate::rules::RulesStore;
use crate::secrets::{DecryptedSecret, SecretsCache};
use crate::signer::RequestSigner;

/**
    Per-call switches for [`DrmOrchestrator::resolve`].
*/
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveOptions {
    /// Only use the local device; relays are never contacted.
    pub force_client_only: bool,
    /// Ignore cached secrets. A fresh result still replaces the cache entry.
    pub disable_cache: bool,
}

/**
    Resolves the decryption key for a DRM reference.

    Tries the local device first, then the relay rotation, then the
    fallback relay. The manifest is fetched once per call and every success
    is written to the secrets cache.
*/
pub struct DrmOrchestrator {
    signer: RequestSigner,
    manifests: ManifestClient,
    license: LicenseExchanger,
    devices: Arc<DeviceStore>,
    relay: RemoteKeyResolver,
    secrets: SecretsCache,
}

impl DrmOrchestrator {
    /// Wire up every component from `config` around an existing signer.
    pub fn new(config: &Config, http: HttpClient, signer: RequestSigner, cdm: Arc<dyn Cdm>) -> Self {
        let devices = DeviceStore::new(
            http.clone(),
            cdm.clone(),
            config.device_dir(),
            DeviceOptions::from(&config.device),
        );
        Self::with_devices(config, http, signer, cdm, Arc::new(devices))
    }

    /// Like [`Self::new`], sharing an already configured device store.
    pub fn with_devices(
        config: &Config,
        http: HttpClient,
        signer: RequestSigner,
        cdm: Arc<dyn Cdm>,
        devices: Arc<DeviceStore>,
    ) -> Self {
        Self {
            signer,
            manifests: ManifestClient::new(http.clone()),
            license: LicenseExchanger::new(http.clone(), cdm),
            devices,
            relay: RemoteKeyResolver::new(http, &config.relay),
            secrets: SecretsCache::new(config.secrets_dir()),
        }
    }

    /**
        Build the HTTP client, load signing rules and assemble an
        orchestrator for `identity`.
    */
    pub async fn bootstrap(config: &Config, identity: AuthIdentity, cdm: Arc<dyn Cdm>) -> Result<Self> {
        let http = HttpClient::new(config)?;
        let rules = RulesStore::new(http.clone(), config.rules_dir())
            .load(&config.rules)
            .await?;
        let signer = RequestSigner::new(identity, rules, config.endpoint.clone())?;
        Ok(Self::new(config, http, signer, cdm))
    }

    pub fn signer(&self) -> &RequestSigner {
        &self.signer
    }

    pub fn devices(&self) -> &DeviceStore {
        &self.devices
    }

    pub fn secrets(&self) -> &SecretsCache {
        &self.secrets
    }

    pub async fn get_pssh(&self, reference: &DrmReference) -> Result<String> {
        self.manifests.get_pssh(reference, &self.signer).await
    }

    pub async fn last_modified(&self, reference: &DrmReference) -> Result<DateTime<Utc>> {
        self.manifests.last_modified(reference, &self.signer).await
    }

    /**
        The decryption key for `reference`, with the headers needed to
        download its segments.

        The local exchange only runs when a device identity is available.
        When every strategy fails the first captured error is returned, which
        is the local device's when it ran. Cancellation stops the chain at
        once.
    */
    pub async fn resolve(
        &self,
        reference: &DrmReference,
        options: ResolveOptions,
    ) -> Result<DecryptedSecret> {
        let manifest_url = reference.manifest_url.as_str();
        if !options.disable_cache {
            if let Some(secret) = self.secrets.get(manifest_url) {
                tracing::debug!(manifest = %manifest_url, "secret served from cache");
                return Ok(secret);
            }
        }

        let pssh = self.get_pssh(reference).await?;

        let mut strategies = Vec::new();
        if self.devices.has_source() {
            strategies.push(Strategy::new("local", self.resolve_local(reference, &pssh)));
        } else {
            tracing::debug!("no device identity, skipping local license exchange");
        }
        if !options.force_client_only {
            strategies.push(Strategy::new(
                "relay",
                self.relay.get_key(reference, &pssh, &self.signer),
            ));
            if self.relay.has_fallback() {
                strategies.push(Strategy::new(
                    "fallback",
                    self.relay.get_key_fallback(reference, &pssh, &self.signer),
                ));
            }
        }

        let (source, key) = first_success(strategies).await.map_err(|failure| {
            failure.into_error(|| Error::DeviceUnavailable("no device identity configured".to_string()))
        })?;

        let secret = DecryptedSecret::new(key, self.signer.unsigned_headers(reference.cdn_headers()));
        if let Err(e) = self.secrets.put(manifest_url, &secret) {
            tracing::warn!(manifest = %manifest_url, error = %e, "failed to cache secret");
        }

        tracing::info!(source, media = %reference.media_id, "decryption key resolved");
        Ok(secret)
    }

    async fn resolve_local(&self, reference: &DrmReference, pssh: &str) -> Result<String> {
        let device = self.devices.get().await?;
        self.license
            .get_key(reference, pssh, &device, &self.signer)
            .await
    }
}
