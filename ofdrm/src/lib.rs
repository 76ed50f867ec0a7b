mod cache;
mod error;
mod fallback;
mod http;
mod uri;

pub mod auth;
pub mod cdm;
pub mod config;
pub mod device;
pub mod license;
pub mod manifest;
pub mod orchestrator;
pub mod reference;
pub mod relay;
pub mod rules;
pub mod secrets;
pub mod signer;
pub mod wvd;

pub use self::auth::AuthIdentity;
pub use self::cdm::{Cdm, CdmSession, KeyRole, LicenseKey};
pub use self::config::{ApiEndpoint, Config, RelayConfig, RulesConfig};
pub use self::device::{Device, DeviceIdentity, DeviceOptions, DeviceSources, DeviceStore};
pub use self::error::{Error, Result};
pub use self::fallback::{Failure, Strategy, first_success};
pub use self::http::{Headers, HttpClient, HttpError, Response};
pub use self::license::LicenseExchanger;
pub use self::manifest::ManifestClient;
pub use self::orchestrator::{DrmOrchestrator, ResolveOptions};
pub use self::reference::DrmReference;
pub use self::relay::RemoteKeyResolver;
pub use self::rules::{RulesStore, SigningRules};
pub use self::secrets::{DecryptedSecret, SecretCookies, SecretsCache};
pub use self::signer::RequestSigner;
pub use self::uri::Uri;
pub use self::wvd::WvdError;

#[cfg(feature = "widevine")]
pub use self::cdm::WidevineCdm;

// Re-exported so callers can share a token with the engine.
pub use tokio_util::sync::CancellationToken;
