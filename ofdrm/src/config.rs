use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::device::DeviceSources;
use crate::error::{Error, Result};

/// Platform API origin.
pub const API_DOMAIN: &str = "https://onlyfans.com";
/// Path prefix every API route lives under.
pub const API_BASE_PATH: &str = "/api2/v2";

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RELAY_ATTEMPTS: usize = 30;

/**
    Domain and base path of the platform API.

    Both halves are validated once, when the endpoint is built, so path
    joining never has to re-check them.
*/
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawEndpoint", into = "RawEndpoint")]
pub struct ApiEndpoint {
    domain: String,
    base_path: String,
}

#[derive(Serialize, Deserialize)]
struct RawEndpoint {
    domain: String,
    base_path: String,
}

impl TryFrom<RawEndpoint> for ApiEndpoint {
    type Error = Error;

    fn try_from(raw: RawEndpoint) -> Result<Self> {
        ApiEndpoint::new(raw.domain, raw.base_path)
    }
}

impl From<ApiEndpoint> for RawEndpoint {
    fn from(endpoint: ApiEndpoint) -> Self {
        RawEndpoint {
            domain: endpoint.domain,
            base_path: endpoint.base_path,
        }
    }
}

impl ApiEndpoint {
    pub fn new(domain: impl Into<String>, base_path: impl Into<String>) -> Result<Self> {
        let domain = domain.into();
        let base_path = base_path.into();

        if !base_path.starts_with('/') {
            return Err(Error::Config(format!(
                "API base path must start with '/': {base_path}"
            )));
        }
        if base_path.ends_with('/') {
            return Err(Error::Config(format!(
                "API base path must not end with '/': {base_path}"
            )));
        }
        if !domain.starts_with("https://") && !is_loopback_http(&domain) {
            return Err(Error::Config(format!(
                "API domain must start with https://: {domain}"
            )));
        }
        if domain.ends_with('/') {
            return Err(Error::Config(format!(
                "API domain must not end with '/': {domain}"
            )));
        }

        Ok(Self { domain, base_path })
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /**
        Prefixes `path` with the base path unless it already carries it.
    */
    pub fn path(&self, path: &str) -> Result<String> {
        if !path.starts_with('/') {
            return Err(Error::Config(format!("URL path must start with '/': {path}")));
        }
        if path.starts_with(&self.base_path) {
            return Ok(path.to_string());
        }
        Ok(format!("{}{}", self.base_path, path))
    }

    /// Fully qualified URL for an API path.
    pub fn url(&self, path: &str) -> Result<String> {
        Ok(format!("{}{}", self.domain, self.path(path)?))
    }
}

/// `http://` on localhost, used by local test servers.
fn is_loopback_http(domain: &str) -> bool {
    let Some(authority) = domain.strip_prefix("http://") else {
        return false;
    };
    let host = match authority.find(']') {
        Some(end) => &authority[..=end],
        None => authority.split(':').next().unwrap_or(authority),
    };
    matches!(host, "localhost" | "127.0.0.1" | "[::1]")
}

impl Default for ApiEndpoint {
    fn default() -> Self {
        Self {
            domain: API_DOMAIN.to_string(),
            base_path: API_BASE_PATH.to_string(),
        }
    }
}

/// Where signing rules come from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    pub urls: Vec<String>,
    pub prefer_cache: bool,
}

/// Decrypt relay settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub servers: Vec<String>,
    /// Community relay tried once every relay server has failed.
    pub fallback: Option<String>,
    pub attempts_per_server: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            fallback: Some(crate::relay::FALLBACK_RELAY.to_string()),
            attempts_per_server: DEFAULT_RELAY_ATTEMPTS,
        }
    }
}

/**
    Engine configuration.

    Passed by reference into every component constructor; nothing reads
    process-wide toggles.
*/
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub endpoint: ApiEndpoint,
    pub cache_dir: PathBuf,
    pub rules: RulesConfig,
    pub relay: RelayConfig,
    pub device: DeviceSources,
    /// Upstream proxy for every outgoing request (http, https or socks5 URL).
    pub proxy: Option<String>,
    /// Logs response bodies of API calls at debug level.
    pub debug: bool,
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: ApiEndpoint::default(),
            cache_dir: PathBuf::from(".ofdrm"),
            rules: RulesConfig::default(),
            relay: RelayConfig::default(),
            device: DeviceSources::default(),
            proxy: None,
            debug: false,
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl Config {
    /**
        Load a YAML (or JSON, which is valid YAML) configuration file.
    */
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Directory holding the cached `rules` file.
    pub fn rules_dir(&self) -> PathBuf {
        self.cache_dir.join("api")
    }

    /// Directory holding the cached device identity.
    pub fn device_dir(&self) -> PathBuf {
        self.cache_dir.join("drm")
    }

    pub fn secrets_dir(&self) -> PathBuf {
        self.cache_dir.join("secrets")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_is_prefixed_once() {
        let endpoint = ApiEndpoint::default();
        assert_eq!(endpoint.path("/users/me").unwrap(), "/api2/v2/users/me");
        assert_eq!(
            endpoint.path("/api2/v2/users/me").unwrap(),
            "/api2/v2/users/me"
        );
    }

    #[test]
    fn url_joins_domain() {
        let endpoint = ApiEndpoint::default();
        assert_eq!(
            endpoint.url("/users/me").unwrap(),
            "https://onlyfans.com/api2/v2/users/me"
        );
    }

    #[test]
    fn relative_path_rejected() {
        let endpoint = ApiEndpoint::default();
        assert!(matches!(endpoint.path("users/me"), Err(Error::Config(_))));
    }

    #[test]
    fn malformed_endpoints_rejected() {
        assert!(ApiEndpoint::new("https://example.com", "api/v2").is_err());
        assert!(ApiEndpoint::new("https://example.com", "/api/v2/").is_err());
        assert!(ApiEndpoint::new("http://example.com", "/api/v2").is_err());
        assert!(ApiEndpoint::new("https://example.com/", "/api/v2").is_err());
        assert!(ApiEndpoint::new("https://example.com", "/api/v2").is_ok());
    }

    #[test]
    fn plain_http_only_on_loopback() {
        assert!(ApiEndpoint::new("http://127.0.0.1:8080", "/api2/v2").is_ok());
        assert!(ApiEndpoint::new("http://localhost", "/api2/v2").is_ok());
        assert!(ApiEndpoint::new("http://[::1]:9000", "/api2/v2").is_ok());
        assert!(ApiEndpoint::new("http://127.0.0.1.example.com", "/api2/v2").is_err());
        assert!(ApiEndpoint::new("http://localhost.example:80", "/api2/v2").is_err());
    }

    #[test]
    fn endpoint_validated_on_deserialize() {
        let yaml = "endpoint:\n  domain: http://insecure.example\n  base_path: /api\n";
        assert!(serde_yaml::from_str::<Config>(yaml).is_err());
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let yaml = "cache_dir: /tmp/ofdrm\nrelay:\n  servers: [\"https://relay.example/api\"]\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.cache_dir, PathBuf::from("/tmp/ofdrm"));
        assert_eq!(config.relay.servers.len(), 1);
        assert_eq!(config.relay.attempts_per_server, 30);
        assert_eq!(config.endpoint, ApiEndpoint::default());
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }
}
