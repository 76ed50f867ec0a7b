use serde::{Deserialize, Serialize};

use crate::config::RelayConfig;
use crate::error::{Error, Result};
use crate::http::{Headers, HttpClient};
use crate::reference::DrmReference;
use crate::signer::RequestSigner;

/// Always part of the relay rotation.
pub const DEFAULT_RELAY: &str = "https://cdrm-project.com/";
/// Community decrypt service used once every relay has failed.
pub const FALLBACK_RELAY: &str = "https://cdrm-project.com/api/decrypt";

#[derive(Debug, Serialize)]
struct RelayRequest<'a> {
    #[serde(rename = "PSSH")]
    pssh: &'a str,
    #[serde(rename = "License URL")]
    license_url: &'a str,
    /// Signed headers, as a JSON object in a string.
    #[serde(rename = "Headers")]
    headers: String,
    #[serde(rename = "JSON")]
    json: &'a str,
    #[serde(rename = "Cookies")]
    cookies: &'a str,
    #[serde(rename = "Data")]
    data: &'a str,
    #[serde(rename = "Proxy")]
    proxy: &'a str,
}

#[derive(Debug, Deserialize)]
struct RelayResponse {
    #[serde(rename = "Message", alias = "message")]
    message: Option<String>,
}

#[derive(Debug, Serialize)]
struct FallbackRequest<'a> {
    pssh: &'a str,
    licurl: &'a str,
    headers: String,
    cookies: &'a str,
    data: &'a str,
}

#[derive(Debug, Deserialize)]
struct FallbackResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: String,
}

/**
    Resolves keys through third-party decrypt relays, which run the license
    exchange with their own devices.

    Relays are tried round-robin, one request at a time, for
    `attempts_per_server × servers` attempts.
*/
#[derive(Debug, Clone)]
pub struct RemoteKeyResolver {
    http: HttpClient,
    servers: Vec<String>,
    attempts_per_server: usize,
    fallback: Option<String>,
}

impl RemoteKeyResolver {
    pub fn new(http: HttpClient, config: &RelayConfig) -> Self {
        let mut servers: Vec<String> = config
            .servers
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if !servers.iter().any(|s| s == DEFAULT_RELAY) {
            servers.push(DEFAULT_RELAY.to_string());
        }
        Self {
            http,
            servers,
            attempts_per_server: config.attempts_per_server.max(1),
            fallback: config.fallback.clone().filter(|s| !s.trim().is_empty()),
        }
    }

    pub fn servers(&self) -> &[String] {
        &self.servers
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    /// Key string from the relay rotation.
    pub async fn get_key(
        &self,
        reference: &DrmReference,
        pssh: &str,
        signer: &RequestSigner,
    ) -> Result<String> {
        let path = reference.license_path();
        let license_url = signer.url(&path)?;
        let attempts = self.attempts_per_server * self.servers.len();

        let mut last_error = String::new();
        for (attempt, server) in self.servers.iter().cycle().take(attempts).enumerate() {
            let request = RelayRequest {
                pssh,
                license_url: &license_url,
                headers: serde_json::to_string(&signer.signed_headers(&path)?)?,
                json: "",
                cookies: "",
                data: "",
                proxy: "",
            };
            match self.try_relay(server, &request).await {
                Ok(key) => {
                    tracing::info!(server = %server, attempt = attempt + 1, "relay returned key");
                    return Ok(key);
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    tracing::warn!(
                        server = %server,
                        attempt = attempt + 1,
                        attempts,
                        error = %e,
                        "relay attempt failed"
                    );
                    last_error = e.to_string();
                }
            }
        }

        Err(Error::RelayExhausted(format!(
            "{attempts} attempts failed, last: {last_error}"
        )))
    }

    async fn try_relay(&self, server: &str, request: &RelayRequest<'_>) -> Result<String> {
        let body = self.post_json(server, request).await?;
        if String::from_utf8_lossy(&body).to_lowercase().contains("error") {
            return Err(Error::RelayExhausted(format!(
                "relay reported an error: {}",
                String::from_utf8_lossy(&body).trim()
            )));
        }
        let response: RelayResponse = serde_json::from_slice(&body)?;
        response
            .message
            .map(|m| m.trim().to_string())
            .ok_or_else(|| Error::RelayExhausted("relay response has no message".to_string()))
    }

    /// Key string from the community fallback service.
    pub async fn get_key_fallback(
        &self,
        reference: &DrmReference,
        pssh: &str,
        signer: &RequestSigner,
    ) -> Result<String> {
        let Some(url) = &self.fallback else {
            return Err(Error::RelayExhausted(
                "no fallback relay configured".to_string(),
            ));
        };

        let path = reference.license_path();
        let license_url = signer.url(&path)?;
        let request = FallbackRequest {
            pssh,
            licurl: &license_url,
            headers: serde_json::to_string(&signer.signed_headers(&path)?)?,
            cookies: "",
            data: "",
        };

        let body = self.post_json(url, &request).await?;
        let response: FallbackResponse = serde_json::from_slice(&body)?;
        if !response.status.eq_ignore_ascii_case("success") {
            return Err(Error::RelayExhausted(format!(
                "fallback relay returned status {:?}: {}",
                response.status, response.message
            )));
        }
        Ok(response.message.trim().to_string())
    }

    async fn post_json(&self, url: &str, payload: &impl Serialize) -> Result<Vec<u8>> {
        let headers = Headers::from([(
            "Content-Type".to_string(),
            "application/json".to_string(),
        )]);
        let response = self
            .http
            .post(url, &headers, serde_json::to_vec(payload)?)
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::from_http(e, Error::RelayExhausted))?;
        Ok(response.body)
    }
}
