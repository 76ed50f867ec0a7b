use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::cdm::{Cdm, KeyRole, LicenseKey};
use crate::device::Device;
use crate::error::{Error, Result};
use crate::http::HttpClient;
use crate::reference::DrmReference;
use crate::signer::RequestSigner;

/**
    Keep the keys usable for decryption: content keys when the license has
    any, otherwise everything that is not a signing key. An empty result is
    an error.
*/
pub fn filter_keys(keys: Vec<LicenseKey>) -> Result<Vec<LicenseKey>> {
    let (content, rest): (Vec<_>, Vec<_>) =
        keys.into_iter().partition(|k| k.role == KeyRole::Content);
    let usable = if content.is_empty() {
        rest.into_iter()
            .filter(|k| k.role != KeyRole::Signing)
            .collect()
    } else {
        content
    };
    if usable.is_empty() {
        return Err(Error::License("license carries no usable keys".to_string()));
    }
    Ok(usable)
}

/**
    Runs the Widevine license exchange against the platform's license
    endpoint with a local device.
*/
pub struct LicenseExchanger {
    http: HttpClient,
    cdm: Arc<dyn Cdm>,
}

impl LicenseExchanger {
    pub fn new(http: HttpClient, cdm: Arc<dyn Cdm>) -> Self {
        Self { http, cdm }
    }

    /**
        Obtain the usable keys for `reference`.

        The CDM session is opened before any request is sent, so an unusable
        device fails without network traffic. The service certificate and
        the license are both requested from the signed license endpoint.
    */
    pub async fn get_keys(
        &self,
        reference: &DrmReference,
        pssh: &str,
        device: &Device,
        signer: &RequestSigner,
    ) -> Result<Vec<LicenseKey>> {
        let mut session = self.cdm.open(device.wvd())?;
        let path = reference.license_path();

        let certificate = self
            .post_signed(signer, &path, self.cdm.service_certificate_request())
            .await?;
        session.set_service_certificate(&certificate)?;

        let pssh = BASE64
            .decode(pssh.trim())
            .map_err(|e| Error::License(format!("PSSH is not valid base64: {e}")))?;
        let challenge = session.license_challenge(&pssh)?;

        let license = self.post_signed(signer, &path, challenge).await?;
        let keys = filter_keys(session.parse_license(&license)?)?;
        tracing::debug!(count = keys.len(), media = %reference.media_id, "license keys decoded");
        Ok(keys)
    }

    /// Canonical `kid:key` of the first usable key.
    pub async fn get_key(
        &self,
        reference: &DrmReference,
        pssh: &str,
        device: &Device,
        signer: &RequestSigner,
    ) -> Result<String> {
        let keys = self.get_keys(reference, pssh, device, signer).await?;
        keys.first()
            .map(LicenseKey::to_string)
            .ok_or_else(|| Error::License("license carries no usable keys".to_string()))
    }

    async fn post_signed(&self, signer: &RequestSigner, path: &str, body: Vec<u8>) -> Result<Vec<u8>> {
        let url = signer.url(path)?;
        let headers = signer.signed_headers(path)?;
        let response = self
            .http
            .post(&url, &headers, body)
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::from_http(e, Error::License))?;
        Ok(response.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(kid: u8, role: KeyRole) -> LicenseKey {
        LicenseKey::new(vec![kid; 16], vec![0xab; 16], role)
    }

    #[test]
    fn content_keys_preferred() {
        let keys = filter_keys(vec![
            key(1, KeyRole::Signing),
            key(2, KeyRole::Other),
            key(3, KeyRole::Content),
        ])
        .unwrap();
        assert_eq!(keys, vec![key(3, KeyRole::Content)]);
    }

    #[test]
    fn non_signing_keys_otherwise() {
        let keys = filter_keys(vec![key(1, KeyRole::Signing), key(2, KeyRole::Other)]).unwrap();
        assert_eq!(keys, vec![key(2, KeyRole::Other)]);
    }

    #[test]
    fn only_signing_keys_is_an_error() {
        assert!(matches!(
            filter_keys(vec![key(1, KeyRole::Signing)]),
            Err(Error::License(_))
        ));
        assert!(filter_keys(Vec::new()).is_err());
    }

    #[test]
    fn canonical_rendering() {
        let key = LicenseKey::new(vec![0x0A; 2], vec![0xBC, 0x01], KeyRole::Content);
        assert_eq!(key.to_string(), "0a0a:bc01");
    }
}
