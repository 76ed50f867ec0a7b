use chrono::{DateTime, Utc};
use sxd_xpath::{Context, Factory, Value};

use crate::error::{Error, Result};
use crate::http::{HttpClient, Response};
use crate::reference::DrmReference;
use crate::signer::RequestSigner;

const CENC_NAMESPACE: &str = "urn:mpeg:cenc:2013";
const PSSH_XPATH: &str = "//cenc:pssh";

/**
    Select the Widevine PSSH from a DASH manifest.

    The platform's manifests carry the Widevine box as the second
    `cenc:pssh` element; that position is relied on without checking the
    system id. Its text is returned trimmed.
*/
pub fn select_pssh(manifest: &str) -> Result<String> {
    let package = sxd_document::parser::parse(manifest)
        .map_err(|e| Error::Manifest(format!("failed to parse manifest XML: {e:?}")))?;
    let document = package.as_document();

    let xpath = Factory::new()
        .build(PSSH_XPATH)
        .map_err(|e| Error::Manifest(format!("invalid XPath '{PSSH_XPATH}': {e:?}")))?
        .ok_or_else(|| Error::Manifest(format!("XPath '{PSSH_XPATH}' is empty")))?;

    let mut context = Context::new();
    context.set_namespace("cenc", CENC_NAMESPACE);

    let value = xpath
        .evaluate(&context, document.root())
        .map_err(|e| Error::Manifest(format!("XPath evaluation failed: {e:?}")))?;

    let Value::Nodeset(nodes) = value else {
        return Err(Error::Manifest(format!("XPath '{PSSH_XPATH}' did not select nodes")));
    };

    let nodes = nodes.document_order();
    match nodes.get(1) {
        Some(node) => Ok(node.string_value().trim().to_string()),
        None => Err(Error::Manifest(format!(
            "expected at least 2 cenc:pssh elements, found {}",
            nodes.len()
        ))),
    }
}

/**
    Fetches protected manifests from the CDN.

    Requests carry only the unsigned header set with the CloudFront cookies;
    the CDN never sees a signature.
*/
#[derive(Debug, Clone)]
pub struct ManifestClient {
    http: HttpClient,
}

impl ManifestClient {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }

    async fn fetch(&self, reference: &DrmReference, signer: &RequestSigner) -> Result<Response> {
        let headers = signer.unsigned_headers(reference.cdn_headers());
        self.http
            .get(&reference.manifest_url, &headers)
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::from_http(e, Error::Manifest))
    }

    /// Base64 Widevine PSSH of the referenced manifest.
    pub async fn get_pssh(&self, reference: &DrmReference, signer: &RequestSigner) -> Result<String> {
        let response = self.fetch(reference, signer).await?;
        let pssh = select_pssh(&response.text())?;
        tracing::debug!(manifest = %reference.manifest_url, pssh = %pssh, "extracted PSSH");
        Ok(pssh)
    }

    /**
        `Last-Modified` of the referenced manifest. A missing or unparsable
        header yields the current time; a failed fetch is an error.
    */
    pub async fn last_modified(
        &self,
        reference: &DrmReference,
        signer: &RequestSigner,
    ) -> Result<DateTime<Utc>> {
        let response = self.fetch(reference, signer).await?;
        Ok(parse_last_modified(response.header("last-modified")))
    }
}

fn parse_last_modified(value: Option<&str>) -> DateTime<Utc> {
    value
        .and_then(|v| DateTime::parse_from_rfc2822(v.trim()).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn manifest(psshs: &[&str]) -> String {
        let protections: String = psshs
            .iter()
            .map(|p| {
                format!(
                    r#"<ContentProtection schemeIdUri="urn:uuid:x"><cenc:pssh>{p}</cenc:pssh></ContentProtection>"#
                )
            })
            .collect();
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" xmlns:cenc="urn:mpeg:cenc:2013">
  <Period><AdaptationSet>{protections}</AdaptationSet></Period>
</MPD>"#
        )
    }

    #[test]
    fn second_pssh_is_selected() {
        let xml = manifest(&["  first  ", "\n  AAAAW3Bzc2gAAAAA7e+LqXnWSs6jyCfc1R0h7QAAADsIARIQ  \n"]);
        assert_eq!(
            select_pssh(&xml).unwrap(),
            "AAAAW3Bzc2gAAAAA7e+LqXnWSs6jyCfc1R0h7QAAADsIARIQ"
        );
    }

    #[test]
    fn fewer_than_two_is_an_error() {
        assert!(matches!(select_pssh(&manifest(&[])), Err(Error::Manifest(_))));
        assert!(matches!(
            select_pssh(&manifest(&["only"])),
            Err(Error::Manifest(_))
        ));
    }

    #[test]
    fn malformed_xml() {
        assert!(matches!(select_pssh("<MPD"), Err(Error::Manifest(_))));
    }

    #[test]
    fn last_modified_header() {
        let parsed = parse_last_modified(Some("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(parsed, Utc.with_ymd_and_hms(2015, 10, 21, 7, 28, 0).unwrap());

        let before = Utc::now();
        assert!(parse_last_modified(None) >= before);
        assert!(parse_last_modified(Some("yesterday")) >= before);
    }
}
