use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::http::Headers;

/**
    Everything needed to fetch a protected manifest and request its license.

    Serialized either as JSON or as the comma-joined
    `manifest,policy,signature,keyPairId,mediaId,postId` string handed around
    by media extractors.
*/
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DrmReference {
    pub manifest_url: String,
    pub cloudfront_policy: String,
    pub cloudfront_signature: String,
    pub cloudfront_key_pair_id: String,
    pub media_id: String,
    pub post_id: String,
}

impl DrmReference {
    /// `Cookie` value granting access to the manifest on the CDN.
    pub fn cloudfront_cookie(&self) -> String {
        format!(
            "CloudFront-Policy={}; CloudFront-Signature={}; CloudFront-Key-Pair-Id={}",
            self.cloudfront_policy, self.cloudfront_signature, self.cloudfront_key_pair_id
        )
    }

    /// Extra headers carrying [`Self::cloudfront_cookie`].
    pub fn cdn_headers(&self) -> Headers {
        Headers::from([("Cookie".to_string(), self.cloudfront_cookie())])
    }

    /// License endpoint path, relative to the API base path.
    pub fn license_path(&self) -> String {
        format!(
            "/users/media/{}/drm/post/{}?type=widevine",
            self.media_id, self.post_id
        )
    }
}

impl FromStr for DrmReference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let fields: Vec<&str> = s.trim().split(',').map(str::trim).collect();
        let &[manifest_url, policy, signature, key_pair_id, media_id, post_id] = fields.as_slice() else {
            return Err(Error::Manifest(format!(
                "DRM reference needs 6 comma-separated fields, got {}",
                fields.len()
            )));
        };

        if !manifest_url.starts_with("http://") && !manifest_url.starts_with("https://") {
            return Err(Error::Manifest(format!(
                "manifest URL is not absolute: {manifest_url}"
            )));
        }
        for (name, id) in [("media id", media_id), ("post id", post_id)] {
            if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
                return Err(Error::Manifest(format!("{name} is not numeric: {id:?}")));
            }
        }

        Ok(Self {
            manifest_url: manifest_url.to_string(),
            cloudfront_policy: policy.to_string(),
            cloudfront_signature: signature.to_string(),
            cloudfront_key_pair_id: key_pair_id.to_string(),
            media_id: media_id.to_string(),
            post_id: post_id.to_string(),
        })
    }
}

impl fmt::Display for DrmReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{},{},{}",
            self.manifest_url,
            self.cloudfront_policy,
            self.cloudfront_signature,
            self.cloudfront_key_pair_id,
            self.media_id,
            self.post_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW: &str = "https://cdn3.example/files/manifest.mpd,pol,sig,KPID,3001,4002";

    #[test]
    fn parse_and_render() {
        let reference: DrmReference = RAW.parse().unwrap();
        assert_eq!(reference.manifest_url, "https://cdn3.example/files/manifest.mpd");
        assert_eq!(reference.cloudfront_key_pair_id, "KPID");
        assert_eq!(reference.media_id, "3001");
        assert_eq!(reference.post_id, "4002");
        assert_eq!(reference.to_string(), RAW);
    }

    #[test]
    fn wrong_field_count() {
        assert!(matches!(
            "https://a.example/m.mpd,p,s,k,1".parse::<DrmReference>(),
            Err(Error::Manifest(_))
        ));
    }

    #[test]
    fn non_numeric_ids() {
        assert!("https://a.example/m.mpd,p,s,k,abc,2".parse::<DrmReference>().is_err());
        assert!("https://a.example/m.mpd,p,s,k,1,".parse::<DrmReference>().is_err());
        assert!("a.example/m.mpd,p,s,k,1,2".parse::<DrmReference>().is_err());
    }

    #[test]
    fn cookie_and_path() {
        let reference: DrmReference = RAW.parse().unwrap();
        assert_eq!(
            reference.cloudfront_cookie(),
            "CloudFront-Policy=pol; CloudFront-Signature=sig; CloudFront-Key-Pair-Id=KPID"
        );
        assert_eq!(
            reference.license_path(),
            "/users/media/3001/drm/post/4002?type=widevine"
        );
    }
}
