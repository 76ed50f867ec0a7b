use chrono::Utc;
use sha1::{Digest, Sha1};

use crate::auth::AuthIdentity;
use crate::config::ApiEndpoint;
use crate::error::{Error, Result};
use crate::http::Headers;
use crate::rules::SigningRules;

/**
    Produces the per-request signature headers for API calls.

    Holds an immutable identity and rule set; rotating either means building
    a new signer, so in-flight requests always see a consistent pair.
*/
#[derive(Debug, Clone)]
pub struct RequestSigner {
    identity: AuthIdentity,
    rules: SigningRules,
    endpoint: ApiEndpoint,
}

impl RequestSigner {
    /// Fails when the identity has blank fields or the rules are invalid.
    pub fn new(identity: AuthIdentity, rules: SigningRules, endpoint: ApiEndpoint) -> Result<Self> {
        identity.validate()?;
        rules.validate()?;
        Ok(Self {
            identity,
            rules,
            endpoint,
        })
    }

    pub fn identity(&self) -> &AuthIdentity {
        &self.identity
    }

    pub fn rules(&self) -> &SigningRules {
        &self.rules
    }

    pub fn endpoint(&self) -> &ApiEndpoint {
        &self.endpoint
    }

    /// Fully qualified URL for an API path.
    pub fn url(&self, path: &str) -> Result<String> {
        self.endpoint.url(path)
    }

    /// Signed headers for `path` at the current time.
    pub fn signed_headers(&self, path: &str) -> Result<Headers> {
        self.signed_headers_at(path, Utc::now().timestamp_millis())
    }

    /**
        Signed headers for `path` at a fixed timestamp (milliseconds since
        the Unix epoch).

        The path is prefixed with the API base path before hashing, so
        `/users/me` and `/api2/v2/users/me` sign identically. Pure: the same
        inputs always give the same headers.
    */
    pub fn signed_headers_at(&self, path: &str, timestamp_ms: i64) -> Result<Headers> {
        let path = self.endpoint.path(path)?;
        let sign = compute_sign(&self.rules, &self.identity.user_id, &path, timestamp_ms)?;
        let time = timestamp_ms.to_string();

        let headers = [
            ("accept", "application/json, text/plain"),
            ("app-token", self.rules.app_token.as_str()),
            ("cookie", self.identity.cookie.as_str()),
            ("sign", sign.as_str()),
            ("time", time.as_str()),
            ("user-id", self.identity.user_id.as_str()),
            ("user-agent", self.identity.user_agent.as_str()),
            ("x-bc", self.identity.x_bc.as_str()),
        ];
        Ok(headers
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect())
    }

    /**
        Browser-like headers for CDN requests that need no signature.

        A `Cookie` entry in `extra` is appended to the identity cookie rather
        than replacing it; any other entry overrides the base header of the
        same name. An empty cookie is dropped.
    */
    pub fn unsigned_headers(&self, mut extra: Headers) -> Headers {
        let mut cookie = self
            .identity
            .cookie
            .strip_prefix(';')
            .unwrap_or(&self.identity.cookie)
            .to_string();
        if let Some(more) = extra.remove("Cookie").filter(|c| !c.is_empty()) {
            let base = cookie.strip_suffix(';').unwrap_or(&cookie);
            let more = more.strip_prefix(';').unwrap_or(&more);
            cookie = format!("{base};{more}");
        }

        let mut headers = Headers::from([
            ("User-Agent".to_string(), self.identity.user_agent.clone()),
            ("Accept".to_string(), "*/*".to_string()),
            ("X-BC".to_string(), self.identity.x_bc.clone()),
            ("Cookie".to_string(), cookie),
        ]);
        headers.extend(extra);
        if headers.get("Cookie").is_some_and(String::is_empty) {
            headers.remove("Cookie");
        }
        headers
    }
}

/**
    `prefix:sha1hex:checksum:suffix` for one request.

    The hash covers `static_param`, the timestamp, the full URL path and the
    user id joined by newlines. The checksum adds the ASCII codes of the hash
    characters at each rule index to the rule constant and is rendered as
    signed lowercase hex (`-1f` for -31).
*/
pub(crate) fn compute_sign(
    rules: &SigningRules,
    user_id: &str,
    path: &str,
    timestamp_ms: i64,
) -> Result<String> {
    let time = timestamp_ms.to_string();
    let message = [
        rules.static_param.as_str(),
        time.as_str(),
        path,
        user_id,
    ]
    .join("\n");
    let hash = hex::encode(Sha1::digest(message.as_bytes()));

    let bytes = hash.as_bytes();
    let mut checksum = rules.checksum_constant;
    for &index in &rules.checksum_indexes {
        let byte = usize::try_from(index)
            .ok()
            .and_then(|i| bytes.get(i))
            .ok_or_else(|| {
                Error::RulesUnavailable(format!("checksum index {index} outside the hash"))
            })?;
        checksum = checksum
            .checked_add(i64::from(*byte))
            .ok_or_else(|| Error::RulesUnavailable("checksum overflows".to_string()))?;
    }

    let checksum = if checksum < 0 {
        format!("-{:x}", checksum.unsigned_abs())
    } else {
        format!("{checksum:x}")
    };

    Ok(format!("{}:{hash}:{checksum}:{}", rules.prefix, rules.suffix))
}
