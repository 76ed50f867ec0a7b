use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::cookie_pairs;
use crate::cache;
use crate::error::Result;
use crate::http::Headers;

/**
    A resolved decryption key and the headers needed to download the
    encrypted segments it unlocks.
*/
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptedSecret {
    /// `kid:key`, one pair per line when there are several.
    pub decrypt_key: String,
    pub headers: Headers,
    pub timestamp: DateTime<Utc>,
}

/**
    Download headers split into the cookie and everything else.
*/
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecretCookies {
    pub cookies: BTreeMap<String, String>,
    pub raw_cookie: String,
    pub other_headers: Headers,
}

impl DecryptedSecret {
    pub fn new(decrypt_key: impl Into<String>, headers: Headers) -> Self {
        Self {
            decrypt_key: decrypt_key.into(),
            headers,
            timestamp: Utc::now(),
        }
    }

    /// Every `kid:key` pair carried by the secret.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.decrypt_key
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
    }

    pub fn cookies(&self) -> SecretCookies {
        let mut view = SecretCookies::default();
        for (name, value) in &self.headers {
            if name.eq_ignore_ascii_case("cookie") {
                view.raw_cookie = value.clone();
                view.cookies = cookie_pairs(value)
                    .filter(|(n, _)| !n.is_empty())
                    .map(|(n, v)| (n.to_string(), v.to_string()))
                    .collect();
            } else {
                view.other_headers.insert(name.clone(), value.clone());
            }
        }
        view
    }
}

/**
    Secrets on disk, one JSON file per manifest URL named by its MD5.

    Writes go through a rename so concurrent resolvers never see partial
    files; the last writer wins. Entries do not expire.
*/
#[derive(Debug, Clone)]
pub struct SecretsCache {
    dir: PathBuf,
}

impl SecretsCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, manifest_url: &str) -> PathBuf {
        self.dir.join(cache::key_for(manifest_url))
    }

    /// Unreadable or corrupt entries count as misses.
    pub fn get(&self, manifest_url: &str) -> Option<DecryptedSecret> {
        let path = self.path_for(manifest_url);
        let data = match cache::read(&path) {
            Ok(data) => data?,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read secret");
                return None;
            }
        };
        match serde_json::from_slice::<DecryptedSecret>(&data) {
            Ok(secret) if !secret.decrypt_key.trim().is_empty() => Some(secret),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "corrupt secret entry");
                None
            }
        }
    }

    pub fn put(&self, manifest_url: &str, secret: &DecryptedSecret) -> Result<()> {
        let data = serde_json::to_vec_pretty(secret)?;
        cache::write_atomic(&self.path_for(manifest_url), &data)?;
        Ok(())
    }

    /// Drop the entry for `manifest_url`, if any.
    pub fn remove(&self, manifest_url: &str) -> Result<()> {
        match std::fs::remove_file(self.path_for(manifest_url)) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}
