use std::path::{Path, PathBuf};

use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};

use crate::cache;
use crate::config::RulesConfig;
use crate::error::{Error, Result};
use crate::http::HttpClient;
use crate::uri::Uri;

/// Always consulted in addition to the configured rule sources.
pub const FALLBACK_RULES_URL: &str =
    "https://raw.githubusercontent.com/deviint/onlyfans-dynamic-rules/main/dynamicRules.json";

/// Length of the lowercase hex SHA-1 digest the checksum indexes into.
pub const HASH_LEN: i64 = 40;

const CACHE_FILE: &str = "rules";

/**
    Versioned parameters of the request signature.

    Distributed externally and rotated by the platform; `revision` starts
    with a decimal timestamp (`<timestamp>-<suffix>`) used to pick the
    newest set among several sources.
*/
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawRules")]
pub struct SigningRules {
    pub app_token: String,
    pub checksum_constant: i64,
    pub checksum_indexes: Vec<i64>,
    pub prefix: String,
    pub static_param: String,
    pub suffix: String,
    pub revision: String,
}

/// On-the-wire shape, accepting the older `app-token` key and `start`/`end` aliases.
#[derive(Deserialize)]
struct RawRules {
    #[serde(default)]
    app_token: String,
    #[serde(default, rename = "app-token")]
    legacy_app_token: String,
    #[serde(default)]
    checksum_constant: i64,
    #[serde(default)]
    checksum_indexes: Vec<i64>,
    #[serde(default, alias = "start")]
    prefix: String,
    #[serde(default)]
    static_param: String,
    #[serde(default, alias = "end")]
    suffix: String,
    #[serde(default)]
    revision: String,
}

impl From<RawRules> for SigningRules {
    fn from(raw: RawRules) -> Self {
        let app_token = if raw.app_token.is_empty() {
            raw.legacy_app_token
        } else {
            raw.app_token
        };
        Self {
            app_token,
            checksum_constant: raw.checksum_constant,
            checksum_indexes: raw.checksum_indexes,
            prefix: raw.prefix,
            static_param: raw.static_param,
            suffix: raw.suffix,
            revision: raw.revision,
        }
    }
}

impl SigningRules {
    /**
        Check every field the signer relies on, including that each
        checksum index addresses a character of the 40-char hash.
    */
    pub fn validate(&self) -> Result<()> {
        let missing = [
            ("app_token", self.app_token.is_empty()),
            ("prefix", self.prefix.is_empty()),
            ("static_param", self.static_param.is_empty()),
            ("suffix", self.suffix.is_empty()),
            ("checksum_constant", self.checksum_constant == 0),
            ("checksum_indexes", self.checksum_indexes.is_empty()),
        ];
        if let Some((field, _)) = missing.iter().find(|(_, empty)| *empty) {
            return Err(Error::RulesUnavailable(format!("rules field {field} is empty")));
        }
        if let Some(index) = self
            .checksum_indexes
            .iter()
            .find(|i| !(0..HASH_LEN).contains(*i))
        {
            return Err(Error::RulesUnavailable(format!(
                "checksum index {index} outside 0..{HASH_LEN}"
            )));
        }
        // Hash characters are lowercase hex, so each adds at most b'f'.
        let max_added = i64::try_from(self.checksum_indexes.len())
            .ok()
            .and_then(|n| n.checked_mul(i64::from(b'f')));
        if max_added
            .and_then(|m| self.checksum_constant.checked_add(m))
            .is_none()
        {
            return Err(Error::RulesUnavailable(format!(
                "checksum constant {} overflows",
                self.checksum_constant
            )));
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Timestamp encoded in the leading segment of `revision`.
    pub fn revision_time(&self) -> Option<i64> {
        self.revision.split('-').next()?.trim().parse().ok()
    }
}

fn synthetic_revision() -> String {
    format!("{}-000000", Utc::now().format("%Y%m%d%H%M"))
}

/**
    Pick the valid rule set with the greatest revision timestamp.

    Invalid sets are skipped, valid sets without a revision are stamped with
    the current time, and sets whose revision does not start with a number
    are ignored. On equal timestamps the earlier candidate wins.
*/
pub fn select_latest(candidates: impl IntoIterator<Item = SigningRules>) -> Option<SigningRules> {
    let mut latest: Option<(i64, SigningRules)> = None;
    for mut rules in candidates {
        if !rules.is_valid() {
            continue;
        }
        if rules.revision.is_empty() {
            rules.revision = synthetic_revision();
        }
        let Some(time) = rules.revision_time() else {
            tracing::warn!(revision = %rules.revision, "ignoring rules with unparsable revision");
            continue;
        };
        if latest.as_ref().is_none_or(|(best, _)| time > *best) {
            latest = Some((time, rules));
        }
    }
    latest.map(|(_, rules)| rules)
}

/**
    Fetches, reconciles and caches signing rules.
*/
pub struct RulesStore {
    http: HttpClient,
    cache_dir: PathBuf,
}

impl RulesStore {
    pub fn new(http: HttpClient, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            http,
            cache_dir: cache_dir.into(),
        }
    }

    pub fn cache_path(&self) -> PathBuf {
        self.cache_dir.join(CACHE_FILE)
    }

    /**
        Resolve the active rule set.

        With `prefer_cache`, a valid cached set is returned without touching
        the network. Otherwise every source (plus [`FALLBACK_RULES_URL`]) is
        fetched concurrently while the cache is read, and the newest valid set
        among all of them wins. The winner is written back to the cache when
        its revision differs from the cached one.
    */
    pub async fn load(&self, options: &RulesConfig) -> Result<SigningRules> {
        if options.prefer_cache {
            if let Some(cached) = read_cached(&self.cache_path()).await.filter(|r| r.is_valid()) {
                tracing::debug!(revision = %cached.revision, "using cached rules");
                return Ok(cached);
            }
        }

        let mut sources = options.urls.clone();
        if !sources.iter().any(|s| s == FALLBACK_RULES_URL) {
            sources.push(FALLBACK_RULES_URL.to_string());
        }

        let cache_path = self.cache_path();
        let (fetched, cached) = tokio::join!(
            join_all(sources.iter().map(|source| self.fetch(source))),
            read_cached(&cache_path),
        );

        let network = fetched
            .into_iter()
            .zip(&sources)
            .filter_map(|(result, source)| match result {
                Ok(rules) => match rules.validate() {
                    Ok(()) => Some(rules),
                    Err(e) => {
                        tracing::warn!(source = %source, error = %e, "discarding invalid rules");
                        None
                    }
                },
                Err(e) => {
                    tracing::warn!(source = %source, error = %e, "failed to get rules");
                    None
                }
            })
            .collect::<Vec<_>>();

        let cached_revision = cached.as_ref().map(|r| r.revision.clone());
        let latest = select_latest(network.into_iter().chain(cached)).ok_or_else(|| {
            Error::RulesUnavailable("no source returned a valid rule set".to_string())
        })?;

        if cached_revision.as_deref() != Some(latest.revision.as_str()) {
            if let Err(e) = write_cached(&cache_path, &latest) {
                tracing::warn!(path = %cache_path.display(), error = %e, "failed to cache rules");
            }
        }

        tracing::info!(revision = %latest.revision, "signing rules loaded");
        Ok(latest)
    }

    async fn fetch(&self, source: &str) -> Result<SigningRules, String> {
        let data = Uri::parse(source).read(&self.http).await?;
        serde_json::from_slice(&data).map_err(|e| format!("parse rules: {e}"))
    }
}

async fn read_cached(path: &Path) -> Option<SigningRules> {
    let data = tokio::fs::read(path).await.ok()?;
    match serde_json::from_slice(&data) {
        Ok(rules) => Some(rules),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "corrupt rules cache");
            None
        }
    }
}

fn write_cached(path: &Path, rules: &SigningRules) -> Result<()> {
    let data = serde_json::to_vec(rules)?;
    cache::write_atomic(path, &data)?;
    Ok(())
}
