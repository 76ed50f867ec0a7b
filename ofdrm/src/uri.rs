use std::path::PathBuf;

use rand::seq::IndexedRandom;

use crate::http::{Headers, HttpClient};

/**
    A resource that can be fetched over HTTP, read from disk, or is
    already in memory.
*/
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Uri {
    Url(String),
    Path(PathBuf),
    Bytes(Vec<u8>),
}

impl Uri {
    /**
        Interpret a string: `http://` and `https://` prefixes are URLs,
        everything else is a filesystem path.
    */
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        if s.starts_with("http://") || s.starts_with("https://") {
            Uri::Url(s.to_string())
        } else {
            Uri::Path(PathBuf::from(s))
        }
    }

    /**
        Pick one entry of a comma-separated mirror list at random.
    */
    pub fn pick_mirror(list: &str) -> Option<Self> {
        let mirrors: Vec<&str> = list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        mirrors.choose(&mut rand::rng()).map(|s| Uri::parse(s))
    }

    pub fn describe(&self) -> String {
        match self {
            Uri::Url(url) => url.clone(),
            Uri::Path(path) => path.display().to_string(),
            Uri::Bytes(bytes) => format!("<{} bytes>", bytes.len()),
        }
    }

    /// Read the resource. Empty content counts as a failure.
    pub async fn read(&self, http: &HttpClient) -> Result<Vec<u8>, String> {
        let data = match self {
            Uri::Bytes(bytes) => bytes.clone(),
            Uri::Path(path) => tokio::fs::read(path)
                .await
                .map_err(|e| format!("read {}: {e}", path.display()))?,
            Uri::Url(url) => http
                .get(url, &Headers::new())
                .await
                .and_then(|r| r.error_for_status())
                .map_err(|e| e.to_string())?
                .body,
        };
        if data.is_empty() {
            return Err(format!("{} is empty", self.describe()));
        }
        Ok(data)
    }
}
