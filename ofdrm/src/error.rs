use thiserror::Error;

use crate::http::HttpError;
use crate::wvd::WvdError;

/**
    Errors surfaced by the signing engine and the key acquisition pipeline.

    Each resolver returns the variant describing its own failure; the
    orchestrator decides which one reaches the caller.
*/
#[derive(Debug, Error)]
pub enum Error {
    // ── Startup ───────────────────────────────────────────────────────
    #[error("invalid configuration: {0}")]
    Config(String),

    // ── Signing ───────────────────────────────────────────────────────
    #[error("invalid auth identity: {0}")]
    Auth(String),
    #[error("no valid signing rules: {0}")]
    RulesUnavailable(String),

    // ── Key acquisition ───────────────────────────────────────────────
    #[error("manifest error: {0}")]
    Manifest(String),
    #[error("license exchange failed: {0}")]
    License(String),
    #[error("relay attempts exhausted: {0}")]
    RelayExhausted(String),
    #[error("device identity unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("operation cancelled")]
    Cancelled,

    // ── Wrapped ───────────────────────────────────────────────────────
    #[error(transparent)]
    Wvd(#[from] WvdError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /**
        Lifts a transport error into the caller's error kind, keeping
        cancellation distinct so fallback chains can stop on it.
    */
    pub(crate) fn from_http(err: HttpError, wrap: impl FnOnce(String) -> Error) -> Error {
        match err {
            HttpError::Cancelled => Error::Cancelled,
            other => wrap(other.to_string()),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
