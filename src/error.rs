//! Error handling and custom error types
//!
//! Provides unified error handling across the crate using thiserror, plus the
//! [`ErrorKind`] taxonomy that drives retry decisions and caller-facing status.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Category of a generation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RateLimited,
    NetworkTransient,
    ServiceUnavailable,
    Unauthorized,
    InvalidRequest,
    ContentRefused,
    ExtractionFailed,
    Unknown,
}

impl ErrorKind {
    /// Only rate limiting, network hiccups and 5xx gateways are worth retrying.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimited | ErrorKind::NetworkTransient | ErrorKind::ServiceUnavailable
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::NetworkTransient => "network_transient",
            ErrorKind::ServiceUnavailable => "service_unavailable",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::ContentRefused => "content_refused",
            ErrorKind::ExtractionFailed => "extraction_failed",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One failed index carried by [`Error::AllFailed`].
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedFailure {
    pub index: usize,
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{provider} API error (status {status}): {body}")]
    Api {
        provider: &'static str,
        status: u16,
        body: String,
    },

    /// Raised deliberately by an adapter when the provider declined the prompt.
    #[error("Content refused by provider: {0}")]
    ContentRefused(String),

    #[error("No image found in provider response: {0}")]
    ExtractionFailed(String),

    /// Response body was truncated or corrupt in a way a fresh call may fix.
    #[error("Garbled provider payload: {0}")]
    GarbledPayload(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to load .env file: {0}")]
    EnvVar(#[from] dotenvy::Error),

    #[error("{source} (gave up after {attempts} attempts)")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    #[error("All {requested} image generations failed: {}", summarize(.failures))]
    AllFailed {
        requested: usize,
        failures: Vec<IndexedFailure>,
    },
}

fn summarize(failures: &[IndexedFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("#{} {}: {}", f.index, f.kind, f.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Whether this is the coordinator's "zero successes" escalation.
    pub fn is_aggregate_failure(&self) -> bool {
        matches!(self, Error::AllFailed { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(ErrorKind::RateLimited.is_retryable());
        assert!(ErrorKind::NetworkTransient.is_retryable());
        assert!(ErrorKind::ServiceUnavailable.is_retryable());
        assert!(!ErrorKind::ContentRefused.is_retryable());
        assert!(!ErrorKind::ExtractionFailed.is_retryable());
        assert!(!ErrorKind::Unknown.is_retryable());
    }

    #[test]
    fn test_error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::ContentRefused).unwrap();
        assert_eq!(json, "\"content_refused\"");
        assert_eq!(ErrorKind::RateLimited.to_string(), "rate_limited");
    }

    #[test]
    fn test_all_failed_message_lists_each_index() {
        let err = Error::AllFailed {
            requested: 2,
            failures: vec![
                IndexedFailure {
                    index: 1,
                    kind: ErrorKind::Unauthorized,
                    message: "bad key".to_string(),
                },
                IndexedFailure {
                    index: 2,
                    kind: ErrorKind::Unauthorized,
                    message: "bad key".to_string(),
                },
            ],
        };
        let text = err.to_string();
        assert!(text.starts_with("All 2 image generations failed"));
        assert!(text.contains("#1 unauthorized: bad key"));
        assert!(text.contains("#2 unauthorized"));
        assert!(err.is_aggregate_failure());
    }
}
