//! Maps a failure onto an [`ErrorKind`].
//!
//! Explicit error categories raised by adapters are honored before any
//! message inspection, so a deliberate content refusal is never mistaken for
//! a transient failure whose text happens to mention a timeout.

use crate::error::ErrorKind;
use crate::Error;
use regex::Regex;
use std::sync::LazyLock;

struct Rule {
    kind: ErrorKind,
    status_codes: &'static [u16],
    phrases: &'static [&'static str],
}

/// Message rules, first match wins.
const RULES: &[Rule] = &[
    Rule {
        kind: ErrorKind::RateLimited,
        status_codes: &[429],
        phrases: &[
            "too many requests",
            "rate limit",
            "rate_limit_exceeded",
            "quota exceeded",
            "throttled",
            "resource exhausted",
            "resource_exhausted",
        ],
    },
    Rule {
        kind: ErrorKind::NetworkTransient,
        status_codes: &[],
        phrases: &[
            "timeout",
            "timed out",
            "connection error",
            "connection refused",
            "connection reset",
            "network error",
            "temporary failure",
        ],
    },
    Rule {
        kind: ErrorKind::ServiceUnavailable,
        status_codes: &[502, 503, 504],
        phrases: &[
            "bad gateway",
            "service unavailable",
            "internal server error",
        ],
    },
    Rule {
        kind: ErrorKind::ContentRefused,
        status_codes: &[],
        phrases: &[
            "refusal",
            "prohibited",
            "blocked by policy",
            "moderation_blocked",
        ],
    },
    Rule {
        kind: ErrorKind::Unauthorized,
        status_codes: &[401, 403],
        phrases: &[
            "invalid api key",
            "authentication failed",
            "unauthorized",
            "forbidden",
        ],
    },
    Rule {
        kind: ErrorKind::InvalidRequest,
        status_codes: &[400, 404],
        phrases: &["invalid request", "bad request", "not found"],
    },
];

static STATUS_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[1-5][0-9]{2}\b").expect("valid regex"));

/// Stateless; classification depends only on the error value.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn classify(&self, error: &Error) -> ErrorKind {
        match error {
            Error::ContentRefused(_) => ErrorKind::ContentRefused,
            Error::ExtractionFailed(_) => ErrorKind::ExtractionFailed,
            Error::GarbledPayload(_) => ErrorKind::NetworkTransient,
            Error::InvalidRequest(_) | Error::Config(_) => ErrorKind::InvalidRequest,
            Error::RetriesExhausted { source, .. } => self.classify(source),
            Error::Http(e) if is_transport_failure(e) => ErrorKind::NetworkTransient,
            other => self.classify_message(&other.to_string()),
        }
    }

    /// Keyword classification of a free-form error message.
    pub fn classify_message(&self, message: &str) -> ErrorKind {
        let lowered = message.to_lowercase();
        let codes: Vec<u16> = STATUS_CODE
            .find_iter(&lowered)
            .filter_map(|m| m.as_str().parse().ok())
            .collect();

        RULES
            .iter()
            .find(|rule| {
                rule.status_codes.iter().any(|code| codes.contains(code))
                    || rule.phrases.iter().any(|phrase| lowered.contains(phrase))
            })
            .map(|rule| rule.kind)
            .unwrap_or(ErrorKind::Unknown)
    }
}

/// reqwest failures that never produced a status: refused or dropped
/// connections, timeouts and bodies cut off mid-read.
fn is_transport_failure(e: &reqwest::Error) -> bool {
    e.status().is_none()
        && (e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() || e.is_decode())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(error: Error) -> ErrorKind {
        ErrorClassifier.classify(&error)
    }

    fn api(status: u16, body: &str) -> Error {
        Error::Api {
            provider: "test",
            status,
            body: body.to_string(),
        }
    }

    #[test]
    fn test_rate_limit_indicators() {
        assert_eq!(classify(api(429, "slow down")), ErrorKind::RateLimited);
        let classifier = ErrorClassifier;
        assert_eq!(
            classifier.classify_message("Quota exceeded for project"),
            ErrorKind::RateLimited
        );
        assert_eq!(classifier.classify_message("request throttled"), ErrorKind::RateLimited);
    }

    #[test]
    fn test_network_indicators() {
        let classifier = ErrorClassifier;
        assert_eq!(
            classifier.classify_message("operation timed out"),
            ErrorKind::NetworkTransient
        );
        assert_eq!(
            classifier.classify_message("Connection error while reading body"),
            ErrorKind::NetworkTransient
        );
        assert_eq!(
            classify(Error::GarbledPayload("stream ended early".to_string())),
            ErrorKind::NetworkTransient
        );
    }

    #[test]
    fn test_gateway_errors_are_service_unavailable() {
        assert_eq!(classify(api(502, "upstream")), ErrorKind::ServiceUnavailable);
        assert_eq!(classify(api(503, "")), ErrorKind::ServiceUnavailable);
        assert_eq!(
            ErrorClassifier.classify_message("Service Unavailable"),
            ErrorKind::ServiceUnavailable
        );
    }

    #[test]
    fn test_terminal_client_errors() {
        assert_eq!(classify(api(401, "nope")), ErrorKind::Unauthorized);
        assert_eq!(classify(api(403, "forbidden")), ErrorKind::Unauthorized);
        assert_eq!(
            ErrorClassifier.classify_message("Invalid API key provided"),
            ErrorKind::Unauthorized
        );
        assert_eq!(classify(api(400, "missing field")), ErrorKind::InvalidRequest);
        assert_eq!(classify(api(404, "no such model")), ErrorKind::InvalidRequest);
    }

    #[test]
    fn test_content_refusal_overrides_transient_text() {
        let err =
            Error::ContentRefused("blocked; upstream said 503 timeout rate limit".to_string());
        assert_eq!(classify(err), ErrorKind::ContentRefused);
        assert!(!ErrorKind::ContentRefused.is_retryable());
    }

    #[test]
    fn test_explicit_categories() {
        assert_eq!(
            classify(Error::ExtractionFailed("no image".to_string())),
            ErrorKind::ExtractionFailed
        );
        assert_eq!(
            classify(Error::InvalidRequest("empty prompt".to_string())),
            ErrorKind::InvalidRequest
        );
    }

    #[test]
    fn test_exhausted_retries_keep_underlying_kind() {
        let err = Error::RetriesExhausted {
            attempts: 5,
            source: Box::new(api(429, "busy")),
        };
        assert_eq!(classify(err), ErrorKind::RateLimited);
    }

    #[test]
    fn test_status_codes_match_whole_numbers_only() {
        assert_eq!(
            ErrorClassifier.classify_message("waited 4290ms for id 15030"),
            ErrorKind::Unknown
        );
    }

    #[test]
    fn test_unknown_is_terminal_and_deterministic() {
        let message = "something odd happened";
        let first = ErrorClassifier.classify_message(message);
        let second = ErrorClassifier.classify_message(message);
        assert_eq!(first, ErrorKind::Unknown);
        assert_eq!(first, second);
        assert!(!first.is_retryable());
    }
}
