use std::time::Duration;

use crate::ids::SessionId;

/// Rejections raised while validating a session's configuration. Everything
/// else about a session fails asynchronously through events.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("project_id must not be empty")]
    EmptyProjectId,
    #[error("max_steps must be at least 1")]
    ZeroMaxSteps,
}

/// Failures from registry operations that address a session.
#[derive(Clone, Debug, thiserror::Error)]
pub enum RegistryError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),
}

/// Transport-level failures from a chat provider. Retry policy keys off the
/// variant: the first group is permanent, the second transient, and
/// `Malformed` is neither (the bytes arrived, we just could not read them).
#[derive(Clone, Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("context window exceeded: {0}")]
    ContextWindowExceeded(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("server error {status}: {body}")]
    ServerError { status: u16, body: String },
    #[error("provider overloaded")]
    Overloaded,
    #[error("network error: {0}")]
    Network(String),
    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl ProviderError {
    /// Maps an HTTP response status to the matching variant. Bodies ride
    /// along verbatim so the operator sees what the provider actually said.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            400 if mentions_context_overflow(&body) => Self::ContextWindowExceeded(body),
            400 => Self::InvalidRequest(body),
            401 | 403 => Self::AuthenticationFailed(body),
            429 => Self::RateLimited { retry_after: None },
            529 => Self::Overloaded,
            500..=599 => Self::ServerError { status, body },
            _ => Self::InvalidRequest(format!("unexpected status {status}: {body}")),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_)
                | Self::StreamInterrupted(_)
                | Self::RateLimited { .. }
                | Self::Overloaded
                | Self::ServerError { .. }
        )
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidRequest(_) | Self::AuthenticationFailed(_) | Self::ContextWindowExceeded(_)
        )
    }

    /// Server-dictated pause before the next attempt, when one was given.
    pub fn suggested_delay(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Stable snake_case label for log fields and event payloads.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::AuthenticationFailed(_) => "authentication_failed",
            Self::ContextWindowExceeded(_) => "context_window_exceeded",
            Self::InvalidRequest(_) => "invalid_request",
            Self::RateLimited { .. } => "rate_limited",
            Self::ServerError { .. } => "server_error",
            Self::Overloaded => "overloaded",
            Self::Network(_) => "network_error",
            Self::StreamInterrupted(_) => "stream_interrupted",
            Self::Malformed(_) => "malformed_response",
        }
    }
}

/// Providers signal context overflow as a generic 400; sniff the body for it.
fn mentions_context_overflow(body: &str) -> bool {
    body.contains("context") && body.contains("length")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_errors() -> Vec<(ProviderError, bool, bool)> {
        // (error, retryable, fatal)
        vec![
            (ProviderError::AuthenticationFailed("bad key".into()), false, true),
            (ProviderError::ContextWindowExceeded("too long".into()), false, true),
            (ProviderError::InvalidRequest("bad shape".into()), false, true),
            (ProviderError::RateLimited { retry_after: None }, true, false),
            (
                ProviderError::ServerError { status: 503, body: "down".into() },
                true,
                false,
            ),
            (ProviderError::Overloaded, true, false),
            (ProviderError::Network("connection reset".into()), true, false),
            (ProviderError::StreamInterrupted("mid-stream eof".into()), true, false),
            (ProviderError::Malformed("not json".into()), false, false),
        ]
    }

    #[test]
    fn every_variant_classifies_one_way() {
        for (err, retryable, fatal) in sample_errors() {
            assert_eq!(err.is_retryable(), retryable, "retryable: {err}");
            assert_eq!(err.is_fatal(), fatal, "fatal: {err}");
            assert!(!(err.is_retryable() && err.is_fatal()), "both: {err}");
        }
    }

    #[test]
    fn kind_labels_are_snake_case_and_distinct() {
        let mut seen = std::collections::HashSet::new();
        for (err, _, _) in sample_errors() {
            let kind = err.error_kind();
            assert!(kind.chars().all(|c| c.is_ascii_lowercase() || c == '_'));
            assert!(seen.insert(kind), "duplicate kind label: {kind}");
        }
    }

    #[test]
    fn status_mapping_covers_the_interesting_codes() {
        let cases: Vec<(u16, &str, &str)> = vec![
            (400, "bad request", "invalid_request"),
            (400, "maximum context length is 128000 tokens", "context_window_exceeded"),
            (401, "who are you", "authentication_failed"),
            (403, "forbidden", "authentication_failed"),
            (429, "slow down", "rate_limited"),
            (500, "oops", "server_error"),
            (502, "bad gateway", "server_error"),
            (529, "at capacity", "overloaded"),
            (302, "redirect?", "invalid_request"),
        ];
        for (status, body, expected) in cases {
            let err = ProviderError::from_status(status, body.into());
            assert_eq!(err.error_kind(), expected, "status {status}");
        }
    }

    #[test]
    fn retry_after_surfaces_only_from_rate_limits() {
        let limited = ProviderError::RateLimited {
            retry_after: Some(Duration::from_secs(12)),
        };
        assert_eq!(limited.suggested_delay(), Some(Duration::from_secs(12)));
        assert_eq!(ProviderError::Overloaded.suggested_delay(), None);
        assert_eq!(
            ProviderError::RateLimited { retry_after: None }.suggested_delay(),
            None
        );
    }

    #[test]
    fn config_and_registry_messages_name_the_problem() {
        assert_eq!(ConfigError::EmptyProjectId.to_string(), "project_id must not be empty");
        assert_eq!(ConfigError::ZeroMaxSteps.to_string(), "max_steps must be at least 1");

        let missing = RegistryError::SessionNotFound(SessionId::from_raw("sess_gone"));
        assert!(missing.to_string().contains("sess_gone"));

        let wrapped = RegistryError::from(ConfigError::EmptyProjectId);
        assert!(matches!(wrapped, RegistryError::Config(_)));
    }
}
