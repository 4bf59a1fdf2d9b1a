//! Error type for Kraken Futures API calls.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KrakenError {
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP Error {status}: {body}")]
    Status { status: u16, body: String },

    #[error("API Error: {0}")]
    Api(String),

    #[error("Unexpected response: {0}")]
    Decode(String),

    #[error("API secret is not valid base64")]
    InvalidSecret,

    #[error("Rate limit exceeded after {attempts} attempts")]
    RateLimited { attempts: u32 },
}

impl KrakenError {
    /// Transient failures worth another attempt with backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            KrakenError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            KrakenError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(
            self,
            KrakenError::RateLimited { .. } | KrakenError::Status { status: 429, .. }
        ) || matches!(self, KrakenError::Api(msg) if msg.contains("apiLimitExceeded"))
    }
}

impl From<serde_json::Error> for KrakenError {
    fn from(err: serde_json::Error) -> Self {
        KrakenError::Decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_retry_classification() {
        let throttled = KrakenError::Status {
            status: 429,
            body: String::new(),
        };
        let unavailable = KrakenError::Status {
            status: 503,
            body: String::new(),
        };
        let forbidden = KrakenError::Status {
            status: 403,
            body: "forbidden".to_string(),
        };

        assert!(throttled.is_retryable());
        assert!(throttled.is_rate_limit());
        assert!(unavailable.is_retryable());
        assert!(!forbidden.is_retryable());
        assert!(!KrakenError::InvalidSecret.is_retryable());
    }

    #[test]
    fn test_display_matches_dashboard_messages() {
        let err = KrakenError::Api("EAPI:Invalid key".to_string());
        assert_eq!(err.to_string(), "API Error: EAPI:Invalid key");

        let err = KrakenError::Status {
            status: 404,
            body: "not found".to_string(),
        };
        assert_eq!(err.to_string(), "HTTP Error 404: not found");
    }
}
