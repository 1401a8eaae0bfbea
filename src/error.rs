use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MangaUpError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML serialization error: {0}")]
    Toml(#[from] toml::ser::Error),

    #[error("Host not found: {0}")]
    HostNotFound(String),

    #[error("Host not ready: {0}")]
    HostNotReady(String),

    #[error("Publish error: {0}")]
    Publish(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Timed out waiting for job {0}")]
    JobTimeout(String),

    #[error("Job queue is closed")]
    QueueClosed,

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl MangaUpError {
    pub fn host_not_found(name: impl Into<String>) -> Self {
        Self::HostNotFound(name.into())
    }

    pub fn host_not_ready(reason: impl Into<String>) -> Self {
        Self::HostNotReady(reason.into())
    }

    pub fn publish(msg: impl Into<String>) -> Self {
        Self::Publish(msg.into())
    }

    pub fn job_not_found(job_id: impl ToString) -> Self {
        Self::JobNotFound(job_id.to_string())
    }

    pub fn job_timeout(job_id: impl ToString) -> Self {
        Self::JobTimeout(job_id.to_string())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, MangaUpError>;

/// Failure of a single upload attempt, classified for the retry policy.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum UploadError {
    /// Network failures, 5xx and 429 responses. Retried with backoff.
    #[error("{0}")]
    Transient(String),

    /// HTTP 429 with the wait the host asked for. Retried once that
    /// wait has passed, instead of after the backoff interval.
    #[error("{message}")]
    RateLimited { message: String, retry_after: Duration },

    /// Missing files, 4xx responses, malformed bodies. Never retried.
    #[error("{0}")]
    Permanent(String),
}

impl UploadError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    pub fn rate_limited(msg: impl Into<String>, retry_after: Duration) -> Self {
        Self::RateLimited {
            message: msg.into(),
            retry_after,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::RateLimited { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    /// Classify a status code returned by a host.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let msg = format!("HTTP {}: {}", status.as_u16(), body.trim());
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            Self::Transient(msg)
        } else {
            Self::Permanent(msg)
        }
    }
}

impl From<reqwest::Error> for UploadError {
    fn from(err: reqwest::Error) -> Self {
        let transient = err.is_timeout()
            || err.is_connect()
            || err.is_request()
            || err.status().map_or(false, |s| s.is_server_error() || s.as_u16() == 429);
        if transient {
            Self::Transient(err.to_string())
        } else {
            Self::Permanent(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn status_classification() {
        assert!(UploadError::from_status(StatusCode::BAD_GATEWAY, "").is_transient());
        assert!(UploadError::from_status(StatusCode::TOO_MANY_REQUESTS, "slow down").is_transient());
        assert!(!UploadError::from_status(StatusCode::BAD_REQUEST, "bad").is_transient());
        assert_eq!(
            UploadError::from_status(StatusCode::NOT_FOUND, " gone \n"),
            UploadError::Permanent("HTTP 404: gone".to_string())
        );
    }

    #[test]
    fn rate_limit_carries_its_wait() {
        let err = UploadError::rate_limited("Rate limited", Duration::from_secs(7));
        assert!(err.is_transient());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
        assert_eq!(err.to_string(), "Rate limited");
        assert_eq!(UploadError::transient("503").retry_after(), None);
    }
}
