use thiserror::Error;

/// Represents errors that can occur while reading from the legacy Data API.
#[derive(Debug, Clone, Error)]
pub enum LegacySourceError {
    /// Timeouts, connection resets and 5xx answers. Worth retrying.
    #[error("Transient legacy API error: {0}")]
    Transient(String),

    #[error("Legacy API rejected the token (status {0})")]
    Unauthorized(u16),

    #[error("Legacy API returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to decode legacy API response: {0}")]
    Decode(String),

    #[error("Invalid legacy API configuration: {0}")]
    Config(String),
}

impl LegacySourceError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Classifies an HTTP status that is not a success.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        match status {
            401 | 403 => Self::Unauthorized(status),
            408 | 429 | 500..=599 => Self::Transient(format!("status {}: {}", status, body.into())),
            _ => Self::Status {
                status,
                body: body.into(),
            },
        }
    }
}

impl From<reqwest::Error> for LegacySourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            Self::Transient(err.to_string())
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            Self::from_status(status.as_u16(), err.to_string())
        } else {
            Self::Transient(err.to_string())
        }
    }
}
