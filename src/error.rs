use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransubError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Config key not found: {0}")]
    KeyNotFound(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Invalid LLM response: {0}")]
    InvalidResponse(String),

    #[error("Alignment failed: {0}")]
    Alignment(String),

    #[error("Job cancelled")]
    Cancelled,

    #[error("Job conflict: {0}")]
    JobConflict(String),

    #[error("Media processing failed: {0}")]
    Media(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Job task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl TransubError {
    /// Whether an LLM call that failed with this error is worth repeating.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransubError::Api(msg) => {
                // Client errors other than rate limiting will fail the same way again.
                !(msg.contains("(4") && !msg.contains("(429"))
            }
            TransubError::InvalidResponse(_) | TransubError::Json(_) => true,
            TransubError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, TransubError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(TransubError::Api("Chat API error (500 Internal Server Error): boom".into())
            .is_retryable());
        assert!(TransubError::Api("Chat API error (429 Too Many Requests): slow".into())
            .is_retryable());
        assert!(!TransubError::Api("Chat API error (401 Unauthorized): nope".into())
            .is_retryable());
        assert!(TransubError::InvalidResponse("missing field".into()).is_retryable());
        assert!(!TransubError::Config("no key".into()).is_retryable());
        assert!(!TransubError::Cancelled.is_retryable());
    }
}
