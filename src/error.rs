//! Error types shared across the pipeline.
//!
//! Every stage returns one of these small, closed enums so the orchestrator
//! never has to look at vendor-specific failures. [`PortError`] is the only
//! error a capability port may produce; everything above it is expressed in
//! terms of what went wrong for the *stage*, not for the HTTP call.

use thiserror::Error;

/// Failure of a call into a capability port (text or image generation).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PortError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("server error (status {status}): {message}")]
    Server { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("request rejected (status {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("content rejected by provider: {0}")]
    ContentRejected(String),

    #[error("port not configured: {0}")]
    Unconfigured(String),
}

impl PortError {
    /// Whether retrying the same request later has a reasonable chance to succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PortError::RateLimited(_)
                | PortError::Timeout(_)
                | PortError::Server { .. }
                | PortError::Transport(_)
        )
    }
}

impl From<reqwest::Error> for PortError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PortError::Timeout(err.to_string())
        } else if err.is_decode() {
            PortError::Malformed(err.to_string())
        } else {
            PortError::Transport(err.to_string())
        }
    }
}

/// Every repair tier of the structured-output extractor failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("unparseable {shape} response: {head_tail}")]
    Unparseable { shape: String, head_tail: String },

    #[error("{shape} response does not match the expected schema: {message}")]
    SchemaMismatch { shape: String, message: String },
}

impl ExtractionError {
    pub fn reason(&self) -> &'static str {
        match self {
            ExtractionError::Unparseable { .. } => "unparseable",
            ExtractionError::SchemaMismatch { .. } => "schema-mismatch",
        }
    }
}

/// Failure of a pipeline stage, with port and parse errors already folded in.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StageError {
    #[error("port call failed: {0}")]
    Port(#[from] PortError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error("no topics discovered")]
    NoTopics,

    #[error("no unique topics after filtering duplicates")]
    NoUniqueTopics,

    #[error("cancelled")]
    Cancelled,
}

/// The article assembler could not produce any draft at all.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AssemblyError {
    #[error("draft port failed on attempt {attempt}: {source}")]
    Draft { attempt: u32, source: PortError },

    #[error("draft port returned empty text")]
    Empty,

    #[error("cancelled")]
    Cancelled,
}

/// Persistence gateway failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialize(err.to_string())
    }
}

impl From<serde_yaml::Error> for StoreError {
    fn from(err: serde_yaml::Error) -> Self {
        StoreError::Serialize(err.to_string())
    }
}

/// Configuration could not be loaded or is inconsistent.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("could not parse config {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("missing environment variable {0}")]
    MissingEnv(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(PortError::RateLimited("slow down".into()).is_transient());
        assert!(PortError::Timeout("30s".into()).is_transient());
        assert!(
            PortError::Server {
                status: 502,
                message: "bad gateway".into()
            }
            .is_transient()
        );
        assert!(!PortError::Auth("bad key".into()).is_transient());
        assert!(!PortError::Malformed("no choices".into()).is_transient());
        assert!(!PortError::ContentRejected("policy".into()).is_transient());
    }

    #[test]
    fn test_stage_error_from_port() {
        let err: StageError = PortError::Timeout("deadline".into()).into();
        assert!(err.to_string().contains("deadline"));
    }
}
