use reqwest::StatusCode;
use thiserror::Error;

/// Failures of the generation/save service. Callers surface all of these the
/// same way; the variants exist so the log says what actually went wrong.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("http request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected http status {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("malformed service response: {0}")]
    MalformedResponse(#[from] serde_json::Error),
    #[error("invalid service configuration: {0}")]
    InvalidConfig(String),
}
