use thiserror::Error;

/// Failures talking to the authorization server.
///
/// The type is `Clone` because a single failed evaluation is handed to every
/// caller that was waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("Authorization server unreachable: {0}")]
    AuthServerUnreachable(String),

    #[error("Client credentials rejected by the authorization server: {0}")]
    InvalidCredentials(String),

    #[error("Authorization server request timed out")]
    Timeout,

    #[error("Malformed authorization server response: {0}")]
    MalformedResponse(String),

    #[error("Authorization server error (status {status:?}): {message}")]
    AuthServerError {
        status: Option<u16>,
        message: String,
    },

    #[error("Evaluation aborted before producing a result")]
    EvaluationAborted,
}

impl AuthzError {
    /// Transient failures deny the current request but are not reported as
    /// server errors.
    pub fn is_transient(&self) -> bool {
        matches!(self, AuthzError::Timeout)
    }
}

impl From<reqwest::Error> for AuthzError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AuthzError::Timeout
        } else if err.is_decode() {
            AuthzError::MalformedResponse(err.to_string())
        } else if let Some(status) = err.status() {
            AuthzError::AuthServerError {
                status: Some(status.as_u16()),
                message: err.to_string(),
            }
        } else {
            AuthzError::AuthServerUnreachable(err.to_string())
        }
    }
}

impl From<serde_json::Error> for AuthzError {
    fn from(err: serde_json::Error) -> Self {
        AuthzError::MalformedResponse(err.to_string())
    }
}
