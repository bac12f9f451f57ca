use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("Network error: {0}")]
    Transport(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("{message}")]
    Server { status: u16, message: String },

    #[error("Unexpected response: {0}")]
    Protocol(String),

    #[error("Failed to dispatch test job: {0}")]
    Dispatch(String),

    #[error("Test job failed: {0}")]
    JobFailure(String),

    #[error("Test job timed out")]
    JobTimeout,
}

/// Coarse failure class used to pick troubleshooting text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    DispatchError,
    NetworkError,
    TimeoutError,
    GenericError,
}

static DISPATCH_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)dispatch").unwrap());
static NETWORK_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)network|fetch|connection refused|unreachable").unwrap());
static TIMEOUT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)timeout|timed out").unwrap());

impl SetupError {
    pub fn class(&self) -> FailureClass {
        match self {
            SetupError::Dispatch(_) => FailureClass::DispatchError,
            SetupError::Transport(_) => FailureClass::NetworkError,
            SetupError::Timeout(_) | SetupError::JobTimeout => FailureClass::TimeoutError,
            // Server text is the only thing we don't tag ourselves.
            SetupError::Server { message, .. } => classify_message(message),
            SetupError::Protocol(_) | SetupError::JobFailure(_) => FailureClass::GenericError,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, SetupError::Timeout(_) | SetupError::JobTimeout)
    }
}

/// Classify free-form server text. Dispatch wins over timeout, timeout over network.
pub fn classify_message(message: &str) -> FailureClass {
    if DISPATCH_PATTERN.is_match(message) {
        FailureClass::DispatchError
    } else if TIMEOUT_PATTERN.is_match(message) {
        FailureClass::TimeoutError
    } else if NETWORK_PATTERN.is_match(message) {
        FailureClass::NetworkError
    } else {
        FailureClass::GenericError
    }
}

impl From<reqwest::Error> for SetupError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            SetupError::Protocol(e.to_string())
        } else {
            SetupError::Transport(e.to_string())
        }
    }
}
