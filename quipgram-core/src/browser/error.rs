use thiserror::Error;

pub type BrowserResult<T> = Result<T, BrowserError>;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("chromium launch failed: {0}")]
    Launch(String),
    #[error("cdp error: {0}")]
    Cdp(#[from] chromiumoxide::error::CdpError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("interaction with {} failed: {cause}", selector.as_deref().unwrap_or("page"))]
    Interaction {
        selector: Option<String>,
        cause: String,
    },
    #[error("element not found: {selector} (waited {waited_ms}ms)")]
    ElementNotFound { selector: String, waited_ms: u64 },
    #[error("no selector matched for {control}: tried {}", tried.join(", "))]
    AllSelectorsFailed { control: String, tried: Vec<String> },
    #[error("timeout waiting for {0}")]
    Timeout(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("session is closed")]
    SessionClosed,
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("profile error: {0}")]
    Profile(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl BrowserError {
    pub fn interaction(selector: impl Into<String>, cause: impl ToString) -> Self {
        BrowserError::Interaction {
            selector: Some(selector.into()),
            cause: cause.to_string(),
        }
    }

    pub fn page(cause: impl ToString) -> Self {
        BrowserError::Interaction {
            selector: None,
            cause: cause.to_string(),
        }
    }

    /// A single lookup or wait may succeed with another selector or a later
    /// attempt. Exhausting a whole fallback chain is final.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BrowserError::ElementNotFound { .. } | BrowserError::Timeout(_)
        )
    }

    pub fn selector(&self) -> Option<&str> {
        match self {
            BrowserError::Interaction { selector, .. } => selector.as_deref(),
            BrowserError::ElementNotFound { selector, .. } => Some(selector),
            _ => None,
        }
    }
}

impl From<tokio::task::JoinError> for BrowserError {
    fn from(err: tokio::task::JoinError) -> Self {
        BrowserError::Unexpected(err.to_string())
    }
}
