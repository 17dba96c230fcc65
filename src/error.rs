use crate::config::ConfigError;

/// Error type used across the translation core.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Markup parse error: {0}")]
    MarkupParse(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Request cancelled")]
    Cancelled,
}

/// Broad error category the host maps onto its own status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    InvalidRequest,
    ClientClosed,
    ServerError,
}

impl BridgeError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            BridgeError::InvalidRequest(_) => ErrorCategory::InvalidRequest,
            BridgeError::Cancelled => ErrorCategory::ClientClosed,
            BridgeError::Config(_) | BridgeError::MarkupParse(_) | BridgeError::Io(_) => {
                ErrorCategory::ServerError
            }
        }
    }

    /// Whether the host should report this error downstream at all.
    ///
    /// Cancelled requests have no one left to report to.
    #[must_use]
    pub fn is_reportable(&self) -> bool {
        !matches!(self, BridgeError::Cancelled)
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::InvalidRequest(err.to_string())
    }
}
