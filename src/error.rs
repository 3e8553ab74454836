use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("network error: {0}")]
    Network(String),

    #[error("channel error: {0}")]
    Channel(String),

    /// The message never left the client. `draft` is the text to put back in the input.
    #[error("send failed: {reason}")]
    SendFailure { draft: String, reason: String },

    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        SyncError::Network(e.to_string())
    }
}

impl SyncError {
    pub fn send_failure(draft: &str, reason: impl ToString) -> Self {
        SyncError::SendFailure {
            draft: draft.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Draft text to restore after a failed send.
    pub fn draft(&self) -> Option<&str> {
        match self {
            SyncError::SendFailure { draft, .. } => Some(draft),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
