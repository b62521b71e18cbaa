/// Failures talking to the football data provider.
///
/// Always contained at the call site and treated as "no data".
#[derive(thiserror::Error, Debug)]
pub enum ProviderError {
    #[error("provider request failed for {endpoint}: {source}")]
    Http {
        endpoint: String,
        source: reqwest::Error,
    },

    #[error("provider returned {status} for {endpoint}: {body}")]
    Status {
        endpoint: String,
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("malformed provider payload from {endpoint}: {source}")]
    Decode {
        endpoint: String,
        source: reqwest::Error,
    },

    #[error("provider reported errors for {endpoint}: {message}")]
    Api { endpoint: String, message: String },
}

impl ProviderError {
    /// Client errors are not worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { .. } => true,
            Self::Status { status, .. } => {
                status.is_server_error() || *status == reqwest::StatusCode::TOO_MANY_REQUESTS
            }
            Self::Decode { .. } | Self::Api { .. } => false,
        }
    }
}

/// Failures crossing the chat-platform boundary.
#[derive(thiserror::Error, Debug)]
pub enum ChatError {
    /// Target message, thread or channel was deleted externally.
    #[error("chat target not found: {0}")]
    NotFound(String),

    #[error("chat request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("chat platform returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("invalid message handle: {0}")]
    InvalidHandle(String),
}

impl ChatError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
