use thiserror::Error;

/// Errors surfaced by query execution.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// Connection-level failure reported by a non-HTTP transport.
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("giving up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<QueryError>,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Background work was requested outside a tokio runtime.
    #[error("no tokio runtime available to run the request")]
    NoRuntime,
}

impl QueryError {
    /// Whether repeating the same request may succeed.
    ///
    /// Connection failures, timeouts and 5xx answers are transient; every
    /// other 4xx and decoding problem is not.
    pub fn is_transient(&self) -> bool {
        match self {
            QueryError::Http(e) => {
                e.is_connect()
                    || e.is_timeout()
                    || e.is_request()
                    || e.status().map_or(false, |s| s.is_server_error())
            }
            QueryError::Connection(_) => true,
            QueryError::Status { status, .. } => (500..600).contains(status),
            _ => false,
        }
    }

    /// HTTP status of the failure, if the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            QueryError::Status { status, .. } => Some(*status),
            QueryError::Http(e) => e.status().map(|s| s.as_u16()),
            QueryError::RetriesExhausted { last, .. } => last.status(),
            _ => None,
        }
    }
}

pub type QueryResult<T> = Result<T, QueryError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("service '{0}' is already registered")]
    Duplicate(String),

    #[error("service '{0}' is not registered")]
    Missing(String),

    #[error("service '{id}' is not a {expected}")]
    TypeMismatch { id: String, expected: &'static str },
}
