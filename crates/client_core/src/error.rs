use shared::error::ApiError;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    Connect,
    /// The server answered with a non-success status.
    Status,
    /// The request could not be built (bad url, body encoding).
    Request,
    Other,
}

/// Failure reported by the transport collaborator.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub status: Option<u16>,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Timeout, message)
    }

    pub fn connect(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Connect, message)
    }

    pub fn from_api(status: u16, api: ApiError) -> Self {
        Self {
            kind: TransportErrorKind::Status,
            status: Some(status),
            message: api.message,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == Some(401)
    }

    pub fn is_not_found(&self) -> bool {
        self.status == Some(404)
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            TransportErrorKind::Timeout
        } else if err.is_connect() {
            TransportErrorKind::Connect
        } else if err.is_builder() {
            TransportErrorKind::Request
        } else if err.is_status() {
            TransportErrorKind::Status
        } else {
            TransportErrorKind::Other
        };
        Self {
            kind,
            status: err.status().map(|status| status.as_u16()),
            message: err.to_string(),
        }
    }
}

/// Outcome taxonomy of the client core.
///
/// `Superseded` is informational: nothing was sent because an identical
/// request is already in flight and will deliver its own result.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    #[error("request {key} superseded by an identical in-flight request")]
    Superseded { key: String },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("unexpected response shape for {operation}: {detail}")]
    ShapeMismatch {
        operation: &'static str,
        detail: String,
    },
}

impl ClientError {
    pub fn shape(operation: &'static str, detail: impl Into<String>) -> Self {
        Self::ShapeMismatch {
            operation,
            detail: detail.into(),
        }
    }

    pub fn is_superseded(&self) -> bool {
        matches!(self, Self::Superseded { .. })
    }
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;
