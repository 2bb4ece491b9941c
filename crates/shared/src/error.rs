use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthorized,
    Forbidden,
    NotFound,
    Validation,
    RateLimited,
    Internal,
    Unknown,
}

impl ErrorCode {
    pub fn from_status(status: u16) -> Self {
        match status {
            400 | 422 => Self::Validation,
            401 => Self::Unauthorized,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            429 => Self::RateLimited,
            500..=599 => Self::Internal,
            _ => Self::Unknown,
        }
    }
}

/// Error body returned by the API, classified by HTTP status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{code:?}: {message}")]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Builds an error from a failed response. The server reports failures as
    /// `{"detail": "..."}`; field validation errors arrive as
    /// `{"field": ["..."]}` and are flattened.
    pub fn from_response(status: u16, body: &Value) -> Self {
        let code = ErrorCode::from_status(status);
        let message = match body {
            Value::Object(map) => match map.get("detail").and_then(Value::as_str) {
                Some(detail) => detail.to_string(),
                None => map
                    .iter()
                    .map(|(field, value)| format!("{field}: {}", flatten_detail(value)))
                    .collect::<Vec<_>>()
                    .join("; "),
            },
            Value::String(text) if !text.is_empty() => text.clone(),
            Value::Null => format!("HTTP {status}"),
            other => other.to_string(),
        };
        let message = if message.is_empty() {
            format!("HTTP {status}")
        } else {
            message
        };
        Self { code, message }
    }
}

fn flatten_detail(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Array(items) => items
            .iter()
            .map(flatten_detail)
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}
