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
    Internal,
}

impl ErrorCode {
    /// Maps a Frappe `exc_type` onto a coarse error code.
    pub fn from_exc_type(exc_type: &str) -> Self {
        match exc_type {
            "DoesNotExistError" => Self::NotFound,
            "PermissionError" => Self::Forbidden,
            "AuthenticationError" | "CSRFTokenError" | "SessionExpired" => Self::Unauthorized,
            "ValidationError"
            | "MandatoryError"
            | "LinkValidationError"
            | "DocstatusTransitionError"
            | "TimestampMismatchError"
            | "DuplicateEntryError"
            | "UniqueValidationError"
            | "InvalidStatusError"
            | "CannotChangeConstantError"
            | "UpdateAfterSubmitError" => Self::Validation,
            _ => Self::Internal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
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
}

/// Error body returned by the resource API on non-2xx responses.
///
/// `_server_messages` is a JSON-encoded array whose items are themselves JSON-encoded
/// objects carrying a `message` key.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerErrorEnvelope {
    #[serde(default)]
    pub exc_type: Option<String>,
    #[serde(default)]
    pub exception: Option<String>,
    #[serde(default, rename = "_server_messages")]
    pub server_messages: Option<String>,
    #[serde(default)]
    pub message: Option<Value>,
}

impl ServerErrorEnvelope {
    /// Parses a response body; `None` when it carries no recognizable error structure.
    pub fn parse(body: &str) -> Option<Self> {
        let envelope: Self = serde_json::from_str(body).ok()?;
        if envelope.exc_type.is_none()
            && envelope.exception.is_none()
            && envelope.server_messages.is_none()
            && envelope.message.is_none()
        {
            return None;
        }
        Some(envelope)
    }

    pub fn code(&self) -> ErrorCode {
        self.exc_type
            .as_deref()
            .map(ErrorCode::from_exc_type)
            .or_else(|| {
                self.exception
                    .as_deref()
                    .and_then(exception_class)
                    .map(ErrorCode::from_exc_type)
            })
            .unwrap_or(ErrorCode::Internal)
    }

    /// First human-readable message found in the envelope, with markup removed.
    pub fn user_message(&self) -> Option<String> {
        self.server_messages
            .as_deref()
            .and_then(first_server_message)
            .or_else(|| match &self.message {
                Some(Value::String(message)) => Some(message.clone()),
                Some(Value::Object(object)) => object
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                _ => None,
            })
            .or_else(|| self.exception.as_deref().map(exception_text))
            .map(|message| strip_markup(&message))
            .filter(|message| !message.is_empty())
    }

    pub fn into_api_error(self) -> Option<ApiError> {
        let message = self.user_message()?;
        Some(ApiError::new(self.code(), message))
    }
}

fn first_server_message(raw: &str) -> Option<String> {
    let items: Vec<String> = serde_json::from_str(raw).ok()?;
    items.iter().find_map(|item| {
        let message = match serde_json::from_str::<Value>(item) {
            Ok(Value::Object(object)) => object
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string),
            Ok(Value::String(text)) => Some(text),
            _ => Some(item.clone()),
        };
        message.filter(|message| !message.trim().is_empty())
    })
}

// "frappe.exceptions.ValidationError: Vehicle is mandatory" -> "ValidationError"
fn exception_class(exception: &str) -> Option<&str> {
    let head = exception.split(':').next()?.trim();
    head.rsplit('.').next().filter(|class| !class.is_empty())
}

fn exception_text(exception: &str) -> String {
    match exception.split_once(": ") {
        Some((_, text)) => text.to_string(),
        None => exception.to_string(),
    }
}

fn strip_markup(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_tag = false;
    for ch in input.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}
