use shared::error::ApiError;
use thiserror::Error;

/// Message shown when the backend fails without a structured error body.
pub const SERVICE_UNAVAILABLE: &str = "service unavailable, please retry";

/// Failures reported by a [`crate::ResourceClient`] or [`crate::LookupProvider`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceError {
    #[error("document not found")]
    NotFound,
    #[error("{0}")]
    Rejected(ApiError),
    #[error("{0}")]
    Network(String),
}

impl ResourceError {
    pub fn network() -> Self {
        Self::Network(SERVICE_UNAVAILABLE.to_string())
    }
}

impl From<reqwest::Error> for ResourceError {
    fn from(err: reqwest::Error) -> Self {
        tracing::warn!(error = %err, "resource transport failure");
        Self::network()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Precondition,
    Validation,
    Network,
    LoadFailure,
}

/// Errors surfaced by the lifecycle controller. None of them mutate document state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    #[error("operation not allowed: {0}")]
    Precondition(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Network(String),
    #[error("could not load document: {0}")]
    LoadFailure(String),
}

impl LifecycleError {
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Precondition(_) => ErrorKind::Precondition,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Network(_) => ErrorKind::Network,
            Self::LoadFailure(_) => ErrorKind::LoadFailure,
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::Precondition(message)
            | Self::Validation(message)
            | Self::Network(message)
            | Self::LoadFailure(message) => message.clone(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::LoadFailure
    }
}

impl From<ResourceError> for LifecycleError {
    fn from(err: ResourceError) -> Self {
        match err {
            ResourceError::NotFound => Self::Validation("document not found".to_string()),
            ResourceError::Rejected(api) => Self::Validation(api.message),
            ResourceError::Network(message) => Self::Network(message),
        }
    }
}
