// Error types surfaced by the tracking pipeline
use thiserror::Error;

/// Failure talking to the tracking backend
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    #[error("request failed with status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("response is not JSON (status {status}); check the base URL")]
    NotJson { status: u16 },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("could not decode response: {0}")]
    Decode(String),

    #[error("response envelope has no data")]
    MissingData,
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } | ApiError::NotJson { status } => Some(*status),
            _ => None,
        }
    }

    /// Backend-provided message, or the given fallback
    pub fn message_or(&self, fallback: &str) -> String {
        match self {
            ApiError::Status { message, .. } if !message.is_empty() => message.clone(),
            ApiError::NotJson { .. } => self.to_string(),
            _ => fallback.to_string(),
        }
    }
}

/// Error reported by the location capability
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LocationError {
    #[error("1: permission denied")]
    PermissionDenied,

    #[error("2: position unavailable")]
    PositionUnavailable,

    #[error("3: timeout")]
    Timeout,

    #[error("0: {0}")]
    Other(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrackerError {
    #[error("Geolocation not supported in this environment.")]
    CapabilityUnavailable,

    #[error("A start or stop is already in progress.")]
    Busy,

    #[error("Tracking is already active.")]
    AlreadyWatching,

    #[error("No session to resume.")]
    NoSession,

    #[error("Start was cancelled by logout.")]
    Cancelled,

    #[error("{message}")]
    Api {
        message: String,
        #[source]
        source: ApiError,
    },
}

impl TrackerError {
    pub fn api(source: ApiError, fallback: &str) -> Self {
        TrackerError::Api {
            message: source.message_or(fallback),
            source,
        }
    }
}

/// How a failed flush is reported to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushFailureKind {
    SessionInactive,
    Unauthorized,
    Other,
}

impl FlushFailureKind {
    pub fn classify(error: &ApiError) -> Self {
        match error.status() {
            Some(400) => FlushFailureKind::SessionInactive,
            Some(401) | Some(403) => FlushFailureKind::Unauthorized,
            _ => FlushFailureKind::Other,
        }
    }

    /// Guidance shown to the user, if this failure needs action
    pub fn user_message(&self) -> Option<&'static str> {
        match self {
            FlushFailureKind::SessionInactive => {
                Some("Session is not ACTIVE / invalid. Please restart tracking.")
            }
            FlushFailureKind::Unauthorized => Some("Unauthorized. Please login again."),
            FlushFailureKind::Other => None,
        }
    }
}
