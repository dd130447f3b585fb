use std::sync::OnceLock;

use regex_lite::Regex;
use serde::Serialize;

/// Error type shared by the decoder, transport and turn controller.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TurnError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Credential error: {0}")]
    Credential(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Upstream error: status={status}, message={message}")]
    Upstream { status: u16, message: String },
    #[error("Stream error: {0}")]
    Stream(String),
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Turn timed out after {0}s")]
    Timeout(u64),
    #[error("Turn cancelled")]
    Cancelled,
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Broad class of a turn failure, used to pick the user-facing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Authentication,
    Connectivity,
    Timeout,
    ModelConfiguration,
    Unclassified,
}

const AUTH_MARKERS: &[&str] = &[
    "unauthorized",
    "unauthenticated",
    "authentication",
    "authorization",
    "forbidden",
    "invalid token",
    "token expired",
    "expired token",
    "access denied",
    "permission denied",
];

/// `401`/`403` as standalone numbers, not digits inside a larger figure.
fn auth_status_regex() -> Option<&'static Regex> {
    static AUTH_STATUS: OnceLock<Option<Regex>> = OnceLock::new();
    AUTH_STATUS
        .get_or_init(|| Regex::new(r"\b40[13]\b").ok())
        .as_ref()
}

const CONNECTIVITY_MARKERS: &[&str] = &[
    "econnrefused",
    "econnreset",
    "connection refused",
    "connection reset",
    "connection closed",
    "failed to fetch",
    "fetch failed",
    "network",
    "dns",
    "unreachable",
    "socket hang up",
];

const TIMEOUT_MARKERS: &[&str] = &["timeout", "timed out", "etimedout", "deadline exceeded"];

const MODEL_CONFIG_MARKERS: &[&str] = &[
    "model not found",
    "no model",
    "invalid model",
    "unknown model",
    "model configuration",
    "model is not configured",
    "deploymentnotfound",
    "deployment not found",
    "does not exist",
];

/// Classify an upstream error message by inspecting it for known substrings.
///
/// Checks run in a fixed order: authentication, timeout, connectivity, model
/// configuration. A message matching none of them is `Unclassified`.
#[must_use]
pub fn classify_error_message(message: &str) -> ErrorClass {
    let lowered = message.to_ascii_lowercase();
    let has_any = |markers: &[&str]| markers.iter().any(|m| lowered.contains(m));

    let auth_status = auth_status_regex().is_some_and(|re| re.is_match(&lowered));

    if auth_status || has_any(AUTH_MARKERS) {
        ErrorClass::Authentication
    } else if has_any(TIMEOUT_MARKERS) {
        ErrorClass::Timeout
    } else if has_any(CONNECTIVITY_MARKERS) {
        ErrorClass::Connectivity
    } else if has_any(MODEL_CONFIG_MARKERS) {
        ErrorClass::ModelConfiguration
    } else {
        ErrorClass::Unclassified
    }
}

/// Map an HTTP status from the turn endpoint to an error class.
#[must_use]
pub fn classify_status(status: u16) -> Option<ErrorClass> {
    match status {
        401 | 403 => Some(ErrorClass::Authentication),
        404 => Some(ErrorClass::ModelConfiguration),
        408 | 504 => Some(ErrorClass::Timeout),
        502 | 503 => Some(ErrorClass::Connectivity),
        _ => None,
    }
}

fn user_message_for_class(class: ErrorClass) -> Option<&'static str> {
    match class {
        ErrorClass::Authentication => {
            Some("Your session is not authorized. Please sign in again and retry.")
        }
        ErrorClass::Connectivity => {
            Some("Could not reach the assistant service. Check your connection and try again.")
        }
        ErrorClass::Timeout => {
            Some("The assistant took too long to respond. Please try again.")
        }
        ErrorClass::ModelConfiguration => Some(
            "The selected model is not available or is misconfigured. Choose another model and retry.",
        ),
        ErrorClass::Unclassified => None,
    }
}

/// A classified, user-presentable turn failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TurnFailure {
    pub class: ErrorClass,
    /// Message suitable for showing to the user.
    pub message: String,
    /// Original upstream or local error text.
    pub raw: String,
}

impl TurnFailure {
    /// Build a failure from an upstream-reported message.
    #[must_use]
    pub fn from_upstream(raw: &str) -> Self {
        Self::with_class(classify_error_message(raw), raw)
    }

    /// Build a failure with an explicit class; unclassified keeps the raw text.
    #[must_use]
    pub fn with_class(class: ErrorClass, raw: &str) -> Self {
        let message = user_message_for_class(class).map_or_else(|| raw.to_string(), str::to_string);
        Self {
            class,
            message,
            raw: raw.to_string(),
        }
    }

    /// Build a failure from a local [`TurnError`].
    #[must_use]
    pub fn from_error(err: &TurnError) -> Self {
        let raw = err.to_string();
        match err {
            TurnError::Timeout(_) => Self::with_class(ErrorClass::Timeout, &raw),
            TurnError::Credential(_) => Self::with_class(ErrorClass::Authentication, &raw),
            TurnError::Transport(_) | TurnError::Stream(_) => {
                let class = match classify_error_message(&raw) {
                    ErrorClass::Unclassified => ErrorClass::Connectivity,
                    other => other,
                };
                Self::with_class(class, &raw)
            }
            TurnError::Upstream { status, message } => {
                let class = classify_status(*status).unwrap_or_else(|| classify_error_message(message));
                Self::with_class(class, message)
            }
            TurnError::Config(_)
            | TurnError::Decode(_)
            | TurnError::Cancelled
            | TurnError::Internal(_) => Self::from_upstream(&raw),
        }
    }
}

impl From<&TurnError> for TurnFailure {
    fn from(err: &TurnError) -> Self {
        Self::from_error(err)
    }
}
