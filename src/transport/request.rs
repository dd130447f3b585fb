use serde::Serialize;

/// JSON body posted to the turn endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnRequest {
    pub message: String,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub stream: bool,
}

impl TurnRequest {
    #[must_use]
    pub fn new(message: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            session_id: session_id.into(),
            model: None,
            stream: true,
        }
    }

    #[must_use]
    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }
}

/// Pull a human-readable message out of an error response body.
///
/// Understands `{"error": "..."}`, `{"error": {"message": "..."}}`,
/// `{"message": "..."}` and `{"detail": "..."}`; any other non-empty body is
/// returned trimmed.
pub(crate) fn error_body_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) else {
        return Some(trimmed.to_string());
    };
    let text = |v: &serde_json::Value| v.as_str().map(str::to_string);
    value
        .get("error")
        .and_then(|err| text(err).or_else(|| err.get("message").and_then(text)))
        .or_else(|| value.get("message").and_then(text))
        .or_else(|| value.get("detail").and_then(text))
        .or_else(|| Some(trimmed.to_string()))
}
