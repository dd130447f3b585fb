use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Pipeline stages
// ---------------------------------------------------------------------------

/// Backend processing phase surfaced to the client for progress display.
///
/// Variants are declared in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Auth,
    Validation,
    Prompt,
    ToolExecution,
    Completion,
    Response,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Auth,
        Stage::Validation,
        Stage::Prompt,
        Stage::ToolExecution,
        Stage::Completion,
        Stage::Response,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Auth => "auth",
            Stage::Validation => "validation",
            Stage::Prompt => "prompt",
            Stage::ToolExecution => "tool_execution",
            Stage::Completion => "completion",
            Stage::Response => "response",
        }
    }

    /// Parse a stage name as sent in `pipeline_stage` payloads.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "auth" | "authentication" => Some(Stage::Auth),
            "validation" | "validate" => Some(Stage::Validation),
            "prompt" | "prompt_engineering" | "context" => Some(Stage::Prompt),
            "tool_execution" | "tools" | "mcp" => Some(Stage::ToolExecution),
            "completion" | "llm" | "generation" => Some(Stage::Completion),
            "response" | "streaming" => Some(Stage::Response),
            _ => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map a raw event type name onto the stage it signals.
///
/// Returns `None` for event types that carry no stage information (metrics,
/// titles, terminal events, block deltas after the first).
#[must_use]
pub fn stage_for_event_type(event_type: &str) -> Option<Stage> {
    match event_type {
        "auth" | "auth_start" | "auth_complete" | "authenticating" => Some(Stage::Auth),
        "validation" | "validation_start" | "validation_complete" | "validating" => {
            Some(Stage::Validation)
        }
        "prompt" | "prompt_engineering" | "prompt_start" | "prompt_complete" | "rag_search"
        | "context_assembly" => Some(Stage::Prompt),
        "tool_execution" | "tool_execution_start" | "tool_round_start" | "tool_executing"
        | "tool_start" | "mcp_tool_start" => Some(Stage::ToolExecution),
        "completion" | "completion_start" | "llm_request" | "model_selected"
        | "multi_model_start" => Some(Stage::Completion),
        "response" | "response_start" | "stream_start" | "content_start" | "content_delta"
        | "text_delta" | "stream" | "content_block_start" | "thinking_start" => {
            Some(Stage::Response)
        }
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Event families
// ---------------------------------------------------------------------------

#[must_use]
pub fn is_terminal_event_type(event_type: &str) -> bool {
    matches!(
        event_type,
        "done" | "stream_complete" | "message_stop" | "complete"
    )
}

#[must_use]
pub fn is_ignored_event_type(event_type: &str) -> bool {
    matches!(
        event_type,
        "ping" | "keepalive" | "keep_alive" | "heartbeat" | "message_start"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order_matches_pipeline() {
        let mut sorted = Stage::ALL;
        sorted.sort();
        assert_eq!(sorted, Stage::ALL);
        assert!(Stage::Auth < Stage::Response);
    }

    #[test]
    fn test_event_type_mapping() {
        assert_eq!(stage_for_event_type("auth_start"), Some(Stage::Auth));
        assert_eq!(
            stage_for_event_type("tool_executing"),
            Some(Stage::ToolExecution)
        );
        assert_eq!(
            stage_for_event_type("content_block_start"),
            Some(Stage::Response)
        );
        assert_eq!(stage_for_event_type("metrics"), None);
        assert_eq!(stage_for_event_type("done"), None);
    }

    #[test]
    fn test_stage_from_name() {
        assert_eq!(Stage::from_name("Tool-Execution"), Some(Stage::ToolExecution));
        assert_eq!(Stage::from_name("llm"), Some(Stage::Completion));
        assert_eq!(Stage::from_name("bogus"), None);
    }
}
