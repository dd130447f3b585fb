use serde::Serialize;

use crate::observability::token_counter::TokenUsage;
use crate::protocol::ThinkingMetrics;

use super::stage::StageTimings;
use super::tools::ToolCall;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    #[default]
    Assistant,
}

/// Usage and timing summary attached to a finalized message.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineMetrics {
    #[serde(flatten)]
    pub usage: TokenUsage,
    pub stage_durations_ms: StageTimings,
    pub elapsed_ms: u64,
    pub tool_rounds: u32,
}

/// The assistant's reply for one completed turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssembledMessage {
    pub id: String,
    pub role: MessageRole,
    pub visible_content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_trace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_metrics: Option<ThinkingMetrics>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,
    pub pipeline_metrics: PipelineMetrics,
}

impl AssembledMessage {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.visible_content.is_empty() && self.thinking_trace.is_none() && self.tool_calls.is_empty()
    }
}
