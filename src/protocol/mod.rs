pub mod decode;
pub mod mapping;
pub mod wire;

pub use decode::{parse_turn_event, parse_usage};
pub use mapping::{stage_for_event_type, Stage};

use serde::{Deserialize, Serialize};

/// Kind of an indexed content block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Thinking,
    Text,
    ToolInvocation,
}

/// Tool metadata carried by a tool-invocation block start.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolMeta {
    pub id: Option<String>,
    pub name: Option<String>,
    pub input: Option<serde_json::Value>,
}

/// Incremental payload for an indexed block.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockDelta {
    Text(String),
    Thinking(String),
    InputJson(String),
}

/// Where a positional tool-call reference points.
///
/// Structured blocks and legacy delta lists number their entries
/// independently, so the two index spaces are kept apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolSlot {
    Block(usize),
    Legacy(usize),
}

/// A partial tool-call announcement from any of the tool signal shapes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolCallPatch {
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<serde_json::Value>,
    pub server: Option<String>,
    pub slot: Option<ToolSlot>,
}

/// Reasoning metrics reported alongside flat thinking events.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ThinkingMetrics {
    pub token_count: Option<u64>,
    pub elapsed_ms: Option<u64>,
    pub tokens_per_second: Option<f64>,
}

/// Token usage and throughput reported by the pipeline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageUpdate {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
    pub tokens_per_second: Option<f64>,
    pub model: Option<String>,
}

/// Optional fields a terminal event may carry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DonePayload {
    pub message_id: Option<String>,
    pub model: Option<String>,
    pub content: Option<String>,
    pub usage: Option<UsageUpdate>,
}

/// One decoded event of a turn stream, whichever vocabulary it came from.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    /// Pure pipeline progress marker.
    StageMarker {
        stage: Option<Stage>,
        tool_round: Option<u32>,
        max_tool_rounds: Option<u32>,
    },

    ThinkingStart(String),
    ThinkingDelta(String),
    ThinkingStop(ThinkingMetrics),
    ThinkingMetrics(ThinkingMetrics),

    BlockStart {
        index: usize,
        kind: BlockKind,
        tool: Option<ToolMeta>,
        initial: String,
    },
    BlockDelta {
        index: usize,
        delta: BlockDelta,
    },
    BlockStop {
        index: usize,
    },

    ContentStart,
    ContentDelta {
        index: Option<usize>,
        text: String,
    },
    ContentStop,

    ToolAnnounce(ToolCallPatch),
    ToolStop(ToolCallPatch),
    ToolCallsDelta(Vec<ToolCallPatch>),
    ToolExecuting(ToolCallPatch),
    ToolResult {
        call: ToolCallPatch,
        result: serde_json::Value,
    },
    ToolError {
        call: ToolCallPatch,
        error: String,
    },

    MultiModelStart {
        roles: Vec<String>,
    },
    RoleStart {
        role: String,
        model: Option<String>,
    },
    RoleStream {
        role: String,
        text: String,
    },
    Handoff {
        from: Option<String>,
        to: String,
        reason: Option<String>,
    },
    MultiModelComplete {
        model: Option<String>,
    },
    MultiModelError {
        role: Option<String>,
        message: String,
    },

    Usage(UsageUpdate),
    ModelSelected(String),
    Title(String),

    Done(DonePayload),
    Error {
        message: String,
        status: Option<u16>,
    },

    /// Keep-alives and envelope events with nothing to apply.
    Ignored,
    /// Unrecognized or malformed event; already logged by the decoder.
    Unknown,
}

impl TurnEvent {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, TurnEvent::Done(_))
    }
}
