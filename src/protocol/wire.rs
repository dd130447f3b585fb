//! Serde shapes for the structured parts of the event vocabulary.
//!
//! Only payloads with a stable structure are modelled here (content blocks
//! and tool-call entries). Flat pipeline events vary too much between
//! backends and are read field by field in `decode`.

use serde::Deserialize;

/// `content_block_start` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockStartWire {
    pub index: usize,
    #[serde(alias = "contentBlock", alias = "block")]
    pub content_block: WireBlock,
}

/// Block announced by `content_block_start`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum WireBlock {
    #[serde(rename = "text")]
    Text {
        #[serde(default)]
        text: String,
    },
    #[serde(rename = "thinking", alias = "reasoning")]
    Thinking {
        #[serde(default, alias = "text")]
        thinking: String,
    },
    #[serde(rename = "tool_use", alias = "tool_invocation", alias = "tool_call")]
    ToolUse {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        input: Option<serde_json::Value>,
    },
    #[serde(other)]
    Other,
}

/// `content_block_delta` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockDeltaWire {
    pub index: usize,
    pub delta: WireDelta,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum WireDelta {
    #[serde(rename = "text_delta")]
    TextDelta { text: String },
    #[serde(rename = "thinking_delta", alias = "reasoning_delta")]
    ThinkingDelta {
        #[serde(alias = "text")]
        thinking: String,
    },
    #[serde(rename = "input_json_delta")]
    InputJsonDelta { partial_json: String },
    #[serde(other)]
    Other,
}

/// `content_block_stop` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockStopWire {
    pub index: usize,
}

/// One tool-call entry, as found in legacy `tool_calls` deltas and in the
/// discrete executing/result/error events.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ToolCallWire {
    pub index: Option<usize>,
    #[serde(alias = "toolCallId", alias = "tool_call_id", alias = "callId")]
    pub id: Option<String>,
    #[serde(alias = "toolName", alias = "tool_name")]
    pub name: Option<String>,
    pub function: Option<FunctionWire>,
    #[serde(alias = "args", alias = "input", alias = "parameters")]
    pub arguments: Option<serde_json::Value>,
    #[serde(alias = "serverName", alias = "server_name", alias = "mcpServer")]
    pub server: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FunctionWire {
    pub name: Option<String>,
    pub arguments: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unknown_block_type_is_other() {
        let wire: BlockStartWire = serde_json::from_value(json!({
            "index": 3,
            "content_block": {"type": "redacted_thinking", "data": "xx"}
        }))
        .unwrap();
        assert!(matches!(wire.content_block, WireBlock::Other));
    }

    #[test]
    fn test_tool_call_aliases() {
        let wire: ToolCallWire = serde_json::from_value(json!({
            "toolCallId": "c1",
            "toolName": "search",
            "args": {"q": "rust"},
            "serverName": "web"
        }))
        .unwrap();
        assert_eq!(wire.id.as_deref(), Some("c1"));
        assert_eq!(wire.name.as_deref(), Some("search"));
        assert_eq!(wire.server.as_deref(), Some("web"));
        assert_eq!(wire.arguments, Some(json!({"q": "rust"})));
    }
}
