use serde_json::Value;

use super::mapping::{is_ignored_event_type, is_terminal_event_type, stage_for_event_type};
use super::wire::{
    BlockDeltaWire, BlockStartWire, BlockStopWire, ToolCallWire, WireBlock, WireDelta,
};
use super::{
    BlockDelta, BlockKind, DonePayload, Stage, ThinkingMetrics, ToolCallPatch, ToolMeta, ToolSlot,
    TurnEvent, UsageUpdate,
};

const TEXT_KEYS: &[&str] = &["delta", "content", "text", "chunk", "token"];
const THINKING_KEYS: &[&str] = &["delta", "thinking", "content", "text", "reasoning"];
const ROLE_KEYS: &[&str] = &["role", "roleName", "agent"];

/// Parse a decoded record into a [`TurnEvent`].
///
/// Never fails: malformed payloads for a known type are logged and come back
/// as [`TurnEvent::Unknown`].
#[must_use]
pub fn parse_turn_event(event_type: &str, payload: Value) -> TurnEvent {
    if is_terminal_event_type(event_type) {
        return TurnEvent::Done(parse_done(&payload));
    }
    if is_ignored_event_type(event_type) {
        return TurnEvent::Ignored;
    }

    match event_type {
        "pipeline_stage" | "stage" => TurnEvent::StageMarker {
            stage: str_field(&payload, &["stage", "name", "phase"]).and_then(Stage::from_name),
            tool_round: u32_field(&payload, &["round", "toolRound", "tool_round"]),
            max_tool_rounds: u32_field(&payload, &["maxRounds", "max_rounds", "maxToolRounds"]),
        },
        "tool_round_start" => TurnEvent::StageMarker {
            stage: Some(Stage::ToolExecution),
            tool_round: u32_field(&payload, &["round", "toolRound", "tool_round", "currentRound"]),
            max_tool_rounds: u32_field(&payload, &["maxRounds", "max_rounds", "maxToolRounds"]),
        },

        "thinking_start" => {
            TurnEvent::ThinkingStart(text_field(&payload, THINKING_KEYS).unwrap_or_default())
        }
        "thinking_delta" | "thinking" => match text_field(&payload, THINKING_KEYS) {
            Some(text) => TurnEvent::ThinkingDelta(text),
            None => malformed(event_type, "missing thinking text"),
        },
        "thinking_stop" | "thinking_complete" | "thinking_end" => {
            TurnEvent::ThinkingStop(parse_thinking_metrics(&payload))
        }
        "thinking_metrics" => TurnEvent::ThinkingMetrics(parse_thinking_metrics(&payload)),

        "content_block_start" => parse_block_start(payload),
        "content_block_delta" => parse_block_delta(payload),
        "content_block_stop" => match serde_json::from_value::<BlockStopWire>(payload) {
            Ok(wire) => TurnEvent::BlockStop { index: wire.index },
            Err(err) => malformed(event_type, &err.to_string()),
        },

        "content_start" => TurnEvent::ContentStart,
        "content_delta" | "text_delta" | "stream" | "content" | "delta" => {
            match text_field(&payload, TEXT_KEYS) {
                Some(text) => TurnEvent::ContentDelta {
                    index: usize_field(&payload, &["index"]),
                    text,
                },
                None => malformed(event_type, "missing text"),
            }
        }
        "content_stop" | "content_end" => TurnEvent::ContentStop,

        "tool_start" => parse_tool_start(payload),
        "tool_delta" => parse_tool_delta(payload),
        "tool_stop" => {
            let index = usize_field(&payload, &["index"]);
            match index {
                Some(index) => TurnEvent::BlockStop { index },
                None => match tool_patch(payload, None) {
                    Some(patch) => TurnEvent::ToolStop(patch),
                    None => malformed(event_type, "unreadable tool entry"),
                },
            }
        }
        "tool_call_delta" | "tool_calls" => TurnEvent::ToolCallsDelta(parse_tool_call_list(payload)),
        "tool_executing" | "mcp_tool_start" => match tool_patch(payload, None) {
            Some(patch) => TurnEvent::ToolExecuting(patch),
            None => malformed(event_type, "unreadable tool entry"),
        },
        "tool_result" | "mcp_tool_result" => {
            let result = ["result", "output", "content"]
                .iter()
                .find_map(|key| payload.get(*key).cloned())
                .unwrap_or(Value::Null);
            match tool_patch(payload, None) {
                Some(call) => TurnEvent::ToolResult { call, result },
                None => malformed(event_type, "unreadable tool entry"),
            }
        }
        "tool_error" | "mcp_tool_error" => {
            let error = error_message(&payload).unwrap_or_else(|| "Tool execution failed".to_string());
            let call = tool_patch(payload, None).unwrap_or_default();
            TurnEvent::ToolError { call, error }
        }

        "multi_model_start" => TurnEvent::MultiModelStart {
            roles: parse_roles(&payload),
        },
        "role_start" => match str_field(&payload, ROLE_KEYS) {
            Some(role) => TurnEvent::RoleStart {
                role: role.to_string(),
                model: str_field(&payload, &["model", "modelId"]).map(str::to_string),
            },
            None => malformed(event_type, "missing role"),
        },
        "role_stream" => match str_field(&payload, ROLE_KEYS) {
            Some(role) => TurnEvent::RoleStream {
                role: role.to_string(),
                text: text_field(&payload, TEXT_KEYS).unwrap_or_default(),
            },
            None => malformed(event_type, "missing role"),
        },
        "handoff" => match str_field(&payload, &["to", "toRole", "to_role"]) {
            Some(to) => TurnEvent::Handoff {
                from: str_field(&payload, &["from", "fromRole", "from_role"]).map(str::to_string),
                to: to.to_string(),
                reason: str_field(&payload, &["reason"]).map(str::to_string),
            },
            None => malformed(event_type, "missing handoff target"),
        },
        "multi_model_complete" => TurnEvent::MultiModelComplete {
            model: str_field(&payload, &["modelUsed", "model_used", "finalModel", "model"])
                .map(str::to_string),
        },
        "multi_model_error" => TurnEvent::MultiModelError {
            role: str_field(&payload, ROLE_KEYS).map(str::to_string),
            message: error_message(&payload)
                .unwrap_or_else(|| "Multi-model orchestration failed".to_string()),
        },

        "metrics" | "token_usage" | "usage" | "message_delta" => {
            TurnEvent::Usage(parse_usage(&payload))
        }
        "model_selected" => match str_field(&payload, &["model", "modelId", "name"]) {
            Some(model) => TurnEvent::ModelSelected(model.to_string()),
            None => TurnEvent::StageMarker {
                stage: Some(Stage::Completion),
                tool_round: None,
                max_tool_rounds: None,
            },
        },
        "title_update" | "session_title" | "title" => {
            match str_field(&payload, &["title", "sessionTitle", "session_title"]) {
                Some(title) => TurnEvent::Title(title.to_string()),
                None => malformed(event_type, "missing title"),
            }
        }

        "error" => TurnEvent::Error {
            message: error_message(&payload).unwrap_or_else(|| "Unknown error".to_string()),
            status: error_status(&payload),
        },

        other => match stage_for_event_type(other) {
            Some(stage) => TurnEvent::StageMarker {
                stage: Some(stage),
                tool_round: None,
                max_tool_rounds: None,
            },
            None => {
                tracing::debug!(event_type = other, "ignoring unrecognized event type");
                TurnEvent::Unknown
            }
        },
    }
}

fn malformed(event_type: &str, detail: &str) -> TurnEvent {
    tracing::warn!(event_type, "skipping malformed event: {detail}");
    TurnEvent::Unknown
}

// ---------------------------------------------------------------------------
// Block vocabulary
// ---------------------------------------------------------------------------

fn parse_block_start(payload: Value) -> TurnEvent {
    let wire = match serde_json::from_value::<BlockStartWire>(payload) {
        Ok(wire) => wire,
        Err(err) => return malformed("content_block_start", &err.to_string()),
    };
    let index = wire.index;
    match wire.content_block {
        WireBlock::Text { text } => TurnEvent::BlockStart {
            index,
            kind: BlockKind::Text,
            tool: None,
            initial: text,
        },
        WireBlock::Thinking { thinking } => TurnEvent::BlockStart {
            index,
            kind: BlockKind::Thinking,
            tool: None,
            initial: thinking,
        },
        WireBlock::ToolUse { id, name, input } => TurnEvent::BlockStart {
            index,
            kind: BlockKind::ToolInvocation,
            tool: Some(ToolMeta { id, name, input }),
            initial: String::new(),
        },
        WireBlock::Other => {
            tracing::debug!(index, "ignoring content block of unsupported type");
            TurnEvent::Ignored
        }
    }
}

fn parse_block_delta(payload: Value) -> TurnEvent {
    let wire = match serde_json::from_value::<BlockDeltaWire>(payload) {
        Ok(wire) => wire,
        Err(err) => return malformed("content_block_delta", &err.to_string()),
    };
    let delta = match wire.delta {
        WireDelta::TextDelta { text } => BlockDelta::Text(text),
        WireDelta::ThinkingDelta { thinking } => BlockDelta::Thinking(thinking),
        WireDelta::InputJsonDelta { partial_json } => BlockDelta::InputJson(partial_json),
        WireDelta::Other => return TurnEvent::Ignored,
    };
    TurnEvent::BlockDelta {
        index: wire.index,
        delta,
    }
}

// ---------------------------------------------------------------------------
// Tools
// ---------------------------------------------------------------------------

fn parse_tool_start(payload: Value) -> TurnEvent {
    let Some(index) = usize_field(&payload, &["index"]) else {
        return match tool_patch(payload, None) {
            Some(patch) => TurnEvent::ToolAnnounce(patch),
            None => malformed("tool_start", "unreadable tool entry"),
        };
    };
    match tool_patch(payload, Some(ToolSlot::Block(index))) {
        Some(patch) => TurnEvent::BlockStart {
            index,
            kind: BlockKind::ToolInvocation,
            tool: Some(ToolMeta {
                id: patch.id,
                name: patch.name,
                input: patch.arguments,
            }),
            initial: String::new(),
        },
        None => malformed("tool_start", "unreadable tool entry"),
    }
}

fn parse_tool_delta(payload: Value) -> TurnEvent {
    let index = usize_field(&payload, &["index"]);
    if let Some(index) = index {
        let fragment = ["partial_json", "partialJson", "delta", "arguments"]
            .iter()
            .find_map(|key| payload.get(*key).and_then(Value::as_str));
        if let Some(fragment) = fragment {
            return TurnEvent::BlockDelta {
                index,
                delta: BlockDelta::InputJson(fragment.to_string()),
            };
        }
    }
    match tool_patch(payload, index.map(ToolSlot::Block)) {
        Some(patch) => TurnEvent::ToolAnnounce(patch),
        None => malformed("tool_delta", "unreadable tool entry"),
    }
}

fn tool_patch(payload: Value, slot: Option<ToolSlot>) -> Option<ToolCallPatch> {
    match serde_json::from_value::<ToolCallWire>(payload) {
        Ok(wire) => Some(patch_from_wire(wire, slot)),
        Err(err) => {
            tracing::warn!("unreadable tool-call entry: {err}");
            None
        }
    }
}

fn patch_from_wire(wire: ToolCallWire, slot: Option<ToolSlot>) -> ToolCallPatch {
    let (fn_name, fn_args) = match wire.function {
        Some(function) => (function.name, function.arguments),
        None => (None, None),
    };
    ToolCallPatch {
        id: wire.id.filter(|id| !id.is_empty()),
        name: wire.name.or(fn_name).filter(|name| !name.is_empty()),
        arguments: wire.arguments.or(fn_args),
        server: wire.server,
        slot,
    }
}

fn parse_tool_call_list(payload: Value) -> Vec<ToolCallPatch> {
    let entries = match payload {
        Value::Array(entries) => entries,
        Value::Object(mut map) => {
            match map
                .remove("tool_calls")
                .or_else(|| map.remove("toolCalls"))
            {
                Some(Value::Array(entries)) => entries,
                Some(single @ Value::Object(_)) => vec![single],
                _ => vec![Value::Object(map)],
            }
        }
        _ => Vec::new(),
    };

    entries
        .into_iter()
        .enumerate()
        .filter_map(|(position, entry)| {
            let wire = match serde_json::from_value::<ToolCallWire>(entry) {
                Ok(wire) => wire,
                Err(err) => {
                    tracing::warn!(position, "skipping unreadable tool-call delta entry: {err}");
                    return None;
                }
            };
            let slot = Some(ToolSlot::Legacy(wire.index.unwrap_or(position)));
            Some(patch_from_wire(wire, slot))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Metrics, terminal and error payloads
// ---------------------------------------------------------------------------

fn parse_thinking_metrics(payload: &Value) -> ThinkingMetrics {
    let source = payload
        .get("metrics")
        .filter(|v| v.is_object())
        .unwrap_or(payload);
    ThinkingMetrics {
        token_count: u64_field(source, &["tokenCount", "token_count", "tokens"]),
        elapsed_ms: u64_field(source, &["elapsedMs", "elapsed_ms", "durationMs", "duration_ms"]),
        tokens_per_second: f64_field(source, &["tokensPerSecond", "tokens_per_second"]),
    }
}

/// Read usage counters from a metrics payload, accepting both camelCase and
/// snake_case names and a nested `usage` object.
#[must_use]
pub fn parse_usage(payload: &Value) -> UsageUpdate {
    let source = payload
        .get("usage")
        .filter(|v| v.is_object())
        .unwrap_or(payload);
    UsageUpdate {
        prompt_tokens: u64_field(
            source,
            &["promptTokens", "prompt_tokens", "inputTokens", "input_tokens"],
        ),
        completion_tokens: u64_field(
            source,
            &[
                "completionTokens",
                "completion_tokens",
                "outputTokens",
                "output_tokens",
            ],
        ),
        total_tokens: u64_field(source, &["totalTokens", "total_tokens"]),
        tokens_per_second: f64_field(source, &["tokensPerSecond", "tokens_per_second"])
            .or_else(|| f64_field(payload, &["tokensPerSecond", "tokens_per_second"])),
        model: str_field(payload, &["model", "modelUsed", "model_used"]).map(str::to_string),
    }
}

fn parse_done(payload: &Value) -> DonePayload {
    let usage = payload
        .get("usage")
        .or_else(|| payload.get("metrics"))
        .filter(|v| v.is_object())
        .map(parse_usage);
    DonePayload {
        message_id: str_field(payload, &["messageId", "message_id", "id"]).map(str::to_string),
        model: str_field(payload, &["model", "modelUsed", "model_used"]).map(str::to_string),
        content: str_field(payload, &["content", "finalContent", "response"]).map(str::to_string),
        usage,
    }
}

fn parse_roles(payload: &Value) -> Vec<String> {
    let Some(entries) = payload
        .get("roles")
        .or_else(|| payload.get("models"))
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| match entry {
            Value::String(role) => Some(role.clone()),
            Value::Object(_) => str_field(entry, &["role", "name", "model"]).map(str::to_string),
            _ => None,
        })
        .collect()
}

fn error_message(payload: &Value) -> Option<String> {
    match payload {
        Value::String(message) => return Some(message.clone()),
        Value::Null => return None,
        _ => {}
    }
    match payload.get("error") {
        Some(Value::String(message)) => return Some(message.clone()),
        Some(nested @ Value::Object(_)) => {
            if let Some(message) = str_field(nested, &["message", "detail", "error"]) {
                return Some(message.to_string());
            }
        }
        _ => {}
    }
    str_field(payload, &["message", "detail", "errorMessage"]).map(str::to_string)
}

fn error_status(payload: &Value) -> Option<u16> {
    let from = |v: &Value| {
        u64_field(v, &["status", "statusCode", "status_code", "code"])
            .and_then(|s| u16::try_from(s).ok())
    };
    payload
        .get("error")
        .filter(|v| v.is_object())
        .and_then(from)
        .or_else(|| from(payload))
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

fn str_field<'a>(payload: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|key| payload.get(*key).and_then(Value::as_str))
}

fn u64_field(payload: &Value, keys: &[&str]) -> Option<u64> {
    keys.iter().find_map(|key| match payload.get(*key)? {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f.max(0.0) as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

fn u32_field(payload: &Value, keys: &[&str]) -> Option<u32> {
    u64_field(payload, keys).and_then(|v| u32::try_from(v).ok())
}

fn usize_field(payload: &Value, keys: &[&str]) -> Option<usize> {
    keys.iter().find_map(|key| {
        payload
            .get(*key)
            .and_then(Value::as_u64)
            .and_then(|v| usize::try_from(v).ok())
    })
}

fn f64_field(payload: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|key| match payload.get(*key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Text carried by a flat delta: the payload itself when it is a JSON string,
/// else the first string under `keys`, looking one level into objects.
fn text_field(payload: &Value, keys: &[&str]) -> Option<String> {
    if let Value::String(text) = payload {
        return Some(text.clone());
    }
    keys.iter().find_map(|key| match payload.get(*key)? {
        Value::String(text) => Some(text.clone()),
        nested @ Value::Object(_) => str_field(nested, &["text", "content", "thinking"])
            .map(str::to_string),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_block_start_variants() {
        let event = parse_turn_event(
            "content_block_start",
            json!({"index": 0, "content_block": {"type": "thinking", "thinking": ""}}),
        );
        assert_eq!(
            event,
            TurnEvent::BlockStart {
                index: 0,
                kind: BlockKind::Thinking,
                tool: None,
                initial: String::new()
            }
        );

        let event = parse_turn_event(
            "content_block_start",
            json!({"index": 2, "content_block": {"type": "tool_use", "id": "toolu_1", "name": "search", "input": {}}}),
        );
        match event {
            TurnEvent::BlockStart {
                kind: BlockKind::ToolInvocation,
                tool: Some(meta),
                ..
            } => {
                assert_eq!(meta.id.as_deref(), Some("toolu_1"));
                assert_eq!(meta.name.as_deref(), Some("search"));
            }
            other => panic!("expected tool block start, got {other:?}"),
        }
    }

    #[test]
    fn test_block_delta_variants() {
        let event = parse_turn_event(
            "content_block_delta",
            json!({"index": 1, "delta": {"type": "input_json_delta", "partial_json": "{\"q\":"}}),
        );
        assert_eq!(
            event,
            TurnEvent::BlockDelta {
                index: 1,
                delta: BlockDelta::InputJson("{\"q\":".to_string())
            }
        );
    }

    #[test]
    fn test_flat_content_delta_shapes() {
        for payload in [
            json!({"delta": "hi"}),
            json!({"content": "hi"}),
            json!({"delta": {"text": "hi"}}),
            json!("hi"),
        ] {
            assert_eq!(
                parse_turn_event("content_delta", payload),
                TurnEvent::ContentDelta {
                    index: None,
                    text: "hi".to_string()
                }
            );
        }
    }

    #[test]
    fn test_legacy_tool_call_list() {
        let event = parse_turn_event(
            "tool_call_delta",
            json!({"tool_calls": [
                {"index": 0, "id": "call_1", "function": {"name": "lookup", "arguments": "{\"a\""}},
                {"id": "call_2", "name": "fetch"}
            ]}),
        );
        let TurnEvent::ToolCallsDelta(patches) = event else {
            panic!("expected tool call delta");
        };
        assert_eq!(patches.len(), 2);
        assert_eq!(patches[0].name.as_deref(), Some("lookup"));
        assert_eq!(patches[0].slot, Some(ToolSlot::Legacy(0)));
        assert_eq!(patches[1].slot, Some(ToolSlot::Legacy(1)));
    }

    #[test]
    fn test_tool_error_without_identity_still_parses() {
        let event = parse_turn_event("tool_error", json!({"error": {"message": "boom"}}));
        assert_eq!(
            event,
            TurnEvent::ToolError {
                call: ToolCallPatch::default(),
                error: "boom".to_string()
            }
        );
    }

    #[test]
    fn test_error_payload_shapes() {
        assert_eq!(
            parse_turn_event("error", json!({"error": {"message": "401 Unauthorized", "status": 401}})),
            TurnEvent::Error {
                message: "401 Unauthorized".to_string(),
                status: Some(401)
            }
        );
        assert_eq!(
            parse_turn_event("error", json!({"message": "boom"})),
            TurnEvent::Error {
                message: "boom".to_string(),
                status: None
            }
        );
    }

    #[test]
    fn test_terminal_and_stage_markers() {
        assert!(parse_turn_event("stream_complete", Value::Null).is_terminal());
        assert_eq!(
            parse_turn_event("tool_round_start", json!({"round": 2, "maxRounds": 5})),
            TurnEvent::StageMarker {
                stage: Some(Stage::ToolExecution),
                tool_round: Some(2),
                max_tool_rounds: Some(5)
            }
        );
        assert_eq!(
            parse_turn_event("validation_start", json!({})),
            TurnEvent::StageMarker {
                stage: Some(Stage::Validation),
                tool_round: None,
                max_tool_rounds: None
            }
        );
        assert_eq!(parse_turn_event("something_new", json!({})), TurnEvent::Unknown);
    }

    #[test]
    fn test_usage_shapes() {
        let usage = parse_usage(&json!({"usage": {"input_tokens": 10, "output_tokens": 4}, "model": "m1"}));
        assert_eq!(usage.prompt_tokens, Some(10));
        assert_eq!(usage.completion_tokens, Some(4));
        assert_eq!(usage.model.as_deref(), Some("m1"));
    }
}
