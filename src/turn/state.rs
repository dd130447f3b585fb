use std::borrow::Cow;
use std::time::Instant;

use serde::Serialize;

use crate::error::{classify_status, ErrorClass, TurnFailure};
use crate::observability::log_turn_complete;
use crate::observability::token_counter::{estimate_tokens, merge_usage, TokenUsage};
use crate::protocol::{
    parse_turn_event, BlockDelta, BlockKind, DonePayload, Stage, ToolCallPatch, ToolSlot,
    TurnEvent,
};
use crate::stream::DecodedRecord;

use super::blocks::{ContentBlock, ContentBlockAssembler};
use super::message::{AssembledMessage, MessageRole, PipelineMetrics};
use super::orchestration::OrchestrationState;
use super::stage::{StageTimings, StageTracker};
use super::thinking::{extract_thinking, ThinkingTrace};
use super::tools::{ToolCall, ToolCallTracker};

const EMPTY_STREAM_MESSAGE: &str =
    "Connection closed before the assistant sent a response (network stream ended)";

/// Where a turn is in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    #[default]
    Idle,
    Sending,
    Streaming,
    Finalizing,
    Cancelled,
    Errored,
}

/// Point-in-time copy of everything a UI needs to render the running turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LiveSnapshot {
    pub turn_id: Option<u64>,
    pub phase: TurnPhase,
    pub visible_text: String,
    pub thinking_text: String,
    pub blocks: Vec<ContentBlock>,
    pub tool_calls: Vec<ToolCall>,
    pub stage: Option<Stage>,
    pub stage_durations: StageTimings,
    pub in_tool_execution: bool,
    pub active_tool_round: u32,
    pub max_tool_rounds: u32,
    pub usage: TokenUsage,
    pub title: Option<String>,
    pub orchestration: OrchestrationState,
}

/// How a turn ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnTerminal {
    Finalized(AssembledMessage),
    Failed(TurnFailure),
}

/// All state scoped to one turn, mutated only through [`TurnState::apply`].
///
/// The first terminal event or error closes the state; everything after it
/// is ignored, so each turn yields at most one [`TurnTerminal`].
#[derive(Debug, Clone)]
pub struct TurnState {
    started_at: Instant,
    stages: StageTracker,
    blocks: ContentBlockAssembler,
    flat_text: String,
    thinking: ThinkingTrace,
    tools: ToolCallTracker,
    orchestration: OrchestrationState,
    usage: TokenUsage,
    metrics_model: Option<String>,
    selected_model: Option<String>,
    pending_title: Option<String>,
    received_content: bool,
    tool_rounds: u32,
    /// Bumped by every event that can change the snapshot.
    revision: u64,
    closed: bool,
}

impl TurnState {
    #[must_use]
    pub fn new(max_tool_rounds: u32, now: Instant) -> Self {
        Self {
            started_at: now,
            stages: StageTracker::new(max_tool_rounds),
            blocks: ContentBlockAssembler::new(),
            flat_text: String::new(),
            thinking: ThinkingTrace::default(),
            tools: ToolCallTracker::new(),
            orchestration: OrchestrationState::default(),
            usage: TokenUsage::default(),
            metrics_model: None,
            selected_model: None,
            pending_title: None,
            received_content: false,
            tool_rounds: 0,
            revision: 0,
            closed: false,
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Whether any content (text, thinking, blocks or tool calls) arrived.
    #[must_use]
    pub fn has_content(&self) -> bool {
        self.received_content || !self.blocks.is_empty() || !self.tools.is_empty()
    }

    /// Changes whenever an applied event could alter [`TurnState::snapshot`].
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Title announced since the last call, if any.
    pub fn take_title_update(&mut self) -> Option<String> {
        self.pending_title.take()
    }

    /// Parse and apply one decoded record.
    pub fn apply_record(&mut self, record: DecodedRecord, now: Instant) -> Option<TurnTerminal> {
        let Some(event_type) = record.resolved_type().map(str::to_owned) else {
            tracing::warn!("skipping record without an event type");
            return None;
        };
        let event = parse_turn_event(&event_type, record.payload);
        self.apply(&event_type, event, now)
    }

    pub fn apply(&mut self, event_type: &str, event: TurnEvent, now: Instant) -> Option<TurnTerminal> {
        if self.closed {
            tracing::debug!(event_type, "ignoring event after turn end");
            return None;
        }
        let stage_moved = self.stages.observe(event_type, now).is_some();
        if stage_moved || !matches!(event, TurnEvent::Ignored | TurnEvent::Unknown) {
            self.revision += 1;
        }

        match event {
            TurnEvent::StageMarker {
                stage,
                tool_round,
                max_tool_rounds,
            } => {
                if let Some(stage) = stage {
                    self.stages.enter(stage, now);
                }
                if event_type == "tool_round_start" || tool_round.is_some() {
                    self.stages.set_tool_round(tool_round, max_tool_rounds);
                    self.tool_rounds = self.tool_rounds.max(self.stages.state().active_tool_round);
                }
            }

            TurnEvent::ThinkingStart(initial) => {
                self.thinking.start(&initial);
                self.received_content = true;
            }
            TurnEvent::ThinkingDelta(text) => {
                self.thinking.push(&text);
                self.received_content = true;
            }
            TurnEvent::ThinkingStop(metrics) => self.thinking.stop(metrics),
            TurnEvent::ThinkingMetrics(metrics) => self.thinking.merge_metrics(metrics),

            TurnEvent::BlockStart {
                index,
                kind,
                tool,
                initial,
            } => self.start_block(index, kind, tool, &initial),
            TurnEvent::BlockDelta { index, delta } => self.block_delta(index, delta),
            TurnEvent::BlockStop { index } => {
                let is_tool = self
                    .blocks
                    .get(index)
                    .is_some_and(|b| b.kind == BlockKind::ToolInvocation);
                if self.blocks.complete_block(index) && is_tool {
                    self.tools.seal_slot(ToolSlot::Block(index));
                }
            }

            TurnEvent::ContentStart | TurnEvent::ContentStop => {}
            TurnEvent::ContentDelta { index, text } => {
                match index {
                    Some(index) => {
                        self.blocks.append_delta(index, &text);
                    }
                    None => self.flat_text.push_str(&text),
                }
                self.received_content = true;
            }

            TurnEvent::ToolAnnounce(patch) => {
                self.tools.announce(patch);
            }
            TurnEvent::ToolStop(patch) => {
                let slot = patch.slot;
                self.tools.announce(patch);
                if let Some(slot) = slot {
                    self.tools.seal_slot(slot);
                }
            }
            TurnEvent::ToolCallsDelta(patches) => {
                for patch in patches {
                    self.tools.announce(patch);
                }
            }
            TurnEvent::ToolExecuting(patch) => self.tools.mark_executing(patch),
            TurnEvent::ToolResult { call, result } => self.tools.record_result(call, result),
            TurnEvent::ToolError { call, error } => self.tools.record_failure(call, error),

            TurnEvent::MultiModelStart { roles } => self.orchestration.start(roles),
            TurnEvent::RoleStart { role, model } => self.orchestration.role_started(&role, model),
            TurnEvent::RoleStream { role, text } => {
                self.orchestration.role_stream(&role, &text);
                self.received_content = true;
            }
            TurnEvent::Handoff { from, to, reason } => self.orchestration.handoff(from, to, reason),
            TurnEvent::MultiModelComplete { model } => self.orchestration.complete(model),
            TurnEvent::MultiModelError { role, message } => self.orchestration.error(role, message),

            TurnEvent::Usage(update) => {
                self.usage.absorb(&update);
                if update.model.is_some() {
                    self.metrics_model = update.model;
                }
            }
            TurnEvent::ModelSelected(model) => self.selected_model = Some(model),
            TurnEvent::Title(title) => self.pending_title = Some(title),

            TurnEvent::Done(payload) => return Some(self.finalize(payload, now)),
            TurnEvent::Error { message, status } => {
                return self.fail(failure_for(&message, status));
            }

            TurnEvent::Ignored | TurnEvent::Unknown => {}
        }
        None
    }

    /// Handle the end of the byte stream. Received content is finalized as
    /// if a terminal event had arrived; an empty stream is a connectivity
    /// failure.
    pub fn finish_stream(&mut self, now: Instant) -> Option<TurnTerminal> {
        if self.closed {
            return None;
        }
        if self.has_content() {
            tracing::warn!("stream ended without a terminal event, finalizing received content");
            return Some(self.finalize(DonePayload::default(), now));
        }
        self.fail(TurnFailure::with_class(
            ErrorClass::Connectivity,
            EMPTY_STREAM_MESSAGE,
        ))
    }

    /// Close the turn with a failure. Only the first failure is reported.
    pub fn fail(&mut self, failure: TurnFailure) -> Option<TurnTerminal> {
        if self.closed {
            tracing::debug!(raw = %failure.raw, "suppressing error after turn end");
            return None;
        }
        self.closed = true;
        self.stages.finish(Instant::now());
        tracing::warn!(class = ?failure.class, "turn failed: {}", failure.raw);
        Some(TurnTerminal::Failed(failure))
    }

    /// Live view of the running turn. Inline reasoning is kept out of
    /// `visible_text`.
    #[must_use]
    pub fn snapshot(&self) -> LiveSnapshot {
        let raw_visible = self.raw_visible();
        let extracted = extract_thinking(&raw_visible);
        let thinking_text = self
            .structured_thinking()
            .unwrap_or_else(|| extracted.extracted.clone());
        let pipeline = self.stages.state();

        LiveSnapshot {
            turn_id: None,
            phase: TurnPhase::Streaming,
            visible_text: extracted.visible.into_owned(),
            thinking_text,
            blocks: self.blocks.blocks().cloned().collect(),
            tool_calls: self.tools.calls().to_vec(),
            stage: pipeline.current_stage,
            stage_durations: self.stages.timings(),
            in_tool_execution: pipeline.in_tool_execution_phase,
            active_tool_round: pipeline.active_tool_round,
            max_tool_rounds: pipeline.max_tool_rounds,
            usage: self.usage,
            title: None,
            orchestration: self.orchestration.clone(),
        }
    }

    fn start_block(
        &mut self,
        index: usize,
        kind: BlockKind,
        tool: Option<crate::protocol::ToolMeta>,
        initial: &str,
    ) {
        self.received_content = true;
        if !self.blocks.start_block(index, kind, tool.as_ref()).accepted() {
            return;
        }
        if !initial.is_empty() {
            self.blocks.append_delta_as(index, kind, initial);
        }
        if kind == BlockKind::ToolInvocation {
            let tool = tool.unwrap_or_default();
            self.tools.announce(ToolCallPatch {
                id: tool.id,
                name: tool.name,
                arguments: tool.input,
                server: None,
                slot: Some(ToolSlot::Block(index)),
            });
        }
    }

    fn block_delta(&mut self, index: usize, delta: BlockDelta) {
        self.received_content = true;
        match delta {
            BlockDelta::Text(text) => {
                self.blocks.append_delta(index, &text);
            }
            BlockDelta::Thinking(text) => {
                self.blocks.append_delta_as(index, BlockKind::Thinking, &text);
            }
            BlockDelta::InputJson(fragment) => {
                if self
                    .blocks
                    .append_delta_as(index, BlockKind::ToolInvocation, &fragment)
                {
                    self.tools
                        .append_argument_fragment(ToolSlot::Block(index), &fragment);
                }
            }
        }
    }

    /// Visible text before reasoning extraction: text blocks, else flat
    /// deltas, else the last role's transcript.
    fn raw_visible(&self) -> Cow<'_, str> {
        if self.blocks.has_kind(BlockKind::Text) {
            return Cow::Owned(self.blocks.text_of(BlockKind::Text));
        }
        if !self.flat_text.is_empty() {
            return Cow::Borrowed(&self.flat_text);
        }
        Cow::Borrowed(self.orchestration.last_role_transcript().unwrap_or(""))
    }

    /// Thinking from thinking blocks, else from flat thinking events.
    fn structured_thinking(&self) -> Option<String> {
        if self.blocks.has_kind(BlockKind::Thinking) {
            return Some(self.blocks.text_of(BlockKind::Thinking));
        }
        (!self.thinking.is_empty()).then(|| self.thinking.text.clone())
    }

    fn finalize(&mut self, done: DonePayload, now: Instant) -> TurnTerminal {
        self.closed = true;
        self.stages.finish(now);
        self.blocks.complete_all();
        if let Some(usage) = &done.usage {
            self.usage.absorb(usage);
        }

        let mut raw_visible = self.raw_visible().into_owned();
        if raw_visible.is_empty() {
            raw_visible = done.content.unwrap_or_default();
        }
        let extracted = extract_thinking(&raw_visible);
        let thinking_trace = self
            .structured_thinking()
            .or_else(|| (!extracted.extracted.is_empty()).then(|| extracted.extracted.clone()))
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty());
        let visible_content = extracted.visible.into_owned();

        let model_used = done
            .model
            .or_else(|| self.orchestration.completed_model.clone())
            .or_else(|| self.orchestration.last_role_model().map(str::to_string))
            .or_else(|| self.metrics_model.clone())
            .or_else(|| self.selected_model.clone());

        let estimated_completion = estimate_tokens(&visible_content)
            + thinking_trace.as_deref().map_or(0, estimate_tokens);
        let elapsed = now.saturating_duration_since(self.started_at);
        let pipeline_metrics = PipelineMetrics {
            usage: merge_usage(&self.usage, estimated_completion),
            stage_durations_ms: self.stages.timings(),
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            tool_rounds: self.tool_rounds,
        };

        let message = AssembledMessage {
            id: done
                .message_id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            role: MessageRole::Assistant,
            visible_content,
            thinking_trace,
            thinking_metrics: self.thinking.metrics.clone(),
            tool_calls: self.tools.finalize(),
            model_used,
            pipeline_metrics,
        };
        log_turn_complete(&message);
        TurnTerminal::Finalized(message)
    }
}

fn failure_for(message: &str, status: Option<u16>) -> TurnFailure {
    match status.and_then(classify_status) {
        Some(class) => TurnFailure::with_class(class, message),
        None => TurnFailure::from_upstream(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::RecordDecoder;
    use crate::turn::tools::ToolCallStatus;
    use serde_json::json;

    fn feed(state: &mut TurnState, raw: &str) -> Vec<TurnTerminal> {
        let now = Instant::now();
        RecordDecoder::new()
            .feed_str(raw)
            .into_iter()
            .filter_map(|record| state.apply_record(record, now))
            .collect()
    }

    fn finalized(terminals: Vec<TurnTerminal>) -> AssembledMessage {
        assert_eq!(terminals.len(), 1, "expected exactly one terminal");
        match terminals.into_iter().next() {
            Some(TurnTerminal::Finalized(message)) => message,
            other => panic!("expected finalized message, got {other:?}"),
        }
    }

    #[test]
    fn test_thinking_and_text_blocks_scenario() {
        let mut state = TurnState::new(10, Instant::now());
        let terminals = feed(
            &mut state,
            "event: content_block_start\ndata: {\"index\":0,\"content_block\":{\"type\":\"thinking\"}}\n\n\
             event: content_block_delta\ndata: {\"index\":0,\"delta\":{\"type\":\"thinking_delta\",\"thinking\":\"Let me check\"}}\n\n\
             event: content_block_stop\ndata: {\"index\":0}\n\n\
             event: content_block_start\ndata: {\"index\":1,\"content_block\":{\"type\":\"text\"}}\n\n\
             event: content_block_delta\ndata: {\"index\":1,\"delta\":{\"type\":\"text_delta\",\"text\":\"The answer is 4\"}}\n\n\
             event: content_block_stop\ndata: {\"index\":1}\n\n\
             event: done\ndata: {}\n\n",
        );
        let message = finalized(terminals);
        assert_eq!(message.thinking_trace.as_deref(), Some("Let me check"));
        assert_eq!(message.visible_content, "The answer is 4");
        assert_eq!(message.role, MessageRole::Assistant);
        assert!(message.tool_calls.is_empty());
    }

    #[test]
    fn test_duplicate_terminal_yields_one_message() {
        let mut state = TurnState::new(10, Instant::now());
        let terminals = feed(
            &mut state,
            "event: content_delta\ndata: {\"delta\":\"hi\"}\n\n\
             event: done\ndata: {}\n\n\
             event: stream_complete\ndata: {}\n\n\
             data: [DONE]\n\n",
        );
        assert_eq!(finalized(terminals).visible_content, "hi");
        assert!(state.is_closed());
    }

    #[test]
    fn test_duplicate_error_surfaces_once() {
        let mut state = TurnState::new(10, Instant::now());
        let terminals = feed(
            &mut state,
            "event: error\ndata: {\"error\":\"connect ECONNREFUSED\"}\n\n\
             event: error\ndata: {\"error\":\"second\"}\n\n\
             event: done\ndata: {}\n\n",
        );
        assert_eq!(terminals.len(), 1);
        match &terminals[0] {
            TurnTerminal::Failed(failure) => {
                assert_eq!(failure.class, ErrorClass::Connectivity);
                assert_eq!(failure.raw, "connect ECONNREFUSED");
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn test_structured_thinking_beats_inline_tags() {
        let now = Instant::now();
        let mut state = TurnState::new(10, now);
        state.apply(
            "content_block_start",
            TurnEvent::BlockStart {
                index: 0,
                kind: BlockKind::Thinking,
                tool: None,
                initial: "from block".to_string(),
            },
            now,
        );
        state.apply(
            "content_delta",
            TurnEvent::ContentDelta {
                index: None,
                text: "<think>inline</think>Answer".to_string(),
            },
            now,
        );
        let message = match state.apply("done", TurnEvent::Done(DonePayload::default()), now) {
            Some(TurnTerminal::Finalized(message)) => message,
            other => panic!("expected message, got {other:?}"),
        };
        assert_eq!(message.thinking_trace.as_deref(), Some("from block"));
        assert_eq!(message.visible_content, "Answer");
    }

    #[test]
    fn test_inline_tags_used_when_nothing_structured() {
        let mut state = TurnState::new(10, Instant::now());
        let message = finalized(feed(
            &mut state,
            "event: content_delta\ndata: {\"delta\":\"<thinking>hmm</thinking>\\n\\n\\n\\nYes\"}\n\n\
             event: done\ndata: {}\n\n",
        ));
        assert_eq!(message.thinking_trace.as_deref(), Some("hmm"));
        assert_eq!(message.visible_content, "Yes");
    }

    #[test]
    fn test_flat_thinking_trace_beats_inline_tags() {
        let mut state = TurnState::new(10, Instant::now());
        let message = finalized(feed(
            &mut state,
            "event: thinking_start\ndata: {}\n\n\
             event: thinking_delta\ndata: {\"delta\":\"trace\"}\n\n\
             event: thinking_stop\ndata: {\"tokenCount\": 2}\n\n\
             event: content_delta\ndata: {\"delta\":\"<think>inline</think>ok\"}\n\n\
             event: done\ndata: {}\n\n",
        ));
        assert_eq!(message.thinking_trace.as_deref(), Some("trace"));
        assert_eq!(message.visible_content, "ok");
        assert_eq!(
            message.thinking_metrics.and_then(|m| m.token_count),
            Some(2)
        );
    }

    #[test]
    fn test_visible_fallbacks() {
        let mut state = TurnState::new(10, Instant::now());
        let message = finalized(feed(
            &mut state,
            "event: role_start\ndata: {\"role\":\"writer\",\"model\":\"m-writer\"}\n\n\
             event: role_stream\ndata: {\"role\":\"writer\",\"content\":\"from role\"}\n\n\
             event: done\ndata: {\"content\":\"from done\"}\n\n",
        ));
        assert_eq!(message.visible_content, "from role");
        assert_eq!(message.model_used.as_deref(), Some("m-writer"));

        let mut state = TurnState::new(10, Instant::now());
        let message = finalized(feed(
            &mut state,
            "event: done\ndata: {\"content\":\"from done\",\"model\":\"m-done\"}\n\n",
        ));
        assert_eq!(message.visible_content, "from done");
        assert_eq!(message.model_used.as_deref(), Some("m-done"));
    }

    #[test]
    fn test_empty_terminal_still_produces_message() {
        let mut state = TurnState::new(10, Instant::now());
        let message = finalized(feed(&mut state, "event: done\ndata: {}\n\n"));
        assert!(message.is_empty());
    }

    #[test]
    fn test_block_tool_call_lifecycle() {
        let mut state = TurnState::new(10, Instant::now());
        let message = finalized(feed(
            &mut state,
            "event: content_block_start\ndata: {\"index\":0,\"content_block\":{\"type\":\"tool_use\",\"id\":\"tu_1\",\"name\":\"search\",\"input\":{}}}\n\n\
             event: content_block_delta\ndata: {\"index\":0,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"{\\\"q\\\":\"}}\n\n\
             event: content_block_delta\ndata: {\"index\":0,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"\\\"rust\\\"}\"}}\n\n\
             event: content_block_stop\ndata: {\"index\":0}\n\n\
             event: tool_result\ndata: {\"toolCallId\":\"tu_1\",\"toolName\":\"search\",\"result\":[1]}\n\n\
             event: done\ndata: {}\n\n",
        ));
        assert_eq!(message.tool_calls.len(), 1);
        let call = &message.tool_calls[0];
        assert_eq!(call.arguments, json!({"q": "rust"}));
        assert_eq!(call.status, ToolCallStatus::Completed);
        assert_eq!(call.result, Some(json!([1])));
    }

    #[test]
    fn test_eof_finalizes_received_content() {
        let mut state = TurnState::new(10, Instant::now());
        feed(&mut state, "event: content_delta\ndata: {\"delta\":\"partial\"}\n\n");
        match state.finish_stream(Instant::now()) {
            Some(TurnTerminal::Finalized(message)) => assert_eq!(message.visible_content, "partial"),
            other => panic!("expected finalized message, got {other:?}"),
        }
    }

    #[test]
    fn test_eof_without_content_is_connectivity_failure() {
        let mut state = TurnState::new(10, Instant::now());
        feed(&mut state, "event: auth_start\ndata: {}\n\n");
        match state.finish_stream(Instant::now()) {
            Some(TurnTerminal::Failed(failure)) => {
                assert_eq!(failure.class, ErrorClass::Connectivity);
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn test_usage_merge_and_estimate() {
        let mut state = TurnState::new(10, Instant::now());
        let message = finalized(feed(
            &mut state,
            "event: content_delta\ndata: {\"delta\":\"12345678\"}\n\n\
             event: metrics\ndata: {\"promptTokens\":12,\"model\":\"m-metrics\"}\n\n\
             event: model_selected\ndata: {\"model\":\"m-selected\"}\n\n\
             event: done\ndata: {}\n\n",
        ));
        let usage = message.pipeline_metrics.usage;
        assert_eq!(usage.prompt_tokens, Some(12));
        assert_eq!(usage.completion_tokens, Some(2));
        assert_eq!(usage.total_tokens, Some(14));
        assert_eq!(message.model_used.as_deref(), Some("m-metrics"));
    }

    #[test]
    fn test_snapshot_hides_inline_reasoning_and_tracks_title() {
        let mut state = TurnState::new(10, Instant::now());
        feed(
            &mut state,
            "event: tool_round_start\ndata: {\"round\":1,\"maxRounds\":3}\n\n\
             event: title_update\ndata: {\"title\":\"Rust question\"}\n\n\
             event: content_delta\ndata: {\"delta\":\"Sure <think>still thinking\"}\n\n",
        );
        let snapshot = state.snapshot();
        assert_eq!(snapshot.visible_text, "Sure");
        assert_eq!(snapshot.thinking_text, "still thinking");
        assert_eq!(snapshot.stage, Some(Stage::Response));
        assert_eq!(snapshot.active_tool_round, 1);
        assert_eq!(snapshot.max_tool_rounds, 3);
        assert!(snapshot.stage_durations.0.contains_key("tool_execution"));
        assert_eq!(state.take_title_update().as_deref(), Some("Rust question"));
        assert_eq!(state.take_title_update(), None);
    }

    #[test]
    fn test_revision_moves_only_on_visible_changes() {
        let mut state = TurnState::new(10, Instant::now());
        assert_eq!(state.revision(), 0);
        feed(&mut state, "event: ping\ndata: {}\n\nevent: brand_new\ndata: {}\n\n");
        assert_eq!(state.revision(), 0);

        feed(&mut state, "event: content_delta\ndata: {\"delta\":\"a\"}\n\n");
        let after_text = state.revision();
        assert!(after_text > 0);

        feed(&mut state, "event: done\ndata: {}\n\nevent: content_delta\ndata: {\"delta\":\"b\"}\n\n");
        let closed_at = state.revision();
        feed(&mut state, "event: content_delta\ndata: {\"delta\":\"c\"}\n\n");
        assert_eq!(state.revision(), closed_at);
    }
}
