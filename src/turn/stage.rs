use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::protocol::{stage_for_event_type, Stage};

/// Pipeline progress of the current turn.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineState {
    pub current_stage: Option<Stage>,
    pub stage_started_at: Option<Instant>,
    /// Written only when leaving a stage.
    pub stage_durations: BTreeMap<Stage, Duration>,
    pub in_tool_execution_phase: bool,
    pub active_tool_round: u32,
    pub max_tool_rounds: u32,
}

/// Stage durations in milliseconds keyed by stage name, as reported in
/// snapshots and metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StageTimings(pub BTreeMap<&'static str, u64>);

impl From<&BTreeMap<Stage, Duration>> for StageTimings {
    fn from(durations: &BTreeMap<Stage, Duration>) -> Self {
        Self(
            durations
                .iter()
                .map(|(stage, elapsed)| {
                    let ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
                    (stage.as_str(), ms)
                })
                .collect(),
        )
    }
}

/// Tracks which pipeline stage the backend is in.
#[derive(Debug, Clone)]
pub struct StageTracker {
    state: PipelineState,
    default_max_tool_rounds: u32,
}

impl StageTracker {
    #[must_use]
    pub fn new(default_max_tool_rounds: u32) -> Self {
        Self {
            state: PipelineState {
                max_tool_rounds: default_max_tool_rounds,
                ..PipelineState::default()
            },
            default_max_tool_rounds,
        }
    }

    #[must_use]
    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    #[must_use]
    pub fn current(&self) -> Option<Stage> {
        self.state.current_stage
    }

    /// Feed a raw event type. Returns the new stage when the event moved the
    /// pipeline to a different one.
    pub fn observe(&mut self, event_type: &str, now: Instant) -> Option<Stage> {
        let stage = stage_for_event_type(event_type)?;
        self.enter(stage, now).then_some(stage)
    }

    /// Move to `stage`. Returns `false` when it is already the current stage.
    pub fn enter(&mut self, stage: Stage, now: Instant) -> bool {
        if self.state.current_stage == Some(stage) {
            return false;
        }
        self.close_current(now);
        tracing::debug!(
            from = self.state.current_stage.map(Stage::as_str),
            to = stage.as_str(),
            "pipeline stage changed"
        );
        self.state.current_stage = Some(stage);
        self.state.stage_started_at = Some(now);
        self.state.in_tool_execution_phase = stage == Stage::ToolExecution;
        true
    }

    /// Apply a `tool_round_start` payload.
    pub fn set_tool_round(&mut self, round: Option<u32>, max_rounds: Option<u32>) {
        if let Some(max_rounds) = max_rounds.filter(|m| *m > 0) {
            self.state.max_tool_rounds = max_rounds;
        }
        self.state.active_tool_round = match round {
            Some(round) => round,
            None => self.state.active_tool_round.saturating_add(1),
        };
        if self.state.active_tool_round > self.state.max_tool_rounds {
            tracing::warn!(
                round = self.state.active_tool_round,
                max_rounds = self.state.max_tool_rounds,
                "tool round exceeds announced maximum"
            );
        }
    }

    /// Close the open stage's duration without entering a new one.
    pub fn finish(&mut self, now: Instant) {
        self.close_current(now);
        self.state.stage_started_at = None;
        self.state.in_tool_execution_phase = false;
    }

    pub fn reset(&mut self) {
        self.state = PipelineState {
            max_tool_rounds: self.default_max_tool_rounds,
            ..PipelineState::default()
        };
    }

    #[must_use]
    pub fn timings(&self) -> StageTimings {
        StageTimings::from(&self.state.stage_durations)
    }

    fn close_current(&mut self, now: Instant) {
        if let (Some(stage), Some(started_at)) =
            (self.state.current_stage, self.state.stage_started_at.take())
        {
            let elapsed = now.saturating_duration_since(started_at);
            *self.state.stage_durations.entry(stage).or_default() += elapsed;
        }
    }
}
