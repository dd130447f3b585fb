use rustc_hash::FxHashMap;
use serde::Serialize;
use serde_json::Value;

use crate::protocol::{ToolCallPatch, ToolSlot};

const UNKNOWN_TOOL_NAME: &str = "unknown_tool";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Running,
    Completed,
    Failed,
}

impl ToolCallStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, ToolCallStatus::Running)
    }
}

/// A tool invocation as seen by the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCall {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    /// Parsed arguments, or the raw buffer as a string while it is not yet
    /// valid JSON.
    pub arguments: Value,
    pub status: ToolCallStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
}

impl ToolCall {
    fn new(id: Option<String>, name: Option<String>) -> Self {
        Self {
            id,
            name: name.unwrap_or_default(),
            arguments: Value::Object(serde_json::Map::new()),
            status: ToolCallStatus::Running,
            result: None,
            error: None,
            server: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct ArgumentBuffer {
    raw: String,
    /// `raw` holds a fragment sequence that has not parsed yet.
    partial: bool,
}

/// Merges tool-call signals from every vocabulary into one list, one entry
/// per identity, in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct ToolCallTracker {
    calls: Vec<ToolCall>,
    buffers: Vec<ArgumentBuffer>,
    by_id: FxHashMap<String, usize>,
    by_name: FxHashMap<String, usize>,
    by_slot: FxHashMap<ToolSlot, usize>,
}

impl ToolCallTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn calls(&self) -> &[ToolCall] {
        &self.calls
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Merge an announcement (start, delta or stop) into the list.
    pub fn announce(&mut self, patch: ToolCallPatch) -> Option<&ToolCall> {
        let position = self.resolve_or_insert(&patch)?;
        self.merge(position, patch);
        self.calls.get(position)
    }

    /// Append a raw argument fragment for the call bound to `slot`.
    pub fn append_argument_fragment(&mut self, slot: ToolSlot, fragment: &str) {
        let Some(&position) = self.by_slot.get(&slot) else {
            tracing::debug!(?slot, "argument fragment for unbound tool slot");
            return;
        };
        self.push_fragment(position, fragment);
    }

    /// Finalize the argument buffer of the call bound to `slot`.
    pub fn seal_slot(&mut self, slot: ToolSlot) {
        let Some(&position) = self.by_slot.get(&slot) else {
            return;
        };
        let (Some(buffer), Some(call)) = (self.buffers.get_mut(position), self.calls.get_mut(position))
        else {
            return;
        };
        if !buffer.partial {
            return;
        }
        if buffer.raw.trim().is_empty() {
            buffer.partial = false;
            return;
        }
        match serde_json::from_str::<Value>(&buffer.raw) {
            Ok(value) => call.arguments = value,
            Err(err) => {
                tracing::warn!(
                    tool = %call.name,
                    "tool arguments are not valid JSON at block stop: {err}"
                );
                call.arguments = Value::String(buffer.raw.clone());
            }
        }
        buffer.partial = false;
    }

    pub fn mark_executing(&mut self, patch: ToolCallPatch) {
        let Some(position) = self.resolve_or_insert(&patch) else {
            tracing::debug!("tool execution signal without identity");
            return;
        };
        self.merge(position, patch);
        if let Some(call) = self.calls.get_mut(position) {
            if !call.status.is_terminal() {
                call.status = ToolCallStatus::Running;
            }
        }
    }

    pub fn record_result(&mut self, patch: ToolCallPatch, result: Value) {
        let Some(position) = self.resolve_or_insert(&patch) else {
            tracing::warn!("tool result without identity, dropping");
            return;
        };
        self.merge(position, patch);
        if let Some(call) = self.calls.get_mut(position) {
            call.result = Some(result);
            if call.status != ToolCallStatus::Failed {
                call.status = ToolCallStatus::Completed;
            }
        }
    }

    /// Record a failure. A failure that matches no known identity still
    /// creates an entry.
    pub fn record_failure(&mut self, mut patch: ToolCallPatch, error: String) {
        if patch.id.is_none() && patch.name.is_none() && self.bound_slot(&patch).is_none() {
            patch.name = Some(UNKNOWN_TOOL_NAME.to_string());
        }
        let Some(position) = self.resolve_or_insert(&patch) else {
            return;
        };
        self.merge(position, patch);
        if let Some(call) = self.calls.get_mut(position) {
            tracing::warn!(tool = %call.name, "tool call failed: {error}");
            call.status = ToolCallStatus::Failed;
            call.error = Some(error);
        }
    }

    /// Close out the list at turn end: calls that already carry a result are
    /// completed, the rest keep their status.
    pub fn finalize(&mut self) -> Vec<ToolCall> {
        let slots: Vec<ToolSlot> = self.by_slot.keys().copied().collect();
        for slot in slots {
            self.seal_slot(slot);
        }
        for call in &mut self.calls {
            if call.status == ToolCallStatus::Running && call.result.is_some() {
                call.status = ToolCallStatus::Completed;
            }
        }
        self.calls.clone()
    }

    pub fn reset(&mut self) {
        self.calls.clear();
        self.buffers.clear();
        self.by_id.clear();
        self.by_name.clear();
        self.by_slot.clear();
    }

    fn bound_slot(&self, patch: &ToolCallPatch) -> Option<usize> {
        patch.slot.and_then(|slot| self.by_slot.get(&slot).copied())
    }

    fn resolve(&self, patch: &ToolCallPatch) -> Option<usize> {
        if let Some(id) = patch.id.as_deref() {
            if let Some(&position) = self.by_id.get(id) {
                return Some(position);
            }
        }
        if let Some(position) = self.bound_slot(patch) {
            // Legacy indices restart every model call; a new id on an old
            // slot is a new call.
            match (&self.calls[position].id, &patch.id) {
                (Some(existing), Some(incoming)) if existing != incoming => {}
                _ => return Some(position),
            }
        }
        let name = patch.name.as_deref()?;
        let &position = self.by_name.get(name)?;
        // A later call of the same tool with its own id is a new call.
        match (&self.calls[position].id, &patch.id) {
            (Some(existing), Some(incoming)) if existing != incoming => None,
            _ => Some(position),
        }
    }

    fn resolve_or_insert(&mut self, patch: &ToolCallPatch) -> Option<usize> {
        if let Some(position) = self.resolve(patch) {
            if let Some(slot) = patch.slot {
                self.bind_slot(slot, position);
            }
            return Some(position);
        }
        if patch.id.is_none() && patch.name.is_none() {
            return None;
        }

        let position = self.calls.len();
        self.calls
            .push(ToolCall::new(patch.id.clone(), patch.name.clone()));
        self.buffers.push(ArgumentBuffer::default());
        if let Some(slot) = patch.slot {
            self.bind_slot(slot, position);
        }
        self.index_identity(position);
        Some(position)
    }

    /// Point `slot` at `position`, sealing whatever call held it before.
    fn bind_slot(&mut self, slot: ToolSlot, position: usize) {
        match self.by_slot.get(&slot) {
            Some(&bound) if bound == position => {}
            Some(_) => {
                self.seal_slot(slot);
                self.by_slot.insert(slot, position);
            }
            None => {
                self.by_slot.insert(slot, position);
            }
        }
    }

    fn index_identity(&mut self, position: usize) {
        let call = &self.calls[position];
        if let Some(id) = &call.id {
            self.by_id.insert(id.clone(), position);
        }
        if !call.name.is_empty() {
            self.by_name.insert(call.name.clone(), position);
        }
    }

    fn merge(&mut self, position: usize, patch: ToolCallPatch) {
        let Some(call) = self.calls.get_mut(position) else {
            return;
        };
        let mut reindex = false;
        if call.id.is_none() && patch.id.is_some() {
            call.id = patch.id;
            reindex = true;
        }
        if let Some(name) = patch.name {
            if call.name.is_empty() {
                call.name = name;
                reindex = true;
            }
        }
        if call.server.is_none() {
            call.server = patch.server;
        }
        if reindex {
            self.index_identity(position);
        }
        if let Some(arguments) = patch.arguments {
            self.merge_arguments(position, arguments);
        }
    }

    fn merge_arguments(&mut self, position: usize, arguments: Value) {
        match arguments {
            Value::Null => {}
            Value::String(text) => {
                let in_progress = self.buffers.get(position).is_some_and(|b| b.partial);
                if !in_progress {
                    if let Ok(value) = serde_json::from_str::<Value>(&text) {
                        self.replace_arguments(position, value);
                        return;
                    }
                }
                self.push_fragment(position, &text);
            }
            value => self.replace_arguments(position, value),
        }
    }

    fn replace_arguments(&mut self, position: usize, value: Value) {
        if let Some(buffer) = self.buffers.get_mut(position) {
            buffer.raw.clear();
            buffer.partial = false;
        }
        if let Some(call) = self.calls.get_mut(position) {
            call.arguments = value;
        }
    }

    fn push_fragment(&mut self, position: usize, fragment: &str) {
        let (Some(buffer), Some(call)) = (self.buffers.get_mut(position), self.calls.get_mut(position))
        else {
            return;
        };
        if !buffer.partial {
            buffer.raw.clear();
            buffer.partial = true;
        }
        buffer.raw.push_str(fragment);
        match serde_json::from_str::<Value>(&buffer.raw) {
            Ok(value) => {
                call.arguments = value;
                buffer.partial = false;
            }
            Err(_) => call.arguments = Value::String(buffer.raw.clone()),
        }
    }
}
