use std::collections::BTreeMap;

use serde::Serialize;

use crate::protocol::{BlockKind, ToolMeta};

/// One indexed unit of streamed content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentBlock {
    pub index: usize,
    pub kind: BlockKind,
    pub content: String,
    pub complete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_id: Option<String>,
}

impl ContentBlock {
    fn new(index: usize, kind: BlockKind) -> Self {
        Self {
            index,
            kind,
            content: String::new(),
            complete: false,
            tool_name: None,
            tool_id: None,
        }
    }

    fn fill_tool_meta(&mut self, tool: &ToolMeta) {
        if self.tool_id.is_none() {
            self.tool_id.clone_from(&tool.id);
        }
        if self.tool_name.is_none() {
            self.tool_name.clone_from(&tool.name);
        }
    }
}

/// Result of [`ContentBlockAssembler::start_block`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStart {
    Created,
    /// Same-kind restart of an open block.
    Reopened,
    Rejected,
}

impl BlockStart {
    #[must_use]
    pub fn accepted(self) -> bool {
        !matches!(self, BlockStart::Rejected)
    }
}

/// Ordered collection of the turn's content blocks, keyed by stream index.
#[derive(Debug, Clone, Default)]
pub struct ContentBlockAssembler {
    blocks: BTreeMap<usize, ContentBlock>,
}

impl ContentBlockAssembler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_block(
        &mut self,
        index: usize,
        kind: BlockKind,
        tool: Option<&ToolMeta>,
    ) -> BlockStart {
        let Some(existing) = self.blocks.get_mut(&index) else {
            let mut block = ContentBlock::new(index, kind);
            if let Some(tool) = tool {
                block.fill_tool_meta(tool);
            }
            self.blocks.insert(index, block);
            return BlockStart::Created;
        };

        if existing.complete {
            tracing::debug!(index, "ignoring start for an already completed block");
            return BlockStart::Rejected;
        }
        if existing.kind != kind {
            tracing::error!(
                index,
                existing = ?existing.kind,
                requested = ?kind,
                "block index collision with a different kind, ignoring start"
            );
            return BlockStart::Rejected;
        }
        if let Some(tool) = tool {
            existing.fill_tool_meta(tool);
        }
        BlockStart::Reopened
    }

    /// Append text to the block at `index`, creating a text block if none
    /// exists. Returns `false` when the delta was dropped.
    pub fn append_delta(&mut self, index: usize, text: &str) -> bool {
        let block = self
            .blocks
            .entry(index)
            .or_insert_with(|| ContentBlock::new(index, BlockKind::Text));
        Self::push(block, text)
    }

    /// Like [`append_delta`](Self::append_delta) but the block must be of
    /// `kind`; a missing block is created with that kind.
    pub fn append_delta_as(&mut self, index: usize, kind: BlockKind, text: &str) -> bool {
        let block = self
            .blocks
            .entry(index)
            .or_insert_with(|| ContentBlock::new(index, kind));
        if block.kind != kind {
            tracing::warn!(
                index,
                existing = ?block.kind,
                delta = ?kind,
                "dropping delta whose kind does not match its block"
            );
            return false;
        }
        Self::push(block, text)
    }

    fn push(block: &mut ContentBlock, text: &str) -> bool {
        if block.complete {
            tracing::warn!(index = block.index, "dropping delta for a completed block");
            return false;
        }
        block.content.push_str(text);
        true
    }

    /// Mark the block complete. Returns `true` only on the first call for an
    /// existing block.
    pub fn complete_block(&mut self, index: usize) -> bool {
        match self.blocks.get_mut(&index) {
            Some(block) if !block.complete => {
                block.complete = true;
                true
            }
            Some(_) => false,
            None => {
                tracing::debug!(index, "stop for unknown block");
                false
            }
        }
    }

    pub fn complete_all(&mut self) {
        for block in self.blocks.values_mut() {
            block.complete = true;
        }
    }

    pub fn reset(&mut self) {
        self.blocks.clear();
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&ContentBlock> {
        self.blocks.get(&index)
    }

    /// Blocks in index order.
    pub fn blocks(&self) -> impl Iterator<Item = &ContentBlock> {
        self.blocks.values()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Concatenated content of every block of `kind`, in index order.
    #[must_use]
    pub fn text_of(&self, kind: BlockKind) -> String {
        self.blocks
            .values()
            .filter(|block| block.kind == kind)
            .map(|block| block.content.as_str())
            .collect()
    }

    #[must_use]
    pub fn has_kind(&self, kind: BlockKind) -> bool {
        self.blocks.values().any(|block| block.kind == kind)
    }
}
