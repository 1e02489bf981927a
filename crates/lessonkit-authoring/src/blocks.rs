//! Edit buffer: the ordered block list of the lesson being authored.
//!
//! Blocks are stored in insertion order; display order comes from sorting on
//! `order`. Deleting a block leaves a gap instead of renumbering the rest.

use std::collections::HashSet;

use lessonkit_core::{
    BlockId, BlockKind, BlockPayload, BlockUploadState, ContentBlock, LessonId, PersistenceError,
    StateError,
};

#[derive(Debug, Clone, PartialEq)]
pub struct LessonBuffer {
    lesson_id: LessonId,
    blocks: Vec<ContentBlock>,
    /// Unsaved changes since creation, hydration, or the last save
    dirty: bool,
    /// Asset URLs referenced by the hydrated or last saved content
    saved_assets: HashSet<String>,
}

impl LessonBuffer {
    /// Empty buffer for `lesson_id`
    pub fn new(lesson_id: impl Into<LessonId>) -> Self {
        Self {
            lesson_id: lesson_id.into(),
            blocks: Vec::new(),
            dirty: false,
            saved_assets: HashSet::new(),
        }
    }

    /// Buffer populated from previously saved blocks.
    ///
    /// Rejects documents that break the block invariants (duplicate ids or
    /// orders, payload not matching the block kind).
    pub fn hydrate(
        lesson_id: impl Into<LessonId>,
        mut blocks: Vec<ContentBlock>,
    ) -> Result<Self, PersistenceError> {
        let lesson_id = lesson_id.into();
        let mut ids = HashSet::new();
        let mut orders = HashSet::new();
        for block in &mut blocks {
            if !ids.insert(block.id) {
                return Err(PersistenceError::Corrupt(format!(
                    "lesson {lesson_id}: duplicate block id {}",
                    block.id
                )));
            }
            if !orders.insert(block.order) {
                return Err(PersistenceError::Corrupt(format!(
                    "lesson {lesson_id}: duplicate order {}",
                    block.order
                )));
            }
            if !block.payload.matches_kind(block.kind) {
                return Err(PersistenceError::Corrupt(format!(
                    "lesson {lesson_id}: block {} payload does not match kind {}",
                    block.id, block.kind
                )));
            }
            block.upload_state = None;
        }
        let saved_assets = asset_urls(&blocks);
        Ok(Self {
            lesson_id,
            blocks,
            dirty: false,
            saved_assets,
        })
    }

    pub fn lesson_id(&self) -> &str {
        &self.lesson_id
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Record the current content as saved.
    pub fn mark_clean(&mut self) {
        self.saved_assets = asset_urls(&self.blocks);
        self.dirty = false;
    }

    /// Whether the hydrated or last saved content references `asset_url`
    pub fn is_saved_asset(&self, asset_url: &str) -> bool {
        self.saved_assets.contains(asset_url)
    }

    /// Asset URLs held by blocks that no saved content references
    pub fn unsaved_assets(&self) -> Vec<String> {
        self.ordered_blocks()
            .into_iter()
            .filter_map(|b| b.payload.asset())
            .filter(|a| !self.saved_assets.contains(&a.asset_url))
            .map(|a| a.asset_url.clone())
            .collect()
    }

    /// Append a block with an empty payload; its order sorts after every
    /// existing block. Orders are compacted to `0..n` when the highest one
    /// has no successor.
    pub fn add_block(&mut self, kind: BlockKind) -> BlockId {
        let order = match self.blocks.iter().map(|b| b.order).max() {
            None => 0,
            Some(highest) => match highest.checked_add(1) {
                Some(order) => order,
                None => {
                    let ids: Vec<BlockId> = self.ordered_blocks().iter().map(|b| b.id).collect();
                    self.renumber(&ids);
                    ids.len() as u32
                }
            },
        };
        let block = ContentBlock::new(kind, order);
        let id = block.id;
        self.blocks.push(block);
        self.dirty = true;
        id
    }

    pub fn block(&self, id: BlockId) -> Option<&ContentBlock> {
        self.blocks.iter().find(|b| b.id == id)
    }

    fn block_mut(&mut self, id: BlockId) -> Result<&mut ContentBlock, StateError> {
        self.blocks
            .iter_mut()
            .find(|b| b.id == id)
            .ok_or(StateError::NotFound(id))
    }

    /// Replace a block's payload and return the previous one.
    pub fn set_payload(
        &mut self,
        id: BlockId,
        payload: BlockPayload,
    ) -> Result<BlockPayload, StateError> {
        let block = self.block_mut(id)?;
        if !payload.matches_kind(block.kind) {
            return Err(StateError::KindMismatch(block.kind));
        }
        let previous = std::mem::replace(&mut block.payload, payload);
        self.dirty = true;
        Ok(previous)
    }

    /// Upload status shown on the block; not part of the saved content
    pub fn set_upload_state(
        &mut self,
        id: BlockId,
        state: Option<BlockUploadState>,
    ) -> Result<(), StateError> {
        self.block_mut(id)?.upload_state = state;
        Ok(())
    }

    /// Remove a block. Orders of the remaining blocks are left untouched.
    pub fn delete_block(&mut self, id: BlockId) -> Result<ContentBlock, StateError> {
        let pos = self
            .blocks
            .iter()
            .position(|b| b.id == id)
            .ok_or(StateError::NotFound(id))?;
        self.dirty = true;
        Ok(self.blocks.remove(pos))
    }

    /// Move a block to display position `new_index` (clamped to the end) and
    /// renumber every block `0..n` in the resulting display order.
    pub fn reorder_block(&mut self, id: BlockId, new_index: usize) -> Result<(), StateError> {
        let mut ids: Vec<BlockId> = self.ordered_blocks().iter().map(|b| b.id).collect();
        let from = ids
            .iter()
            .position(|b| *b == id)
            .ok_or(StateError::NotFound(id))?;
        let moved = ids.remove(from);
        ids.insert(new_index.min(ids.len()), moved);
        self.renumber(&ids);
        self.dirty = true;
        Ok(())
    }

    /// Set each block's order to its position in `ids`
    fn renumber(&mut self, ids: &[BlockId]) {
        for block in &mut self.blocks {
            if let Some(pos) = ids.iter().position(|b| *b == block.id) {
                block.order = pos as u32;
            }
        }
    }

    /// Blocks sorted by `order`
    pub fn ordered_blocks(&self) -> Vec<&ContentBlock> {
        let mut blocks: Vec<&ContentBlock> = self.blocks.iter().collect();
        blocks.sort_by_key(|b| b.order);
        blocks
    }

    /// Owned copy of the blocks in display order
    pub fn snapshot(&self) -> Vec<ContentBlock> {
        self.ordered_blocks().into_iter().cloned().collect()
    }
}

fn asset_urls(blocks: &[ContentBlock]) -> HashSet<String> {
    blocks
        .iter()
        .filter_map(|b| b.payload.asset())
        .map(|a| a.asset_url.clone())
        .collect()
}
