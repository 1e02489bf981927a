//! Authoring session: the edit buffer, its uploads, and chapter navigation.
//!
//! The session is owned by one caller and every mutation takes `&mut self`.
//! Transfers run on spawned tasks and only talk back through the upload event
//! channel; their effects land on the buffer when the caller drives
//! [`pump`](AuthoringSession::pump), [`next_event`](AuthoringSession::next_event)
//! or [`wait_for_uploads`](AuthoringSession::wait_for_uploads).

use lessonkit_core::config::{BufferPolicy, LessonkitConfig};
use lessonkit_core::{
    AssetDescriptor, AuthoringResult, BlockId, BlockKind, BlockPayload, BlockUploadState,
    ChapterProgress, ChapterStatus, ContentBlock, LessonId, LimitTable, MediaSource, StateError,
    TransferError, UploadState,
};
use lessonkit_storage::AssetStorage;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::blocks::LessonBuffer;
use crate::navigator::LessonNavigator;
use crate::repository::CourseRepository;
use crate::upload::{TaskId, TaskUpdate, UploadEvent, UploadFile, UploadManager, UploadTask};

/// Upload outcome applied to the buffer
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A queued upload got a transfer slot
    UploadStarted { block_id: BlockId },
    UploadProgress {
        block_id: BlockId,
        bytes_transferred: u64,
        total_bytes: u64,
    },
    UploadCompleted {
        block_id: BlockId,
        asset: AssetDescriptor,
    },
    UploadFailed {
        block_id: BlockId,
        error: TransferError,
    },
}

impl SessionEvent {
    pub fn block_id(&self) -> BlockId {
        match self {
            SessionEvent::UploadStarted { block_id }
            | SessionEvent::UploadProgress { block_id, .. }
            | SessionEvent::UploadCompleted { block_id, .. }
            | SessionEvent::UploadFailed { block_id, .. } => *block_id,
        }
    }
}

pub struct AuthoringSession {
    pub(crate) repository: Arc<dyn CourseRepository>,
    pub(crate) uploads: UploadManager,
    events: mpsc::UnboundedReceiver<UploadEvent>,
    pub(crate) navigator: LessonNavigator,
    pub(crate) buffer: LessonBuffer,
    /// Buffers of lessons visited earlier (retain policy only)
    parked: HashMap<LessonId, LessonBuffer>,
    policy: BufferPolicy,
}

impl AuthoringSession {
    /// Open a chapter for authoring, positioned on its first lesson.
    pub async fn open(
        chapter_id: &str,
        repository: Arc<dyn CourseRepository>,
        storage: Arc<dyn AssetStorage>,
        config: &LessonkitConfig,
    ) -> AuthoringResult<Self> {
        let structure = repository.chapter_structure(chapter_id).await?;
        let navigator = LessonNavigator::new(structure)?;
        let (uploads, events) =
            UploadManager::new(storage, &config.uploads, config.storage.namespace.clone());
        let policy = config.authoring.buffer_policy;

        let lesson_id = navigator.lesson_id().to_string();
        let buffer = match policy {
            BufferPolicy::Discard => LessonBuffer::new(lesson_id),
            BufferPolicy::Retain => {
                let blocks = repository.load_lesson_content(&lesson_id).await?;
                LessonBuffer::hydrate(lesson_id, blocks)?
            }
        };

        info!(
            chapter_id,
            lessons = navigator.total_lessons(),
            policy = ?policy,
            "authoring session opened"
        );
        Ok(Self {
            repository,
            uploads,
            events,
            navigator,
            buffer,
            parked: HashMap::new(),
            policy,
        })
    }

    // ── Blocks ───────────────────────────────────────────────────────────────

    pub fn add_block(&mut self, kind: BlockKind) -> BlockId {
        let id = self.buffer.add_block(kind);
        debug!(block_id = %id, kind = %kind, lesson_id = self.buffer.lesson_id(), "block added");
        id
    }

    /// Replace a block's payload.
    ///
    /// Assets only arrive through uploads, so an `Asset` payload is refused.
    /// Any other media payload displaces the block's upload: a live transfer
    /// is cancelled and a previously uploaded object is deleted.
    pub fn update_block(&mut self, id: BlockId, payload: BlockPayload) -> AuthoringResult<()> {
        let kind = self.existing(id)?.kind;
        if !payload.matches_kind(kind) {
            return Err(StateError::KindMismatch(kind).into());
        }
        if payload.asset().is_some() {
            return Err(StateError::InvalidTransition(format!(
                "block {id}: assets can only be attached by an upload"
            ))
            .into());
        }

        if kind.is_media() {
            self.uploads.discard(id);
            self.buffer.set_upload_state(id, None)?;
        }
        let previous = self.buffer.set_payload(id, payload)?;
        if let Some(asset) = previous.asset() {
            info!(block_id = %id, url = %asset.asset_url, "asset displaced");
            self.uploads.discard_remote(asset.asset_url.clone());
        }
        Ok(())
    }

    /// Remove a block. A transfer in flight for it is cancelled; the saved
    /// orders of the other blocks are not touched. An uploaded asset is
    /// deleted unless the saved lesson still references it.
    pub fn delete_block(&mut self, id: BlockId) -> AuthoringResult<ContentBlock> {
        self.existing(id)?;
        self.uploads.discard(id);
        let removed = self.buffer.delete_block(id)?;
        if let Some(asset) = removed.payload.asset() {
            if !self.buffer.is_saved_asset(&asset.asset_url) {
                info!(block_id = %id, url = %asset.asset_url, "deleting unsaved asset");
                self.uploads.discard_remote(asset.asset_url.clone());
            }
        }
        Ok(removed)
    }

    pub fn reorder_block(&mut self, id: BlockId, new_index: usize) -> AuthoringResult<()> {
        Ok(self.buffer.reorder_block(id, new_index)?)
    }

    // ── Uploads ──────────────────────────────────────────────────────────────

    /// Validate `file` for a media block and start its transfer.
    ///
    /// A block that already holds media must be cleared with
    /// [`remove_asset`](Self::remove_asset) (or an embed update) first.
    pub fn begin_upload(&mut self, block_id: BlockId, file: UploadFile) -> AuthoringResult<TaskId> {
        let block = self.existing(block_id)?;
        let kind = block.kind;
        if kind.is_media() && block.payload != BlockPayload::Media(None) {
            return Err(StateError::InvalidTransition(format!(
                "block {block_id} already holds media; remove it first"
            ))
            .into());
        }

        let lesson_id = self.navigator.lesson_id().to_string();
        let task_id = self.uploads.begin_upload(&lesson_id, block_id, kind, file)?;
        let state = self
            .uploads
            .task(block_id)
            .map(|t| t.state)
            .unwrap_or(UploadState::Queued);
        self.buffer.set_upload_state(
            block_id,
            Some(BlockUploadState {
                state,
                progress_fraction: 0.0,
            }),
        )?;
        Ok(task_id)
    }

    /// Clear a media block: cancel its transfer, empty the payload and delete
    /// the uploaded object.
    ///
    /// The local removal stands even when the remote delete fails; that
    /// failure is still returned.
    pub async fn remove_asset(&mut self, block_id: BlockId) -> AuthoringResult<()> {
        let kind = self.existing(block_id)?.kind;
        if !kind.is_media() {
            return Err(StateError::KindMismatch(kind).into());
        }

        self.uploads.discard(block_id);
        self.buffer.set_upload_state(block_id, None)?;
        let previous = self.buffer.set_payload(block_id, BlockPayload::Media(None))?;

        if let Some(asset) = previous.asset() {
            info!(block_id = %block_id, url = %asset.asset_url, "removing asset");
            self.uploads.delete_remote(&asset.asset_url).await?;
        }
        Ok(())
    }

    pub fn upload_task(&self, block_id: BlockId) -> Option<&UploadTask> {
        self.uploads.task(block_id)
    }

    /// Whether the current lesson has queued or running transfers
    pub fn has_active_uploads(&self) -> bool {
        self.uploads.has_active_uploads(self.navigator.lesson_id())
    }

    pub fn active_upload_count(&self) -> usize {
        self.uploads.active_count(self.navigator.lesson_id())
    }

    pub fn limits(&self) -> &LimitTable {
        self.uploads.limits()
    }

    // ── Event loop ───────────────────────────────────────────────────────────

    /// Apply every upload event already queued, without waiting.
    pub fn pump(&mut self) -> Vec<SessionEvent> {
        let mut applied = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            if let Some(event) = self.apply(event) {
                applied.push(event);
            }
        }
        applied
    }

    /// Wait for the next upload event that changes the buffer and apply it.
    /// `None` once nothing is queued or running.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        loop {
            let event = match self.events.try_recv() {
                Ok(event) => event,
                Err(_) if !self.uploads.has_any_active() => return None,
                Err(_) => self.events.recv().await?,
            };
            if let Some(event) = self.apply(event) {
                return Some(event);
            }
        }
    }

    /// Drive the loop until the current lesson has no live transfer.
    pub async fn wait_for_uploads(&mut self) -> Vec<SessionEvent> {
        let mut applied = Vec::new();
        while self.has_active_uploads() {
            match self.next_event().await {
                Some(event) => applied.push(event),
                None => break,
            }
        }
        applied.extend(self.pump());
        applied
    }

    fn apply(&mut self, event: UploadEvent) -> Option<SessionEvent> {
        let block_id = event.block_id;
        match self.uploads.apply(event) {
            TaskUpdate::Stale { orphan_url } => {
                if let Some(url) = orphan_url {
                    debug!(block_id = %block_id, url = %url, "late completion, deleting object");
                    self.uploads.discard_remote(url);
                }
                None
            }
            TaskUpdate::Started => {
                self.mirror_state(block_id, UploadState::Uploading, 0.0);
                Some(SessionEvent::UploadStarted { block_id })
            }
            TaskUpdate::Progress {
                bytes_transferred,
                total_bytes,
                fraction,
            } => {
                self.mirror_state(block_id, UploadState::Uploading, fraction);
                Some(SessionEvent::UploadProgress {
                    block_id,
                    bytes_transferred,
                    total_bytes,
                })
            }
            TaskUpdate::Completed(asset) => {
                let payload = BlockPayload::Media(Some(MediaSource::Asset(asset.clone())));
                if let Err(e) = self.buffer.set_payload(block_id, payload) {
                    warn!(block_id = %block_id, error = %e, "completed upload has no block");
                    self.uploads.discard_remote(asset.asset_url);
                    return None;
                }
                self.mirror_state(block_id, UploadState::Completed, 1.0);
                Some(SessionEvent::UploadCompleted { block_id, asset })
            }
            TaskUpdate::Failed(error) => {
                let fraction = self
                    .uploads
                    .task(block_id)
                    .map(UploadTask::progress_fraction)
                    .unwrap_or(0.0);
                self.mirror_state(block_id, UploadState::Failed, fraction);
                Some(SessionEvent::UploadFailed { block_id, error })
            }
        }
    }

    fn mirror_state(&mut self, block_id: BlockId, state: UploadState, progress_fraction: f64) {
        let mirrored = BlockUploadState {
            state,
            progress_fraction,
        };
        if let Err(e) = self.buffer.set_upload_state(block_id, Some(mirrored)) {
            debug!(block_id = %block_id, "upload state for missing block: {e}");
        }
    }

    // ── Navigation ───────────────────────────────────────────────────────────

    /// Move to lesson `index`.
    ///
    /// Live transfers of the lesson being left are cancelled. Under the
    /// discard policy its unsaved edits are dropped, along with uploaded
    /// assets no save references, and the new lesson starts empty; under the
    /// retain policy the buffer is kept for a later visit.
    pub async fn select_lesson(&mut self, index: usize) -> AuthoringResult<()> {
        self.navigator.check_index(index)?;
        if self.policy == BufferPolicy::Retain && index == self.navigator.current_index() {
            return Ok(());
        }

        let target = self
            .navigator
            .lesson_at(index)
            .map(|l| l.id.clone())
            .ok_or_else(|| StateError::InvalidTransition(format!("lesson index {index}")))?;
        let incoming = match self.policy {
            BufferPolicy::Discard => LessonBuffer::new(target.clone()),
            BufferPolicy::Retain => match self.parked.remove(&target) {
                Some(buffer) => buffer,
                None => {
                    let blocks = self.repository.load_lesson_content(&target).await?;
                    LessonBuffer::hydrate(target.clone(), blocks)?
                }
            },
        };

        self.leave_current_lesson();
        self.navigator.select(index)?;
        let outgoing = std::mem::replace(&mut self.buffer, incoming);
        if self.policy == BufferPolicy::Retain {
            self.parked.insert(outgoing.lesson_id().to_string(), outgoing);
        } else if outgoing.is_dirty() {
            info!(
                lesson_id = outgoing.lesson_id(),
                blocks = outgoing.len(),
                "discarding unsaved edits"
            );
            for url in outgoing.unsaved_assets() {
                debug!(lesson_id = outgoing.lesson_id(), url = %url, "deleting unsaved asset");
                self.uploads.discard_remote(url);
            }
        }

        debug!(lesson_index = index, lesson_id = %target, "lesson selected");
        Ok(())
    }

    pub async fn next(&mut self) -> AuthoringResult<()> {
        let index = self.navigator.current_index() + 1;
        self.select_lesson(index).await
    }

    pub async fn previous(&mut self) -> AuthoringResult<()> {
        let index = self.navigator.previous_index().ok_or_else(|| {
            StateError::InvalidTransition("already at the first lesson".to_string())
        })?;
        self.select_lesson(index).await
    }

    /// Cancel the current lesson's transfers and drop their records. Events
    /// still queued for them arrive stale, so a transfer that already
    /// committed has its object deleted instead of attached.
    fn leave_current_lesson(&mut self) {
        let lesson_id = self.navigator.lesson_id().to_string();
        let cancelled = self.uploads.abandon_lesson(&lesson_id);
        if cancelled.is_empty() {
            return;
        }
        info!(lesson_id = %lesson_id, count = cancelled.len(), "cancelled uploads on leaving lesson");
        for block_id in cancelled {
            let progress_fraction = self
                .buffer
                .block(block_id)
                .and_then(|b| b.upload_state)
                .map(|s| s.progress_fraction)
                .unwrap_or(0.0);
            self.mirror_state(block_id, UploadState::Cancelled, progress_fraction);
        }
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    pub fn lesson_id(&self) -> &str {
        self.navigator.lesson_id()
    }

    pub fn navigator(&self) -> &LessonNavigator {
        &self.navigator
    }

    pub fn buffer(&self) -> &LessonBuffer {
        &self.buffer
    }

    /// Blocks of the current lesson in display order
    pub fn blocks(&self) -> Vec<&ContentBlock> {
        self.buffer.ordered_blocks()
    }

    pub fn block(&self, id: BlockId) -> Option<&ContentBlock> {
        self.buffer.block(id)
    }

    pub fn progress(&self) -> ChapterProgress {
        self.navigator.progress()
    }

    pub fn chapter_status(&self) -> ChapterStatus {
        self.navigator.status()
    }

    pub fn buffer_policy(&self) -> BufferPolicy {
        self.policy
    }

    fn existing(&self, id: BlockId) -> Result<&ContentBlock, StateError> {
        self.buffer.block(id).ok_or(StateError::NotFound(id))
    }
}
