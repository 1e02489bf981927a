//! Upload task manager: one transfer per media block.
//!
//! `begin_upload` validates synchronously, records an [`UploadTask`] and spawns
//! a transfer worker. Workers stream the source chunk by chunk into an
//! [`AssetWriter`] and report back through an [`UploadEvent`] channel; they
//! never touch the edit buffer. The owner of the manager feeds those events
//! back through [`UploadManager::apply`], which ignores anything coming from a
//! task that is no longer the live task for its block.
//!
//! At most `max_concurrent` transfers hold a slot at once; the rest wait in
//! `Queued`. Every task carries a cancellation token that is checked before
//! each chunk and raced against every storage call.

use bytes::Bytes;
use lessonkit_core::config::UploadConfig;
use lessonkit_core::limits::media_type_from_extension;
use lessonkit_core::{
    AssetDescriptor, AuthoringResult, BlockId, BlockKind, LessonId, LimitTable, StateError,
    TransferError, UploadState, UploadSurface,
};
use lessonkit_storage::{asset_path, path::now_millis, AssetStorage, AssetWriter};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Monotonic per-manager task number
pub type TaskId = u64;

const FALLBACK_MEDIA_TYPE: &str = "application/octet-stream";

/// Where the bytes of an upload come from
#[derive(Debug, Clone)]
pub enum UploadSource {
    Memory(Bytes),
    /// Streamed from disk in `chunk_size` pieces
    Path(PathBuf),
}

/// A file offered for upload
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub file_name: String,
    pub media_type: String,
    pub byte_size: u64,
    pub source: UploadSource,
}

impl UploadFile {
    pub fn from_bytes(
        file_name: impl Into<String>,
        media_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        let data = data.into();
        Self {
            file_name: file_name.into(),
            media_type: media_type.into(),
            byte_size: data.len() as u64,
            source: UploadSource::Memory(data),
        }
    }

    /// Describe a local file; the media type is guessed from its extension.
    pub async fn from_path(path: &Path) -> std::io::Result<Self> {
        let meta = tokio::fs::metadata(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let media_type = media_type_from_extension(&file_name)
            .unwrap_or(FALLBACK_MEDIA_TYPE)
            .to_string();
        Ok(Self {
            file_name,
            media_type,
            byte_size: meta.len(),
            source: UploadSource::Path(path.to_path_buf()),
        })
    }

    pub fn with_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = media_type.into();
        self
    }
}

/// Record of one transfer for one block
#[derive(Debug, Clone)]
pub struct UploadTask {
    pub task_id: TaskId,
    pub block_id: BlockId,
    pub lesson_id: LessonId,
    pub file_name: String,
    pub storage_path: String,
    pub bytes_transferred: u64,
    pub total_bytes: u64,
    pub state: UploadState,
    pub result_asset: Option<AssetDescriptor>,
    pub last_error: Option<TransferError>,
    cancel: CancellationToken,
}

impl UploadTask {
    fn transition(&mut self, next: UploadState) -> Result<(), StateError> {
        if !self.state.can_transition_to(next) {
            return Err(StateError::InvalidTransition(format!(
                "upload task {} cannot go from {} to {}",
                self.task_id, self.state, next
            )));
        }
        self.state = next;
        Ok(())
    }

    pub fn is_live(&self) -> bool {
        !self.state.is_terminal()
    }

    /// `bytes_transferred / total_bytes`; exactly 1.0 only once completed.
    pub fn progress_fraction(&self) -> f64 {
        match self.state {
            UploadState::Completed => 1.0,
            _ if self.total_bytes == 0 => 0.0,
            _ => self.bytes_transferred as f64 / self.total_bytes as f64,
        }
    }
}

/// Message from a transfer worker
#[derive(Debug, Clone)]
pub struct UploadEvent {
    pub task_id: TaskId,
    pub block_id: BlockId,
    pub kind: UploadEventKind,
}

#[derive(Debug, Clone)]
pub enum UploadEventKind {
    /// A queued task got a transfer slot
    Started,
    /// Always `bytes_transferred < total_bytes`; the last chunk is reported
    /// by `Completed`
    Progress {
        bytes_transferred: u64,
        total_bytes: u64,
    },
    Completed { asset_url: String },
    Failed(TransferError),
}

/// Result of feeding an [`UploadEvent`] to the manager
#[derive(Debug, Clone, PartialEq)]
pub enum TaskUpdate {
    /// The event belongs to a superseded or cancelled task. A finished
    /// object from such a task is returned so it can be deleted.
    Stale { orphan_url: Option<String> },
    Started,
    Progress {
        bytes_transferred: u64,
        total_bytes: u64,
        fraction: f64,
    },
    Completed(AssetDescriptor),
    Failed(TransferError),
}

pub struct UploadManager {
    storage: Arc<dyn AssetStorage>,
    limits: LimitTable,
    namespace: String,
    chunk_size: usize,
    slots: Arc<Semaphore>,
    tasks: HashMap<BlockId, UploadTask>,
    events: mpsc::UnboundedSender<UploadEvent>,
    next_task_id: TaskId,
}

impl UploadManager {
    /// Create a manager and the receiving end of its event channel.
    pub fn new(
        storage: Arc<dyn AssetStorage>,
        config: &UploadConfig,
        namespace: impl Into<String>,
    ) -> (Self, mpsc::UnboundedReceiver<UploadEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let manager = Self {
            storage,
            limits: LimitTable::from_config(&config.limits),
            namespace: namespace.into(),
            chunk_size: config.chunk_size.max(1),
            slots: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            tasks: HashMap::new(),
            events: tx,
            next_task_id: 1,
        };
        (manager, rx)
    }

    pub fn limits(&self) -> &LimitTable {
        &self.limits
    }

    pub fn task(&self, block_id: BlockId) -> Option<&UploadTask> {
        self.tasks.get(&block_id)
    }

    /// Live tasks belonging to `lesson_id`
    pub fn active_count(&self, lesson_id: &str) -> usize {
        self.tasks
            .values()
            .filter(|t| t.lesson_id == lesson_id && t.is_live())
            .count()
    }

    pub fn has_active_uploads(&self, lesson_id: &str) -> bool {
        self.active_count(lesson_id) > 0
    }

    pub(crate) fn has_any_active(&self) -> bool {
        self.tasks.values().any(UploadTask::is_live)
    }

    /// Validate `file` for a media block and start (or queue) its transfer.
    ///
    /// Must be called from within a tokio runtime. On any error no task is
    /// recorded and no storage call is made.
    pub fn begin_upload(
        &mut self,
        lesson_id: &str,
        block_id: BlockId,
        kind: BlockKind,
        file: UploadFile,
    ) -> AuthoringResult<TaskId> {
        if !kind.is_media() {
            return Err(StateError::KindMismatch(kind).into());
        }
        if let Some(existing) = self.tasks.get(&block_id).filter(|t| t.is_live()) {
            return Err(StateError::InvalidTransition(format!(
                "block {block_id} already has upload task {} in state {}",
                existing.task_id, existing.state
            ))
            .into());
        }

        let mut task = UploadTask {
            task_id: self.next_task_id,
            block_id,
            lesson_id: lesson_id.to_string(),
            file_name: file.file_name.clone(),
            storage_path: asset_path(&self.namespace, lesson_id, &file.file_name, now_millis()),
            bytes_transferred: 0,
            total_bytes: file.byte_size,
            state: UploadState::Idle,
            result_asset: None,
            last_error: None,
            cancel: CancellationToken::new(),
        };
        task.transition(UploadState::Validating)?;
        self.limits.validate(
            UploadSurface::Lesson,
            kind,
            &file.media_type,
            file.byte_size,
        )?;

        let permit = self.slots.clone().try_acquire_owned().ok();
        task.transition(if permit.is_some() {
            UploadState::Uploading
        } else {
            UploadState::Queued
        })?;
        self.next_task_id += 1;

        info!(
            block_id = %block_id,
            lesson_id,
            task_id = task.task_id,
            path = %task.storage_path,
            bytes = file.byte_size,
            state = %task.state,
            "upload accepted"
        );

        let job = TransferJob {
            task_id: task.task_id,
            block_id,
            path: task.storage_path.clone(),
            total_bytes: file.byte_size,
            source: file.source,
            chunk_size: self.chunk_size,
            cancel: task.cancel.clone(),
        };
        tokio::spawn(run_transfer(
            job,
            self.storage.clone(),
            self.slots.clone(),
            permit,
            self.events.clone(),
        ));

        let task_id = task.task_id;
        self.tasks.insert(block_id, task);
        Ok(task_id)
    }

    /// Fold a worker event into the task table.
    pub fn apply(&mut self, event: UploadEvent) -> TaskUpdate {
        let task = match self.tasks.get_mut(&event.block_id) {
            Some(task) if task.task_id == event.task_id && task.is_live() => task,
            _ => {
                let orphan_url = match event.kind {
                    UploadEventKind::Completed { asset_url } => Some(asset_url),
                    _ => None,
                };
                return TaskUpdate::Stale { orphan_url };
            }
        };

        match event.kind {
            UploadEventKind::Started => match task.transition(UploadState::Uploading) {
                Ok(()) => TaskUpdate::Started,
                Err(e) => {
                    debug!(task_id = task.task_id, "ignoring start: {e}");
                    TaskUpdate::Stale { orphan_url: None }
                }
            },
            UploadEventKind::Progress {
                bytes_transferred,
                total_bytes,
            } => {
                if task.state != UploadState::Uploading
                    || bytes_transferred < task.bytes_transferred
                    || bytes_transferred >= total_bytes
                {
                    debug!(
                        task_id = task.task_id,
                        bytes_transferred,
                        current = task.bytes_transferred,
                        "ignoring out-of-order progress"
                    );
                    return TaskUpdate::Stale { orphan_url: None };
                }
                task.bytes_transferred = bytes_transferred;
                task.total_bytes = total_bytes;
                TaskUpdate::Progress {
                    bytes_transferred,
                    total_bytes,
                    fraction: task.progress_fraction(),
                }
            }
            UploadEventKind::Completed { asset_url } => {
                if let Err(e) = task.transition(UploadState::Completed) {
                    debug!(task_id = task.task_id, "ignoring completion: {e}");
                    return TaskUpdate::Stale {
                        orphan_url: Some(asset_url),
                    };
                }
                task.bytes_transferred = task.total_bytes;
                let asset = AssetDescriptor {
                    asset_url,
                    file_name: task.file_name.clone(),
                    byte_size: task.total_bytes,
                };
                task.result_asset = Some(asset.clone());
                info!(
                    block_id = %task.block_id,
                    task_id = task.task_id,
                    url = %asset.asset_url,
                    bytes = asset.byte_size,
                    "upload completed"
                );
                TaskUpdate::Completed(asset)
            }
            UploadEventKind::Failed(error) => {
                if let Err(e) = task.transition(UploadState::Failed) {
                    debug!(task_id = task.task_id, "ignoring failure: {e}");
                    return TaskUpdate::Stale { orphan_url: None };
                }
                warn!(
                    block_id = %task.block_id,
                    task_id = task.task_id,
                    error = %error,
                    "upload failed"
                );
                task.last_error = Some(error.clone());
                TaskUpdate::Failed(error)
            }
        }
    }

    /// Cancel the live task of a block, if any. The record stays, in
    /// `Cancelled`, until [`discard`](Self::discard) removes it.
    pub fn cancel(&mut self, block_id: BlockId) -> bool {
        match self.tasks.get_mut(&block_id) {
            Some(task) if task.is_live() => {
                task.cancel.cancel();
                task.state = UploadState::Cancelled;
                info!(block_id = %block_id, task_id = task.task_id, "upload cancelled");
                true
            }
            _ => false,
        }
    }

    /// Cancel and forget the task of a block
    pub fn discard(&mut self, block_id: BlockId) -> Option<UploadTask> {
        self.cancel(block_id);
        self.tasks.remove(&block_id)
    }

    /// Cancel every live task of `lesson_id` and drop all of its records.
    /// Returns the blocks whose transfers were cut short.
    pub fn abandon_lesson(&mut self, lesson_id: &str) -> Vec<BlockId> {
        let blocks: Vec<BlockId> = self
            .tasks
            .values()
            .filter(|t| t.lesson_id == lesson_id)
            .map(|t| t.block_id)
            .collect();
        let mut cancelled = Vec::new();
        for block_id in blocks {
            if self.cancel(block_id) {
                cancelled.push(block_id);
            }
            self.tasks.remove(&block_id);
        }
        cancelled
    }

    /// Delete a finished object and wait for the outcome
    pub async fn delete_remote(&self, asset_url: &str) -> Result<(), TransferError> {
        self.storage.delete(asset_url).await.map_err(|e| {
            warn!(url = asset_url, error = %e, "failed to delete remote asset");
            TransferError::StorageService(e.to_string())
        })
    }

    /// Delete a finished object in the background
    pub fn discard_remote(&self, asset_url: String) {
        let storage = self.storage.clone();
        tokio::spawn(async move {
            match storage.delete(&asset_url).await {
                Ok(()) => debug!(url = %asset_url, "deleted orphaned asset"),
                Err(e) => warn!(url = %asset_url, error = %e, "failed to delete orphaned asset"),
            }
        });
    }
}

// ── Transfer worker ──────────────────────────────────────────────────────────

struct TransferJob {
    task_id: TaskId,
    block_id: BlockId,
    path: String,
    total_bytes: u64,
    source: UploadSource,
    chunk_size: usize,
    cancel: CancellationToken,
}

impl TransferJob {
    fn send(&self, tx: &mpsc::UnboundedSender<UploadEvent>, kind: UploadEventKind) {
        // The receiver only goes away with the session; nothing left to report to
        let _ = tx.send(UploadEvent {
            task_id: self.task_id,
            block_id: self.block_id,
            kind,
        });
    }
}

async fn run_transfer(
    job: TransferJob,
    storage: Arc<dyn AssetStorage>,
    slots: Arc<Semaphore>,
    permit: Option<OwnedSemaphorePermit>,
    tx: mpsc::UnboundedSender<UploadEvent>,
) {
    let _permit = match permit {
        Some(permit) => permit,
        None => {
            let acquired = tokio::select! {
                biased;
                _ = job.cancel.cancelled() => {
                    debug!(task_id = job.task_id, "cancelled while queued");
                    return;
                }
                acquired = slots.acquire_owned() => acquired,
            };
            match acquired {
                Ok(permit) => {
                    job.send(&tx, UploadEventKind::Started);
                    permit
                }
                Err(_) => {
                    job.send(
                        &tx,
                        UploadEventKind::Failed(TransferError::StorageService(
                            "transfer pool closed".into(),
                        )),
                    );
                    return;
                }
            }
        }
    };

    match transfer(&job, storage.as_ref(), &tx).await {
        Ok(Some(asset_url)) => job.send(&tx, UploadEventKind::Completed { asset_url }),
        Ok(None) => debug!(task_id = job.task_id, path = %job.path, "transfer cancelled"),
        Err(error) => job.send(&tx, UploadEventKind::Failed(error)),
    }
}

/// Stream the source into storage. `Ok(None)` means cancelled.
async fn transfer(
    job: &TransferJob,
    storage: &dyn AssetStorage,
    tx: &mpsc::UnboundedSender<UploadEvent>,
) -> Result<Option<String>, TransferError> {
    let opened = tokio::select! {
        biased;
        _ = job.cancel.cancelled() => None,
        opened = storage.open_upload(&job.path) => Some(opened),
    };
    let mut writer = match opened {
        None => return Ok(None),
        Some(writer) => writer?,
    };

    match stream_chunks(job, writer.as_mut(), tx).await {
        Ok(true) => {}
        Ok(false) => {
            abort_quietly(writer.as_mut(), &job.path).await;
            return Ok(None);
        }
        Err(e) => {
            abort_quietly(writer.as_mut(), &job.path).await;
            return Err(e);
        }
    }

    let finished = tokio::select! {
        biased;
        _ = job.cancel.cancelled() => None,
        finished = writer.finish() => Some(finished),
    };
    let asset_url = match finished {
        None => {
            abort_quietly(writer.as_mut(), &job.path).await;
            return Ok(None);
        }
        Some(url) => url?,
    };

    if job.cancel.is_cancelled() {
        // Committed just as the task was cancelled
        if let Err(e) = storage.delete(&asset_url).await {
            warn!(url = %asset_url, error = %e, "failed to delete asset of cancelled upload");
        }
        return Ok(None);
    }
    Ok(Some(asset_url))
}

/// Returns `Ok(false)` when cancelled part-way.
async fn stream_chunks(
    job: &TransferJob,
    writer: &mut dyn AssetWriter,
    tx: &mpsc::UnboundedSender<UploadEvent>,
) -> Result<bool, TransferError> {
    let mut reader = SourceReader::open(&job.source)
        .await
        .map_err(|e| TransferError::Source(e.to_string()))?;
    let mut sent = 0u64;

    loop {
        if job.cancel.is_cancelled() {
            return Ok(false);
        }
        let chunk = match reader
            .next_chunk(job.chunk_size)
            .await
            .map_err(|e| TransferError::Source(e.to_string()))?
        {
            Some(chunk) => chunk,
            None => break,
        };
        let len = chunk.len() as u64;
        if sent + len > job.total_bytes {
            return Err(TransferError::Source(format!(
                "source grew past {} bytes during upload",
                job.total_bytes
            )));
        }

        let written = tokio::select! {
            biased;
            _ = job.cancel.cancelled() => None,
            written = writer.write(chunk) => Some(written),
        };
        match written {
            None => return Ok(false),
            Some(result) => result?,
        }

        sent += len;
        if sent < job.total_bytes {
            debug!(task_id = job.task_id, sent, total = job.total_bytes, "chunk written");
            job.send(
                tx,
                UploadEventKind::Progress {
                    bytes_transferred: sent,
                    total_bytes: job.total_bytes,
                },
            );
        }
    }

    if sent != job.total_bytes {
        return Err(TransferError::Source(format!(
            "source ended after {sent} of {} bytes",
            job.total_bytes
        )));
    }
    Ok(true)
}

async fn abort_quietly(writer: &mut dyn AssetWriter, path: &str) {
    if let Err(e) = writer.abort().await {
        warn!(path, error = %e, "failed to abort partial upload");
    }
}

enum SourceReader {
    Memory { data: Bytes, offset: usize },
    File(tokio::fs::File),
}

impl SourceReader {
    async fn open(source: &UploadSource) -> std::io::Result<Self> {
        match source {
            UploadSource::Memory(data) => Ok(Self::Memory {
                data: data.clone(),
                offset: 0,
            }),
            UploadSource::Path(path) => Ok(Self::File(tokio::fs::File::open(path).await?)),
        }
    }

    async fn next_chunk(&mut self, max: usize) -> std::io::Result<Option<Bytes>> {
        match self {
            Self::Memory { data, offset } => {
                if *offset >= data.len() {
                    return Ok(None);
                }
                let end = (*offset + max).min(data.len());
                let chunk = data.slice(*offset..end);
                *offset = end;
                Ok(Some(chunk))
            }
            Self::File(file) => {
                let mut buf = vec![0u8; max];
                let mut filled = 0;
                while filled < max {
                    let n = file.read(&mut buf[filled..]).await?;
                    if n == 0 {
                        break;
                    }
                    filled += n;
                }
                if filled == 0 {
                    return Ok(None);
                }
                buf.truncate(filled);
                Ok(Some(Bytes::from(buf)))
            }
        }
    }
}
