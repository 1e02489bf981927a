//! Shared fixtures: in-memory storage and repository with failure switches.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use lessonkit_authoring::{AuthoringSession, CourseRepository, OpenDalCourseRepository};
use lessonkit_core::config::{BufferPolicy, LessonkitConfig};
use lessonkit_core::{ChapterStructure, ContentBlock, LessonKind, LessonSummary, PersistenceError};
use lessonkit_storage::{AssetStorage, AssetWriter, OpenDalAssetStorage, StorageError};
use opendal::{ErrorKind, Operator};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

pub const CHAPTER: &str = "ch-1";

pub fn memory_operator() -> Operator {
    Operator::new(opendal::services::Memory::default())
        .expect("memory operator")
        .finish()
}

pub fn lesson_id(index: usize) -> String {
    format!("lesson-{index}")
}

// ── Asset storage ────────────────────────────────────────────────────────────

/// Memory-backed storage that records calls and can fail or hold writes.
pub struct ScriptedStorage {
    inner: OpenDalAssetStorage,
    pub opened: Mutex<Vec<String>>,
    pub deleted: Mutex<Vec<String>>,
    pub fail_writes: Arc<AtomicBool>,
    pub fail_deletes: AtomicBool,
    /// When set, every chunk write takes one permit
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedStorage {
    pub fn new(gated: bool) -> Self {
        Self {
            inner: OpenDalAssetStorage::new(memory_operator(), "memory://assets"),
            opened: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            fail_writes: Arc::new(AtomicBool::new(false)),
            fail_deletes: AtomicBool::new(false),
            gate: gated.then(|| Arc::new(Semaphore::new(0))),
        }
    }

    /// Let `chunks` more chunk writes through the gate
    pub fn release(&self, chunks: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(chunks);
        }
    }

    pub fn opened_count(&self) -> usize {
        self.opened.lock().unwrap().len()
    }

    pub fn deleted_urls(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn operator(&self) -> &Operator {
        self.inner.operator()
    }

    /// Paths of every committed object
    pub async fn stored_files(&self) -> Vec<String> {
        self.operator()
            .list_with("/")
            .recursive(true)
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.metadata().is_file())
            .map(|e| e.path().to_string())
            .collect()
    }

    /// Poll until at least `n` objects are committed
    pub async fn wait_for_files(&self, n: usize) {
        for _ in 0..200 {
            if self.stored_files().await.len() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("storage never reached {n} objects");
    }
}

#[async_trait]
impl AssetStorage for ScriptedStorage {
    async fn open_upload(&self, path: &str) -> Result<Box<dyn AssetWriter>, StorageError> {
        self.opened.lock().unwrap().push(path.to_string());
        let inner = self.inner.open_upload(path).await?;
        Ok(Box::new(ScriptedWriter {
            inner,
            fail: self.fail_writes.clone(),
            gate: self.gate.clone(),
        }))
    }

    async fn delete(&self, durable_url: &str) -> Result<(), StorageError> {
        self.deleted.lock().unwrap().push(durable_url.to_string());
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(opendal::Error::new(ErrorKind::PermissionDenied, "delete refused").into());
        }
        self.inner.delete(durable_url).await
    }
}

struct ScriptedWriter {
    inner: Box<dyn AssetWriter>,
    fail: Arc<AtomicBool>,
    gate: Option<Arc<Semaphore>>,
}

#[async_trait]
impl AssetWriter for ScriptedWriter {
    async fn write(&mut self, chunk: Bytes) -> Result<(), StorageError> {
        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(opendal::Error::new(ErrorKind::Unexpected, "connection reset")
                .set_temporary()
                .into());
        }
        self.inner.write(chunk).await
    }

    async fn finish(&mut self) -> Result<String, StorageError> {
        self.inner.finish().await
    }

    async fn abort(&mut self) -> Result<(), StorageError> {
        self.inner.abort().await
    }
}

// ── Course repository ────────────────────────────────────────────────────────

/// OpenDAL repository whose saves can be switched to fail
pub struct FlakyRepository {
    pub inner: OpenDalCourseRepository,
    pub fail_saves: AtomicBool,
    pub save_calls: AtomicUsize,
}

impl FlakyRepository {
    pub async fn with_chapter(lessons: usize) -> Self {
        let inner = OpenDalCourseRepository::new(memory_operator(), "courses");
        let summaries = (0..lessons)
            .map(|i| LessonSummary {
                id: lesson_id(i),
                title: format!("Lesson {}", i + 1),
                kind: LessonKind::Content,
            })
            .collect();
        inner
            .put_chapter_structure(&ChapterStructure::new(CHAPTER, summaries))
            .await
            .unwrap();
        Self {
            inner,
            fail_saves: AtomicBool::new(false),
            save_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl CourseRepository for FlakyRepository {
    async fn save_lesson_content(
        &self,
        lesson_id: &str,
        blocks: &[ContentBlock],
    ) -> Result<(), PersistenceError> {
        self.save_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(PersistenceError::RepositoryUnavailable(
                "503 service unavailable".into(),
            ));
        }
        self.inner.save_lesson_content(lesson_id, blocks).await
    }

    async fn load_lesson_content(
        &self,
        lesson_id: &str,
    ) -> Result<Vec<ContentBlock>, PersistenceError> {
        self.inner.load_lesson_content(lesson_id).await
    }

    async fn chapter_structure(
        &self,
        chapter_id: &str,
    ) -> Result<ChapterStructure, PersistenceError> {
        self.inner.chapter_structure(chapter_id).await
    }
}

// ── Session fixture ──────────────────────────────────────────────────────────

pub fn config(max_concurrent: usize, chunk_size: usize, policy: BufferPolicy) -> LessonkitConfig {
    let mut config = LessonkitConfig::default();
    config.uploads.max_concurrent = max_concurrent;
    config.uploads.chunk_size = chunk_size;
    config.authoring.buffer_policy = policy;
    config
}

pub struct Fixture {
    pub session: AuthoringSession,
    pub storage: Arc<ScriptedStorage>,
    pub repo: Arc<FlakyRepository>,
}

impl Fixture {
    pub async fn open(lessons: usize, config: LessonkitConfig) -> Self {
        Self::build(lessons, config, false).await
    }

    /// Chunk writes block until [`ScriptedStorage::release`]
    pub async fn open_gated(lessons: usize, config: LessonkitConfig) -> Self {
        Self::build(lessons, config, true).await
    }

    async fn build(lessons: usize, config: LessonkitConfig, gated: bool) -> Self {
        let storage = Arc::new(ScriptedStorage::new(gated));
        let repo = Arc::new(FlakyRepository::with_chapter(lessons).await);
        let session = AuthoringSession::open(CHAPTER, repo.clone(), storage.clone(), &config)
            .await
            .expect("open session");
        Self {
            session,
            storage,
            repo,
        }
    }
}

/// Give spawned transfer workers time to observe cancellation and exit
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
