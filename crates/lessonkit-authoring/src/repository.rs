//! Course repository seam and its OpenDAL-backed implementation.
//!
//! Documents are JSON objects:
//!   `{prefix}/chapters/{chapter_id}.json` -> [`ChapterStructure`]
//!   `{prefix}/lessons/{lesson_id}.json`   -> [`LessonDocument`]

use async_trait::async_trait;
use lessonkit_core::{ChapterStructure, ContentBlock, LessonId, PersistenceError};
use opendal::{ErrorKind, Operator};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

const LESSON_DOC_VERSION: u32 = 1;

#[async_trait]
pub trait CourseRepository: Send + Sync {
    /// Replace the saved content of a lesson. `blocks` are in display order.
    async fn save_lesson_content(
        &self,
        lesson_id: &str,
        blocks: &[ContentBlock],
    ) -> Result<(), PersistenceError>;

    /// Saved content of a lesson; empty when nothing was saved yet.
    async fn load_lesson_content(&self, lesson_id: &str)
        -> Result<Vec<ContentBlock>, PersistenceError>;

    async fn chapter_structure(&self, chapter_id: &str)
        -> Result<ChapterStructure, PersistenceError>;
}

/// On-disk form of a saved lesson
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LessonDocument {
    pub version: u32,
    pub lesson_id: LessonId,
    /// Unix timestamp (seconds) of the save
    pub saved_at: u64,
    pub blocks: Vec<ContentBlock>,
}

#[derive(Clone)]
pub struct OpenDalCourseRepository {
    op: Operator,
    prefix: String,
}

impl OpenDalCourseRepository {
    pub fn new(op: Operator, prefix: &str) -> Self {
        Self {
            op,
            prefix: prefix.trim_matches('/').to_string(),
        }
    }

    pub fn operator(&self) -> &Operator {
        &self.op
    }

    fn key(&self, section: &str, id: &str) -> String {
        if self.prefix.is_empty() {
            format!("{section}/{id}.json")
        } else {
            format!("{}/{section}/{id}.json", self.prefix)
        }
    }

    pub fn chapter_key(&self, chapter_id: &str) -> String {
        self.key("chapters", chapter_id)
    }

    pub fn lesson_key(&self, lesson_id: &str) -> String {
        self.key("lessons", lesson_id)
    }

    /// Write (or replace) a chapter structure document.
    pub async fn put_chapter_structure(
        &self,
        structure: &ChapterStructure,
    ) -> Result<(), PersistenceError> {
        if !structure.is_consistent() {
            return Err(PersistenceError::Corrupt(format!(
                "chapter {}: total_lessons {} but {} lessons listed",
                structure.chapter_id,
                structure.total_lessons,
                structure.lessons.len()
            )));
        }
        let key = self.chapter_key(&structure.chapter_id);
        let body = serde_json::to_vec_pretty(structure)
            .map_err(|e| PersistenceError::Corrupt(e.to_string()))?;
        self.op.write(&key, body).await.map_err(unavailable)?;
        info!(
            chapter_id = %structure.chapter_id,
            lessons = structure.total_lessons,
            "chapter structure written"
        );
        Ok(())
    }

    /// Read a document; `None` when the object does not exist.
    async fn read_doc(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError> {
        match self.op.read(key).await {
            Ok(buf) => Ok(Some(buf.to_vec())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(unavailable(e)),
        }
    }
}

#[async_trait]
impl CourseRepository for OpenDalCourseRepository {
    async fn save_lesson_content(
        &self,
        lesson_id: &str,
        blocks: &[ContentBlock],
    ) -> Result<(), PersistenceError> {
        let doc = LessonDocument {
            version: LESSON_DOC_VERSION,
            lesson_id: lesson_id.to_string(),
            saved_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            blocks: blocks.to_vec(),
        };
        let body =
            serde_json::to_vec_pretty(&doc).map_err(|e| PersistenceError::Corrupt(e.to_string()))?;
        let key = self.lesson_key(lesson_id);
        self.op.write(&key, body).await.map_err(|e| {
            warn!(lesson_id, error = %e, "saving lesson content failed");
            unavailable(e)
        })?;
        info!(lesson_id, blocks = blocks.len(), key = %key, "lesson content saved");
        Ok(())
    }

    async fn load_lesson_content(
        &self,
        lesson_id: &str,
    ) -> Result<Vec<ContentBlock>, PersistenceError> {
        let key = self.lesson_key(lesson_id);
        let Some(body) = self.read_doc(&key).await? else {
            debug!(lesson_id, "no saved content");
            return Ok(Vec::new());
        };
        let doc: LessonDocument = serde_json::from_slice(&body)
            .map_err(|e| PersistenceError::Corrupt(format!("{key}: {e}")))?;
        if doc.version > LESSON_DOC_VERSION {
            return Err(PersistenceError::Corrupt(format!(
                "{key}: unsupported document version {}",
                doc.version
            )));
        }
        if doc.lesson_id != lesson_id {
            return Err(PersistenceError::Corrupt(format!(
                "{key}: document belongs to lesson {}",
                doc.lesson_id
            )));
        }
        debug!(lesson_id, blocks = doc.blocks.len(), "lesson content loaded");
        Ok(doc.blocks)
    }

    async fn chapter_structure(
        &self,
        chapter_id: &str,
    ) -> Result<ChapterStructure, PersistenceError> {
        let key = self.chapter_key(chapter_id);
        let body = self
            .read_doc(&key)
            .await?
            .ok_or_else(|| PersistenceError::ChapterNotFound(chapter_id.to_string()))?;
        let structure: ChapterStructure = serde_json::from_slice(&body)
            .map_err(|e| PersistenceError::Corrupt(format!("{key}: {e}")))?;
        if !structure.is_consistent() {
            return Err(PersistenceError::Corrupt(format!(
                "{key}: total_lessons {} but {} lessons listed",
                structure.total_lessons,
                structure.lessons.len()
            )));
        }
        Ok(structure)
    }
}

fn unavailable(e: opendal::Error) -> PersistenceError {
    PersistenceError::RepositoryUnavailable(e.to_string())
}
