use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifier of a lesson as known to the course repository
pub type LessonId = String;

/// Identifier of a chapter as known to the course repository
pub type ChapterId = String;

/// Unique identifier of a content block (UUID v4)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(Uuid);

impl BlockId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for BlockId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for BlockId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Kind of a content block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Heading,
    Text,
    Code,
    List,
    Image,
    Video,
}

impl BlockKind {
    /// Image and video blocks carry a binary asset or an embed URL
    pub fn is_media(self) -> bool {
        matches!(self, BlockKind::Image | BlockKind::Video)
    }

    /// Empty payload a freshly added block of this kind starts with
    pub fn empty_payload(self) -> BlockPayload {
        match self {
            BlockKind::Heading => BlockPayload::Heading(String::new()),
            BlockKind::Text => BlockPayload::Text(String::new()),
            BlockKind::Code => BlockPayload::Code(String::new()),
            BlockKind::List => BlockPayload::List(Vec::new()),
            BlockKind::Image | BlockKind::Video => BlockPayload::Media(None),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BlockKind::Heading => "heading",
            BlockKind::Text => "text",
            BlockKind::Code => "code",
            BlockKind::List => "list",
            BlockKind::Image => "image",
            BlockKind::Video => "video",
        }
    }
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Descriptor of an asset that finished uploading to durable storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetDescriptor {
    pub asset_url: String,
    pub file_name: String,
    pub byte_size: u64,
}

/// Where the media of an image/video block lives.
///
/// A block holds at most one source, so an embed URL and an uploaded asset
/// can never both be set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum MediaSource {
    /// Externally hosted media (e.g. a video platform embed)
    Embed { embed_url: String },
    /// Media uploaded through the asset storage service
    Asset(AssetDescriptor),
}

/// Content of a block. The variant must match the block's [`BlockKind`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum BlockPayload {
    Heading(String),
    Text(String),
    Code(String),
    List(Vec<String>),
    /// Image or video; `None` while nothing usable is attached
    Media(Option<MediaSource>),
}

impl BlockPayload {
    pub fn matches_kind(&self, kind: BlockKind) -> bool {
        matches!(
            (self, kind),
            (BlockPayload::Heading(_), BlockKind::Heading)
                | (BlockPayload::Text(_), BlockKind::Text)
                | (BlockPayload::Code(_), BlockKind::Code)
                | (BlockPayload::List(_), BlockKind::List)
                | (BlockPayload::Media(_), BlockKind::Image | BlockKind::Video)
        )
    }

    pub fn asset(&self) -> Option<&AssetDescriptor> {
        match self {
            BlockPayload::Media(Some(MediaSource::Asset(asset))) => Some(asset),
            _ => None,
        }
    }

    pub fn embed_url(&self) -> Option<&str> {
        match self {
            BlockPayload::Media(Some(MediaSource::Embed { embed_url })) => Some(embed_url),
            _ => None,
        }
    }
}

/// State of an upload task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    /// Record created, nothing checked yet
    Idle,
    /// Type and size checks running
    Validating,
    /// Accepted, waiting for a free transfer slot
    Queued,
    /// Bytes are flowing to storage
    Uploading,
    Completed,
    Failed,
    Cancelled,
}

impl UploadState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            UploadState::Completed | UploadState::Failed | UploadState::Cancelled
        )
    }

    /// Legal edges of the upload state machine
    pub fn can_transition_to(self, next: UploadState) -> bool {
        use UploadState::*;
        matches!(
            (self, next),
            (Idle, Validating)
                | (Validating, Queued | Uploading)
                | (Queued, Uploading | Cancelled | Failed)
                | (Uploading, Completed | Failed | Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UploadState::Idle => "idle",
            UploadState::Validating => "validating",
            UploadState::Queued => "queued",
            UploadState::Uploading => "uploading",
            UploadState::Completed => "completed",
            UploadState::Failed => "failed",
            UploadState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upload status mirrored onto a block for display
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlockUploadState {
    pub state: UploadState,
    /// bytes transferred / total bytes, in `[0.0, 1.0]`
    pub progress_fraction: f64,
}

/// One unit of lesson content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentBlock {
    pub id: BlockId,
    pub kind: BlockKind,
    /// Display position key; unique within a lesson, gaps allowed
    pub order: u32,
    pub payload: BlockPayload,
    /// Transient, never persisted
    #[serde(skip)]
    pub upload_state: Option<BlockUploadState>,
}

impl ContentBlock {
    /// A new block of `kind` with an empty payload
    pub fn new(kind: BlockKind, order: u32) -> Self {
        Self {
            id: BlockId::new(),
            kind,
            order,
            payload: kind.empty_payload(),
            upload_state: None,
        }
    }
}

/// Kind of a lesson within a chapter (carried through, not interpreted)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LessonKind {
    #[default]
    Content,
    Video,
    Quiz,
    Assignment,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonSummary {
    pub id: LessonId,
    pub title: String,
    #[serde(default)]
    pub kind: LessonKind,
}

/// Ordered lessons of a chapter, as reported by the course repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterStructure {
    pub chapter_id: ChapterId,
    pub lessons: Vec<LessonSummary>,
    pub total_lessons: usize,
}

impl ChapterStructure {
    pub fn new(chapter_id: impl Into<ChapterId>, lessons: Vec<LessonSummary>) -> Self {
        let total_lessons = lessons.len();
        Self {
            chapter_id: chapter_id.into(),
            lessons,
            total_lessons,
        }
    }

    /// `total_lessons` agrees with the lesson list
    pub fn is_consistent(&self) -> bool {
        self.total_lessons == self.lessons.len()
    }
}

/// Position of the author within a chapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterProgress {
    pub current_lesson_index: usize,
    pub total_lessons: usize,
}

impl ChapterProgress {
    /// `(current_lesson_index + 1) / total_lessons * 100`
    pub fn percent(&self) -> f64 {
        if self.total_lessons == 0 {
            return 0.0;
        }
        (self.current_lesson_index + 1) as f64 / self.total_lessons as f64 * 100.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChapterStatus {
    InProgress,
    Completed,
}
