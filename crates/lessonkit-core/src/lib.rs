pub mod config;
pub mod error;
pub mod limits;
pub mod types;

pub use error::{
    AuthoringError, AuthoringResult, PersistenceError, StateError, TransferError, ValidationError,
};
pub use limits::{LimitTable, MediaRule, UploadSurface};
pub use types::{
    AssetDescriptor, BlockId, BlockKind, BlockPayload, BlockUploadState, ChapterId,
    ChapterProgress, ChapterStatus, ChapterStructure, ContentBlock, LessonId, LessonKind,
    LessonSummary, MediaSource, UploadState,
};
