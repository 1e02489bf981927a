//! lessonkit-authoring: lesson edit buffer, media uploads, navigation, saving

pub mod blocks;
pub mod navigator;
pub mod repository;
pub mod save;
pub mod session;
pub mod upload;

pub use blocks::LessonBuffer;
pub use navigator::LessonNavigator;
pub use repository::{CourseRepository, LessonDocument, OpenDalCourseRepository};
pub use save::SaveOutcome;
pub use session::{AuthoringSession, SessionEvent};
pub use upload::{
    TaskId, TaskUpdate, UploadEvent, UploadEventKind, UploadFile, UploadManager, UploadSource,
    UploadTask,
};
