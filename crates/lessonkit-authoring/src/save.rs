//! Save coordinator: persist the current lesson and move on.

use lessonkit_core::{AuthoringResult, StateError};
use tracing::{info, warn};

use crate::session::AuthoringSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Saved and now editing the lesson at `lesson_index`
    Advanced { lesson_index: usize },
    /// Saved the last lesson; the chapter is complete
    ChapterCompleted,
}

impl AuthoringSession {
    /// Persist the current lesson without moving.
    ///
    /// On failure the buffer is left exactly as it was.
    pub async fn save(&mut self) -> AuthoringResult<()> {
        if self.buffer.is_empty() {
            return Err(StateError::EmptyLesson.into());
        }
        let in_flight = self.active_upload_count();
        if in_flight > 0 {
            return Err(StateError::UploadsInFlight(in_flight).into());
        }

        let lesson_id = self.navigator.lesson_id().to_string();
        let blocks = self.buffer.snapshot();
        if let Err(e) = self
            .repository
            .save_lesson_content(&lesson_id, &blocks)
            .await
        {
            warn!(lesson_id = %lesson_id, error = %e, "save failed, edits kept");
            return Err(e.into());
        }
        self.buffer.mark_clean();
        info!(lesson_id = %lesson_id, blocks = blocks.len(), "lesson saved");
        Ok(())
    }

    /// Save the current lesson, then advance to the next one or complete the
    /// chapter when this was the last lesson.
    pub async fn save_and_advance(&mut self) -> AuthoringResult<SaveOutcome> {
        self.save().await?;

        if self.navigator.is_last() {
            self.navigator.mark_completed();
            info!(
                chapter_id = %self.navigator.structure().chapter_id,
                "chapter completed"
            );
            return Ok(SaveOutcome::ChapterCompleted);
        }

        let lesson_index = self.navigator.current_index() + 1;
        self.select_lesson(lesson_index).await?;
        Ok(SaveOutcome::Advanced { lesson_index })
    }
}
