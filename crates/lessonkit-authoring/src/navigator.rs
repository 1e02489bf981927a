//! Position of the author within a chapter.

use lessonkit_core::{ChapterProgress, ChapterStatus, ChapterStructure, LessonSummary, StateError};

#[derive(Debug, Clone)]
pub struct LessonNavigator {
    structure: ChapterStructure,
    current: usize,
    status: ChapterStatus,
}

impl LessonNavigator {
    /// Start at the first lesson. A chapter without lessons cannot be authored.
    pub fn new(structure: ChapterStructure) -> Result<Self, StateError> {
        if structure.lessons.is_empty() {
            return Err(StateError::InvalidTransition(format!(
                "chapter {} has no lessons",
                structure.chapter_id
            )));
        }
        Ok(Self {
            structure,
            current: 0,
            status: ChapterStatus::InProgress,
        })
    }

    pub fn structure(&self) -> &ChapterStructure {
        &self.structure
    }

    pub fn total_lessons(&self) -> usize {
        self.structure.lessons.len()
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current_lesson(&self) -> &LessonSummary {
        &self.structure.lessons[self.current]
    }

    pub fn lesson_id(&self) -> &str {
        &self.current_lesson().id
    }

    pub fn lesson_at(&self, index: usize) -> Option<&LessonSummary> {
        self.structure.lessons.get(index)
    }

    pub fn check_index(&self, index: usize) -> Result<(), StateError> {
        if index >= self.total_lessons() {
            return Err(StateError::InvalidTransition(format!(
                "lesson index {index} out of range (chapter has {} lessons)",
                self.total_lessons()
            )));
        }
        Ok(())
    }

    pub fn select(&mut self, index: usize) -> Result<(), StateError> {
        self.check_index(index)?;
        self.current = index;
        Ok(())
    }

    pub fn next_index(&self) -> Option<usize> {
        let next = self.current + 1;
        (next < self.total_lessons()).then_some(next)
    }

    pub fn previous_index(&self) -> Option<usize> {
        self.current.checked_sub(1)
    }

    pub fn is_last(&self) -> bool {
        self.current + 1 == self.total_lessons()
    }

    pub fn progress(&self) -> ChapterProgress {
        ChapterProgress {
            current_lesson_index: self.current,
            total_lessons: self.total_lessons(),
        }
    }

    pub fn status(&self) -> ChapterStatus {
        self.status
    }

    pub fn mark_completed(&mut self) {
        self.status = ChapterStatus::Completed;
    }
}
