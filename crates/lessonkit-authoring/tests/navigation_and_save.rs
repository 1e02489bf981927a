//! Integration tests: lesson navigation, buffer policies and the save coordinator.

mod common;

use common::{config, lesson_id, settle, Fixture, CHAPTER};
use lessonkit_authoring::{AuthoringSession, CourseRepository, SaveOutcome, UploadFile};
use lessonkit_core::config::BufferPolicy;
use lessonkit_core::{
    AuthoringError, BlockId, BlockKind, BlockPayload, ChapterStatus, ContentBlock, PersistenceError,
    StateError,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;

fn discard() -> lessonkit_core::config::LessonkitConfig {
    config(3, 1024, BufferPolicy::Discard)
}

fn retain() -> lessonkit_core::config::LessonkitConfig {
    config(3, 1024, BufferPolicy::Retain)
}

fn png(name: &str) -> UploadFile {
    UploadFile::from_bytes(name, "image/png", vec![0u8; 100])
}

fn asset_url(session: &AuthoringSession, block: BlockId) -> String {
    session
        .block(block)
        .and_then(|b| b.payload.asset())
        .map(|a| a.asset_url.clone())
        .expect("uploaded asset")
}

#[tokio::test]
async fn selecting_another_lesson_discards_unsaved_blocks() {
    let mut fx = Fixture::open(3, discard()).await;
    let s = &mut fx.session;
    let h = s.add_block(BlockKind::Heading);
    s.update_block(h, BlockPayload::Heading("Draft".into())).unwrap();
    s.add_block(BlockKind::Text);
    assert_eq!(s.blocks().len(), 2);

    s.select_lesson(1).await.unwrap();
    assert_eq!(s.lesson_id(), lesson_id(1));
    assert!(s.blocks().is_empty());

    s.select_lesson(0).await.unwrap();
    assert!(s.blocks().is_empty());
    assert!(fx.repo.load_lesson_content(&lesson_id(0)).await.unwrap().is_empty());
    assert_eq!(fx.repo.save_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn navigation_is_bounded() {
    let mut fx = Fixture::open(2, discard()).await;
    let s = &mut fx.session;

    assert!(matches!(
        s.previous().await,
        Err(AuthoringError::State(StateError::InvalidTransition(_)))
    ));
    assert!(matches!(
        s.select_lesson(2).await,
        Err(AuthoringError::State(StateError::InvalidTransition(_)))
    ));

    s.next().await.unwrap();
    assert_eq!(s.progress().current_lesson_index, 1);
    assert_eq!(s.progress().percent(), 100.0);
    assert!(s.next().await.is_err());

    s.previous().await.unwrap();
    assert_eq!(s.progress().percent(), 50.0);
}

#[tokio::test]
async fn leaving_a_lesson_cancels_its_uploads() {
    let mut fx = Fixture::open_gated(2, discard()).await;
    let image = fx.session.add_block(BlockKind::Image);
    fx.session
        .begin_upload(image, UploadFile::from_bytes("a.png", "image/png", vec![0u8; 2048]))
        .unwrap();
    assert!(fx.session.has_active_uploads());

    fx.session.select_lesson(1).await.unwrap();
    assert!(!fx.session.has_active_uploads());
    assert!(fx.session.upload_task(image).is_none());

    fx.storage.release(100);
    settle().await;
    assert!(fx.session.pump().is_empty());
    assert!(fx.session.next_event().await.is_none());
    assert!(fx.storage.stored_files().await.is_empty());
}

#[tokio::test]
async fn upload_committed_before_leaving_is_deleted() {
    let mut fx = Fixture::open(2, discard()).await;
    let image = fx.session.add_block(BlockKind::Image);
    fx.session.begin_upload(image, png("a.png")).unwrap();

    // The object is stored but its completion is still queued
    fx.storage.wait_for_files(1).await;
    settle().await;
    assert!(fx.session.has_active_uploads());
    let stored = fx.storage.stored_files().await;

    fx.session.select_lesson(1).await.unwrap();
    assert!(fx.session.pump().is_empty());
    settle().await;

    let deleted = fx.storage.deleted_urls();
    assert_eq!(deleted.len(), 1);
    assert!(deleted[0].ends_with(&stored[0]));
    assert!(fx.storage.stored_files().await.is_empty());
}

#[tokio::test]
async fn discarding_a_lesson_deletes_only_unsaved_assets() {
    let mut fx = Fixture::open(2, discard()).await;
    let kept = fx.session.add_block(BlockKind::Image);
    fx.session.begin_upload(kept, png("kept.png")).unwrap();
    fx.session.wait_for_uploads().await;
    fx.session.save().await.unwrap();
    let kept_url = asset_url(&fx.session, kept);

    let dropped = fx.session.add_block(BlockKind::Image);
    fx.session.begin_upload(dropped, png("dropped.png")).unwrap();
    fx.session.wait_for_uploads().await;
    let dropped_url = asset_url(&fx.session, dropped);

    fx.session.select_lesson(1).await.unwrap();
    settle().await;

    assert_eq!(fx.storage.deleted_urls(), vec![dropped_url]);
    let files = fx.storage.stored_files().await;
    assert_eq!(files.len(), 1);
    assert!(kept_url.ends_with(&files[0]));
}

#[tokio::test]
async fn deleting_a_block_removes_its_asset_unless_saved() {
    let mut fx = Fixture::open(1, discard()).await;
    let kept = fx.session.add_block(BlockKind::Image);
    fx.session.begin_upload(kept, png("kept.png")).unwrap();
    fx.session.wait_for_uploads().await;
    fx.session.save().await.unwrap();

    let dropped = fx.session.add_block(BlockKind::Image);
    fx.session.begin_upload(dropped, png("dropped.png")).unwrap();
    fx.session.wait_for_uploads().await;
    let dropped_url = asset_url(&fx.session, dropped);

    fx.session.delete_block(dropped).unwrap();
    settle().await;
    assert_eq!(fx.storage.deleted_urls(), vec![dropped_url.clone()]);

    // The saved lesson still points at this one
    fx.session.delete_block(kept).unwrap();
    settle().await;
    assert_eq!(fx.storage.deleted_urls(), vec![dropped_url]);
    assert_eq!(fx.storage.stored_files().await.len(), 1);
}

#[tokio::test]
async fn retained_buffers_survive_navigation() {
    let mut fx = Fixture::open_gated(2, retain()).await;
    let s = &mut fx.session;

    let h = s.add_block(BlockKind::Heading);
    s.update_block(h, BlockPayload::Heading("Kept".into())).unwrap();
    let image = s.add_block(BlockKind::Image);
    s.begin_upload(image, UploadFile::from_bytes("a.png", "image/png", vec![0u8; 64]))
        .unwrap();

    s.next().await.unwrap();
    assert!(s.blocks().is_empty());
    s.add_block(BlockKind::Code);

    s.previous().await.unwrap();
    let blocks = s.blocks();
    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[0].payload, BlockPayload::Heading("Kept".into()));
    // The transfer was cut short when the lesson was left
    assert_eq!(
        blocks[1].upload_state.map(|u| u.state),
        Some(lessonkit_core::UploadState::Cancelled)
    );
    assert_eq!(blocks[1].payload, BlockPayload::Media(None));
    assert!(s.buffer().is_dirty());

    s.next().await.unwrap();
    assert_eq!(s.blocks().len(), 1);
    assert_eq!(s.blocks()[0].kind, BlockKind::Code);

    // Re-selecting the current lesson keeps it as is
    s.select_lesson(1).await.unwrap();
    assert_eq!(s.blocks().len(), 1);
}

#[tokio::test]
async fn retained_policy_hydrates_from_the_repository() {
    let fx = Fixture::open(2, discard()).await;
    let mut saved = ContentBlock::new(BlockKind::Text, 7);
    saved.payload = BlockPayload::Text("from last week".into());
    fx.repo
        .save_lesson_content(&lesson_id(1), &[saved.clone()])
        .await
        .unwrap();

    let mut session = AuthoringSession::open(
        CHAPTER,
        fx.repo.clone(),
        fx.storage.clone(),
        &retain(),
    )
    .await
    .unwrap();
    assert!(session.blocks().is_empty());

    session.select_lesson(1).await.unwrap();
    assert_eq!(session.blocks(), vec![&saved]);
    assert!(!session.buffer().is_dirty());

    // New blocks sort after hydrated ones
    let id = session.add_block(BlockKind::Heading);
    assert_eq!(session.block(id).unwrap().order, 8);
}

#[tokio::test]
async fn save_and_advance_moves_to_an_empty_next_lesson() {
    let mut fx = Fixture::open(3, discard()).await;
    let s = &mut fx.session;
    let h = s.add_block(BlockKind::Heading);
    s.update_block(h, BlockPayload::Heading("Intro".into())).unwrap();
    let l = s.add_block(BlockKind::List);
    s.update_block(l, BlockPayload::List(vec!["one".into(), "two".into()]))
        .unwrap();
    s.reorder_block(l, 0).unwrap();
    let expected = s.buffer().snapshot();

    let outcome = s.save_and_advance().await.unwrap();
    assert_eq!(outcome, SaveOutcome::Advanced { lesson_index: 1 });
    assert!(s.blocks().is_empty());
    assert_eq!(s.lesson_id(), lesson_id(1));

    let stored = fx.repo.load_lesson_content(&lesson_id(0)).await.unwrap();
    assert_eq!(stored, expected);
    assert_eq!(stored[0].kind, BlockKind::List);
}

#[tokio::test]
async fn failed_save_leaves_the_buffer_untouched() {
    let mut fx = Fixture::open(2, discard()).await;
    let t = fx.session.add_block(BlockKind::Text);
    fx.session
        .update_block(t, BlockPayload::Text("precious".into()))
        .unwrap();
    fx.session.add_block(BlockKind::Code);
    let before = fx.session.buffer().clone();

    fx.repo.fail_saves.store(true, Ordering::SeqCst);
    let err = fx.session.save_and_advance().await.unwrap_err();
    assert!(matches!(
        err,
        AuthoringError::Persistence(PersistenceError::RepositoryUnavailable(_))
    ));
    assert!(err.is_retryable());
    assert_eq!(fx.session.buffer(), &before);
    assert_eq!(fx.session.progress().current_lesson_index, 0);

    fx.repo.fail_saves.store(false, Ordering::SeqCst);
    let outcome = fx.session.save_and_advance().await.unwrap();
    assert_eq!(outcome, SaveOutcome::Advanced { lesson_index: 1 });
    assert_eq!(fx.repo.save_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn saving_the_last_lesson_completes_the_chapter() {
    let mut fx = Fixture::open(2, discard()).await;
    fx.session.add_block(BlockKind::Heading);
    fx.session.save_and_advance().await.unwrap();

    fx.session.add_block(BlockKind::Text);
    assert_eq!(fx.session.chapter_status(), ChapterStatus::InProgress);
    let outcome = fx.session.save_and_advance().await.unwrap();
    assert_eq!(outcome, SaveOutcome::ChapterCompleted);
    assert_eq!(fx.session.chapter_status(), ChapterStatus::Completed);
    assert_eq!(fx.session.progress().percent(), 100.0);

    // The saved buffer stays on screen, clean
    assert_eq!(fx.session.blocks().len(), 1);
    assert!(!fx.session.buffer().is_dirty());
}

#[tokio::test]
async fn save_preconditions() {
    let mut fx = Fixture::open_gated(2, discard()).await;
    let err = fx.session.save_and_advance().await.unwrap_err();
    assert_eq!(err, AuthoringError::from(StateError::EmptyLesson));

    let image = fx.session.add_block(BlockKind::Image);
    fx.session
        .begin_upload(image, UploadFile::from_bytes("a.png", "image/png", vec![0u8; 16]))
        .unwrap();
    let err = fx.session.save().await.unwrap_err();
    assert_eq!(err, AuthoringError::from(StateError::UploadsInFlight(1)));
    assert_eq!(fx.repo.save_calls.load(Ordering::SeqCst), 0);

    fx.storage.release(10);
    fx.session.wait_for_uploads().await;
    fx.session.save().await.unwrap();
    assert_eq!(fx.session.progress().current_lesson_index, 0);

    let stored = fx.repo.load_lesson_content(&lesson_id(0)).await.unwrap();
    assert!(stored[0].payload.asset().is_some());
    assert!(stored[0].upload_state.is_none());
}

#[tokio::test]
async fn missing_or_empty_chapters_cannot_be_opened() {
    let fx = Fixture::open(1, discard()).await;
    let repo: Arc<dyn CourseRepository> = fx.repo.clone();

    let err = AuthoringSession::open("nope", repo.clone(), fx.storage.clone(), &discard())
        .await
        .err()
        .unwrap();
    assert_eq!(
        err,
        AuthoringError::from(PersistenceError::ChapterNotFound("nope".into()))
    );

    fx.repo
        .inner
        .put_chapter_structure(&lessonkit_core::ChapterStructure::new("empty", vec![]))
        .await
        .unwrap();
    let err = AuthoringSession::open("empty", repo, fx.storage.clone(), &discard())
        .await
        .err()
        .unwrap();
    assert!(matches!(
        err,
        AuthoringError::State(StateError::InvalidTransition(_))
    ));
}
