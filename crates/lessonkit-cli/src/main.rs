//! lessonkit: course authoring CLI
//!
//! Commands:
//!   import --chapter <id> ...        - build a lesson from flags, upload media, save
//!   chapter init --chapter <id> ...  - write a chapter structure document
//!   status --chapter <id>            - chapter structure and saved lesson content
//!   check <path>                     - validate a media file against the upload limits
//!   config show                      - display current configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use lessonkit_authoring::{
    AuthoringSession, CourseRepository, OpenDalCourseRepository, SaveOutcome, SessionEvent,
    UploadFile,
};
use lessonkit_core::config::{LessonkitConfig, LogFormat, LoggingConfig, StorageBackend};
use lessonkit_core::limits::kind_for_media_type;
use lessonkit_core::{
    BlockId, BlockKind, BlockPayload, ChapterStructure, LessonKind, LessonSummary, LimitTable,
    UploadSurface,
};
use lessonkit_storage::{build_operator, check_health, OpenDalAssetStorage, S3Credentials};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "lessonkit",
    version,
    about = "Course lesson authoring",
    long_about = "lessonkit: assemble lessons from content blocks, upload their media, and save them chapter by chapter"
)]
struct Cli {
    /// Path to lessonkit.toml configuration file
    #[arg(long, short = 'c', env = "LESSONKIT_CONFIG", default_value = "lessonkit.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build one lesson from the given blocks, upload its media and save it
    ///
    /// Blocks are added in this order: heading, text paragraphs, code, list,
    /// then one block per media file.
    Import {
        /// Chapter to author
        #[arg(long)]
        chapter: String,
        /// Lesson position within the chapter (0-based)
        #[arg(long, default_value_t = 0)]
        lesson: usize,
        #[arg(long)]
        heading: Option<String>,
        /// Text paragraph (repeatable)
        #[arg(long)]
        text: Vec<String>,
        #[arg(long)]
        code: Option<String>,
        /// List item (repeatable); all items go into one list block
        #[arg(long = "list")]
        list_items: Vec<String>,
        /// Image or video file (repeatable)
        #[arg(long)]
        media: Vec<PathBuf>,
        /// Move on to the next lesson after saving
        #[arg(long)]
        advance: bool,
    },

    /// Chapter structure management
    Chapter {
        #[command(subcommand)]
        action: ChapterAction,
    },

    /// Show a chapter's lessons and their saved content
    Status {
        #[arg(long)]
        chapter: String,
    },

    /// Validate a media file against the upload limits without uploading it
    Check {
        path: PathBuf,
        #[arg(long, value_enum, default_value_t = SurfaceArg::Lesson)]
        surface: SurfaceArg,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ChapterAction {
    /// Write (or replace) a chapter structure document
    Init {
        #[arg(long)]
        chapter: String,
        /// Lesson title, in chapter order (repeatable)
        #[arg(long = "lesson", required = true)]
        lessons: Vec<String>,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SurfaceArg {
    Lesson,
    Webinar,
}

impl From<SurfaceArg> for UploadSurface {
    fn from(arg: SurfaceArg) -> Self {
        match arg {
            SurfaceArg::Lesson => UploadSurface::Lesson,
            SurfaceArg::Webinar => UploadSurface::Webinar,
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (config, found) = load_config(&cli.config)?;
    init_logging(&config.logging);
    if !found {
        tracing::warn!(
            "config file not found: {}  (using defaults)",
            cli.config.display()
        );
    }

    match cli.command {
        Commands::Import {
            chapter,
            lesson,
            heading,
            text,
            code,
            list_items,
            media,
            advance,
        } => {
            let draft = LessonDraft {
                heading,
                text,
                code,
                list_items,
                media,
            };
            cmd_import(&config, &chapter, lesson, draft, advance).await
        }
        Commands::Chapter {
            action: ChapterAction::Init { chapter, lessons },
        } => cmd_chapter_init(&config, &chapter, &lessons).await,
        Commands::Status { chapter } => cmd_status(&config, &chapter).await,
        Commands::Check { path, surface } => cmd_check(&config, &path, surface.into()).await,
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &cli.config),
    }
}

/// Load the config file; `false` when it is missing and defaults are used.
/// Reported by the caller once logging is up.
fn load_config(path: &Path) -> Result<(LessonkitConfig, bool)> {
    let found = path.exists();
    let config = LessonkitConfig::load(path)?;
    Ok((config, found))
}

fn init_logging(cfg: &LoggingConfig) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.level));

    match cfg.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Backends ──────────────────────────────────────────────────────────────────

/// S3 credentials from the environment; other backends need none.
///
/// Reads AWS_ACCESS_KEY_ID / AWS_SECRET_ACCESS_KEY, falling back to
/// LESSONKIT_ACCESS_KEY_ID / LESSONKIT_SECRET_ACCESS_KEY.
fn credentials_from_env(config: &LessonkitConfig) -> Result<Option<S3Credentials>> {
    if config.storage.backend != StorageBackend::S3 {
        return Ok(None);
    }
    let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
        .or_else(|_| std::env::var("LESSONKIT_ACCESS_KEY_ID"))
        .context(
            "S3 credentials not set\n\
             Set AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY environment variables.\n\
             Example:\n\
             \texport AWS_ACCESS_KEY_ID=your-key\n\
             \texport AWS_SECRET_ACCESS_KEY=your-secret",
        )?;
    let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
        .or_else(|_| std::env::var("LESSONKIT_SECRET_ACCESS_KEY"))
        .context("AWS_SECRET_ACCESS_KEY environment variable not set")?;
    Ok(Some(S3Credentials {
        access_key_id,
        secret_access_key,
    }))
}

struct Backends {
    op: opendal::Operator,
    storage: Arc<OpenDalAssetStorage>,
    repository: Arc<OpenDalCourseRepository>,
}

fn open_backends(config: &LessonkitConfig) -> Result<Backends> {
    if config.storage.backend == StorageBackend::Memory {
        eprintln!("note: storage.backend = \"memory\"; nothing is kept after this command exits");
    }
    let credentials = credentials_from_env(config)?;
    let op = build_operator(&config.storage, credentials.as_ref())
        .context("building storage operator")?;
    Ok(Backends {
        storage: Arc::new(OpenDalAssetStorage::new(
            op.clone(),
            config.storage.public_base_url.clone(),
        )),
        repository: Arc::new(OpenDalCourseRepository::new(
            op.clone(),
            &config.repository.prefix,
        )),
        op,
    })
}

// ── Progress bar helpers ──────────────────────────────────────────────────────

fn make_progress_bar(multi: &MultiProgress, total: u64, prefix: &str) -> ProgressBar {
    let pb = multi.add(ProgressBar::new(total));
    pb.set_style(
        ProgressStyle::with_template(
            "{prefix:.bold} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-"),
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn make_spinner(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{prefix:.bold} {spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

// ── `lessonkit import` ────────────────────────────────────────────────────────

struct LessonDraft {
    heading: Option<String>,
    text: Vec<String>,
    code: Option<String>,
    list_items: Vec<String>,
    media: Vec<PathBuf>,
}

async fn cmd_import(
    config: &LessonkitConfig,
    chapter: &str,
    lesson: usize,
    draft: LessonDraft,
    advance: bool,
) -> Result<()> {
    let backends = open_backends(config)?;
    let mut session = AuthoringSession::open(
        chapter,
        backends.repository.clone(),
        backends.storage.clone(),
        config,
    )
    .await
    .with_context(|| format!("opening chapter {chapter}"))?;
    if lesson != session.navigator().current_index() {
        session
            .select_lesson(lesson)
            .await
            .with_context(|| format!("selecting lesson {lesson}"))?;
    }
    let title = session.navigator().current_lesson().title.clone();
    println!(
        "Authoring {chapter} / lesson {} of {}: {title}",
        lesson + 1,
        session.navigator().total_lessons()
    );

    if let Some(heading) = draft.heading {
        add_with_payload(&mut session, BlockKind::Heading, BlockPayload::Heading(heading))?;
    }
    for paragraph in draft.text {
        add_with_payload(&mut session, BlockKind::Text, BlockPayload::Text(paragraph))?;
    }
    if let Some(code) = draft.code {
        add_with_payload(&mut session, BlockKind::Code, BlockPayload::Code(code))?;
    }
    if !draft.list_items.is_empty() {
        add_with_payload(&mut session, BlockKind::List, BlockPayload::List(draft.list_items))?;
    }

    let multi = MultiProgress::new();
    let mut bars: HashMap<BlockId, ProgressBar> = HashMap::new();
    for path in &draft.media {
        let file = UploadFile::from_path(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let kind = kind_for_media_type(&file.media_type).with_context(|| {
            format!(
                "{}: cannot tell image from video (media type {})",
                path.display(),
                file.media_type
            )
        })?;
        let name = file.file_name.clone();
        let total = file.byte_size;

        let block_id = session.add_block(kind);
        session
            .begin_upload(block_id, file)
            .with_context(|| format!("uploading {}", path.display()))?;
        let pb = make_progress_bar(&multi, total, kind.as_str());
        pb.set_message(name);
        bars.insert(block_id, pb);
    }

    let mut failures = 0usize;
    while let Some(event) = session.next_event().await {
        let Some(pb) = bars.get(&event.block_id()) else {
            continue;
        };
        match event {
            SessionEvent::UploadStarted { .. } => pb.set_position(0),
            SessionEvent::UploadProgress {
                bytes_transferred, ..
            } => pb.set_position(bytes_transferred),
            SessionEvent::UploadCompleted { asset, .. } => {
                pb.set_position(asset.byte_size);
                pb.finish_with_message(asset.asset_url);
            }
            SessionEvent::UploadFailed { error, .. } => {
                failures += 1;
                pb.abandon_with_message(format!("FAILED: {error}"));
            }
        }
    }
    if failures > 0 {
        anyhow::bail!("{failures} upload(s) failed; lesson not saved");
    }

    let blocks = session.blocks().len();
    let pb = make_spinner("save");
    pb.set_message(format!("{blocks} blocks"));
    if advance {
        let outcome = session
            .save_and_advance()
            .await
            .context("saving lesson")?;
        pb.finish_with_message("done".to_string());
        match outcome {
            SaveOutcome::Advanced { lesson_index } => {
                let next = &session.navigator().current_lesson().title;
                println!("Saved {blocks} blocks; next up: lesson {} ({next})", lesson_index + 1);
            }
            SaveOutcome::ChapterCompleted => {
                println!("Saved {blocks} blocks; chapter {chapter} complete");
            }
        }
    } else {
        session.save().await.context("saving lesson")?;
        pb.finish_with_message("done".to_string());
        println!("Saved {blocks} blocks");
    }
    println!("  progress: {:.0}%", session.progress().percent());

    Ok(())
}

fn add_with_payload(
    session: &mut AuthoringSession,
    kind: BlockKind,
    payload: BlockPayload,
) -> Result<BlockId> {
    let id = session.add_block(kind);
    session
        .update_block(id, payload)
        .with_context(|| format!("filling {kind} block"))?;
    Ok(id)
}

// ── `lessonkit chapter init` ──────────────────────────────────────────────────

async fn cmd_chapter_init(config: &LessonkitConfig, chapter: &str, titles: &[String]) -> Result<()> {
    let backends = open_backends(config)?;
    let structure = chapter_from_titles(chapter, titles);
    backends
        .repository
        .put_chapter_structure(&structure)
        .await
        .with_context(|| format!("writing chapter {chapter}"))?;

    println!("Chapter {chapter}: {} lessons", structure.total_lessons);
    for (i, lesson) in structure.lessons.iter().enumerate() {
        println!("  {:>3}. {} ({})", i + 1, lesson.title, lesson.id);
    }
    Ok(())
}

/// Lesson ids are `{chapter}-{n}`, numbered from 1
fn chapter_from_titles(chapter: &str, titles: &[String]) -> ChapterStructure {
    let lessons = titles
        .iter()
        .enumerate()
        .map(|(i, title)| LessonSummary {
            id: format!("{chapter}-{}", i + 1),
            title: title.clone(),
            kind: LessonKind::Content,
        })
        .collect();
    ChapterStructure::new(chapter, lessons)
}

// ── `lessonkit status` ────────────────────────────────────────────────────────

async fn cmd_status(config: &LessonkitConfig, chapter: &str) -> Result<()> {
    let backends = open_backends(config)?;
    let storage_ok = check_health(&backends.op).await.is_ok();

    println!("lessonkit v{}", env!("CARGO_PKG_VERSION"));
    println!(
        "  storage:  {:?} [{}]",
        config.storage.backend,
        if storage_ok { "ok" } else { "UNREACHABLE" }
    );

    let structure = backends
        .repository
        .chapter_structure(chapter)
        .await
        .with_context(|| format!("loading chapter {chapter}"))?;
    println!("  chapter:  {} ({} lessons)", structure.chapter_id, structure.total_lessons);

    for (i, lesson) in structure.lessons.iter().enumerate() {
        let blocks = backends
            .repository
            .load_lesson_content(&lesson.id)
            .await
            .with_context(|| format!("loading lesson {}", lesson.id))?;
        let media: Vec<u64> = blocks
            .iter()
            .filter_map(|b| b.payload.asset().map(|a| a.byte_size))
            .collect();
        let state = if blocks.is_empty() {
            "empty".to_string()
        } else {
            format!(
                "{} blocks, {} uploaded ({})",
                blocks.len(),
                media.len(),
                fmt_bytes(media.iter().sum())
            )
        };
        println!("  {:>3}. {:<32} {state}", i + 1, lesson.title);
    }
    Ok(())
}

// ── `lessonkit check` ─────────────────────────────────────────────────────────

async fn cmd_check(config: &LessonkitConfig, path: &Path, surface: UploadSurface) -> Result<()> {
    let file = UploadFile::from_path(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let kind = kind_for_media_type(&file.media_type).with_context(|| {
        format!(
            "{}: unsupported media type {}",
            path.display(),
            file.media_type
        )
    })?;

    let limits = LimitTable::from_config(&config.uploads.limits);
    limits
        .validate(surface, kind, &file.media_type, file.byte_size)
        .with_context(|| format!("{} rejected", path.display()))?;

    println!(
        "{}: ok ({kind}, {}, {})",
        path.display(),
        file.media_type,
        fmt_bytes(file.byte_size)
    );
    Ok(())
}

// ── `lessonkit config show` ───────────────────────────────────────────────────

fn cmd_config_show(config: &LessonkitConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

fn fmt_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
