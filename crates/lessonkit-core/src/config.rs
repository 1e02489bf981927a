use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const MIB: u64 = 1024 * 1024;
pub const GIB: u64 = 1024 * MIB;

/// Top-level configuration (loaded from lessonkit.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LessonkitConfig {
    pub logging: LoggingConfig,
    pub storage: StorageConfig,
    pub repository: RepositoryConfig,
    pub uploads: UploadConfig,
    pub authoring: AuthoringConfig,
}

impl LessonkitConfig {
    /// Read a TOML config file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing config: {}", path.display()))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (default: info); RUST_LOG takes precedence
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// In-process memory (tests, dry runs)
    #[default]
    Memory,
    /// Local directory under `root`
    Fs,
    /// S3-compatible object store
    S3,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Root directory for the fs backend
    pub root: PathBuf,
    /// S3 endpoint
    pub endpoint: String,
    /// S3 region (default: us-east-1)
    pub region: String,
    pub bucket: String,
    /// Refuse plaintext HTTP S3 endpoints
    pub enforce_tls: bool,
    /// First path segment of every uploaded asset
    pub namespace: String,
    /// Prefix of durable asset URLs; the object path is appended
    pub public_base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Object prefix for chapter and lesson documents
    pub prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Transfers allowed to run at once; the rest queue
    pub max_concurrent: usize,
    /// Bytes read from the source and written per storage call
    pub chunk_size: usize,
    pub limits: UploadLimitsConfig,
}

/// Size ceilings and allowed media types, shared by every upload surface
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadLimitsConfig {
    pub image_max_bytes: u64,
    /// In-lesson video ceiling
    pub video_max_bytes: u64,
    /// Webinar asset ceiling
    pub webinar_video_max_bytes: u64,
    pub image_types: Vec<String>,
    pub video_types: Vec<String>,
}

/// What happens to unsaved edits when the author moves to another lesson
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BufferPolicy {
    /// Drop the buffer; the next lesson starts empty
    #[default]
    Discard,
    /// Keep a buffer per lesson, hydrated from the repository on first visit
    Retain,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthoringConfig {
    pub buffer_policy: BufferPolicy,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Text,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            root: PathBuf::from("./lessonkit-data"),
            endpoint: "http://localhost:9000".into(),
            region: "us-east-1".into(),
            bucket: "lessonkit".into(),
            enforce_tls: false,
            namespace: "lessons".into(),
            public_base_url: "memory://lessonkit".into(),
        }
    }
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            prefix: "courses".into(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            chunk_size: (8 * MIB) as usize,
            limits: UploadLimitsConfig::default(),
        }
    }
}

impl Default for UploadLimitsConfig {
    fn default() -> Self {
        Self {
            image_max_bytes: 5 * MIB,
            video_max_bytes: 500 * MIB,
            webinar_video_max_bytes: 5 * GIB,
            image_types: vec![
                "image/jpeg".into(),
                "image/png".into(),
                "image/webp".into(),
                "image/gif".into(),
            ],
            video_types: vec![
                "video/mp4".into(),
                "video/webm".into(),
                "video/quicktime".into(),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[logging]
level = "debug"
format = "json"

[storage]
backend = "s3"
endpoint = "https://s3.example.com"
region = "eu-west-1"
bucket = "course-assets"
enforce_tls = true
namespace = "media"
public_base_url = "https://cdn.example.com"

[repository]
prefix = "catalog"

[uploads]
max_concurrent = 2
chunk_size = 1048576

[uploads.limits]
image_max_bytes = 1000
video_max_bytes = 2000
webinar_video_max_bytes = 3000
image_types = ["image/png"]
video_types = ["video/mp4"]

[authoring]
buffer_policy = "retain"
"#;
        let config: LessonkitConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.storage.backend, StorageBackend::S3);
        assert_eq!(config.storage.bucket, "course-assets");
        assert!(config.storage.enforce_tls);
        assert_eq!(config.storage.public_base_url, "https://cdn.example.com");
        assert_eq!(config.repository.prefix, "catalog");
        assert_eq!(config.uploads.max_concurrent, 2);
        assert_eq!(config.uploads.chunk_size, 1_048_576);
        assert_eq!(config.uploads.limits.image_max_bytes, 1000);
        assert_eq!(config.uploads.limits.image_types, vec!["image/png"]);
        assert_eq!(config.authoring.buffer_policy, BufferPolicy::Retain);
    }

    #[test]
    fn test_parse_defaults() {
        let config: LessonkitConfig = toml::from_str("").unwrap();

        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Text);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.storage.namespace, "lessons");
        assert_eq!(config.uploads.max_concurrent, 3);
        assert_eq!(config.uploads.limits.image_max_bytes, 5 * MIB);
        assert_eq!(config.uploads.limits.video_max_bytes, 500 * MIB);
        assert_eq!(config.uploads.limits.webinar_video_max_bytes, 5 * GIB);
        assert_eq!(config.authoring.buffer_policy, BufferPolicy::Discard);
    }

    #[test]
    fn test_parse_partial_config() {
        let toml_str = r#"
[uploads.limits]
video_max_bytes = 42
"#;
        let config: LessonkitConfig = toml::from_str(toml_str).unwrap();

        // Overridden
        assert_eq!(config.uploads.limits.video_max_bytes, 42);
        // Defaults
        assert_eq!(config.uploads.limits.image_max_bytes, 5 * MIB);
        assert_eq!(config.uploads.limits.video_types.len(), 3);
        assert_eq!(config.uploads.chunk_size, (8 * MIB) as usize);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = LessonkitConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.repository.prefix, "courses");
    }

    #[test]
    fn test_load_rejects_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lessonkit.toml");
        std::fs::write(&path, "[uploads\nmax_concurrent = ").unwrap();
        let err = LessonkitConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("parsing config"));
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = LessonkitConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: LessonkitConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.storage.endpoint, parsed.storage.endpoint);
        assert_eq!(config.uploads.limits.image_types, parsed.uploads.limits.image_types);
        assert_eq!(config.authoring.buffer_policy, parsed.authoring.buffer_policy);
    }
}
