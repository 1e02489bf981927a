//! Upload limit table shared by every upload surface.
//!
//! In-lesson media blocks and the webinar asset uploader validate against the
//! same table, built from `[uploads.limits]`, so the two surfaces can never
//! drift apart.

use serde::{Deserialize, Serialize};

use crate::config::UploadLimitsConfig;
use crate::error::ValidationError;
use crate::types::BlockKind;

/// Where an upload originates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadSurface {
    /// Image/video block inside a lesson
    #[default]
    Lesson,
    /// Standalone webinar recording
    Webinar,
}

/// Ceiling and accepted media types for one (surface, kind) pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRule {
    pub max_bytes: u64,
    pub allowed_types: Vec<String>,
}

impl MediaRule {
    pub fn allows_type(&self, media_type: &str) -> bool {
        let normalized = normalize_media_type(media_type);
        self.allowed_types
            .iter()
            .any(|t| t.eq_ignore_ascii_case(&normalized))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitTable {
    image: MediaRule,
    video: MediaRule,
    webinar_video: MediaRule,
}

impl LimitTable {
    pub fn from_config(cfg: &UploadLimitsConfig) -> Self {
        Self {
            image: MediaRule {
                max_bytes: cfg.image_max_bytes,
                allowed_types: cfg.image_types.clone(),
            },
            video: MediaRule {
                max_bytes: cfg.video_max_bytes,
                allowed_types: cfg.video_types.clone(),
            },
            webinar_video: MediaRule {
                max_bytes: cfg.webinar_video_max_bytes,
                allowed_types: cfg.video_types.clone(),
            },
        }
    }

    /// Rule for a media kind on a surface; `None` for non-media kinds.
    pub fn rule(&self, surface: UploadSurface, kind: BlockKind) -> Option<&MediaRule> {
        match (surface, kind) {
            (_, BlockKind::Image) => Some(&self.image),
            (UploadSurface::Lesson, BlockKind::Video) => Some(&self.video),
            (UploadSurface::Webinar, BlockKind::Video) => Some(&self.webinar_video),
            _ => None,
        }
    }

    /// Type check first, then size.
    pub fn validate(
        &self,
        surface: UploadSurface,
        kind: BlockKind,
        media_type: &str,
        byte_size: u64,
    ) -> Result<(), ValidationError> {
        let rule = match self.rule(surface, kind) {
            Some(rule) if rule.allows_type(media_type) => rule,
            _ => {
                return Err(ValidationError::InvalidType {
                    kind,
                    media_type: media_type.to_string(),
                })
            }
        };
        if byte_size > rule.max_bytes {
            return Err(ValidationError::TooLarge {
                kind,
                byte_size,
                max_bytes: rule.max_bytes,
            });
        }
        Ok(())
    }
}

impl Default for LimitTable {
    fn default() -> Self {
        Self::from_config(&UploadLimitsConfig::default())
    }
}

/// Lowercase and drop parameters: `Video/MP4; codecs="avc1"` -> `video/mp4`
pub fn normalize_media_type(media_type: &str) -> String {
    media_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Guess a media type from a file name extension
pub fn media_type_from_extension(file_name: &str) -> Option<&'static str> {
    let ext = file_name.rsplit_once('.')?.1.to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "mp4" | "m4v" => Some("video/mp4"),
        "webm" => Some("video/webm"),
        "mov" | "qt" => Some("video/quicktime"),
        _ => None,
    }
}

/// Block kind implied by a media type (`image/*` or `video/*`)
pub fn kind_for_media_type(media_type: &str) -> Option<BlockKind> {
    let normalized = normalize_media_type(media_type);
    if normalized.starts_with("image/") {
        Some(BlockKind::Image)
    } else if normalized.starts_with("video/") {
        Some(BlockKind::Video)
    } else {
        None
    }
}
