//! `MediaExternalizerStage`: moves inline media bytes above a size
//! threshold out of the conversation log and into the media storage
//! service, leaving a file path behind.
//!
//! The media storage service itself is an external collaborator; this
//! module defines the trait the pipeline calls and ships one concrete,
//! filesystem backed implementation so the stage is exercisable without
//! a real storage service wired in.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use harness_core::part::{Part, PartSource};
use std::path::PathBuf;
use thiserror::Error;

/// Default threshold above which an inline part's base64 payload is
/// externalized. 64 KiB keeps small image/audio fixtures inline while
/// moving anything large enough to bloat the conversation log.
pub const DEFAULT_EXTERNALIZE_THRESHOLD_BYTES: usize = 64 * 1024;

/// Errors raised while moving a part's bytes to external storage.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum MediaError {
    /// The backing storage write failed.
    #[error("failed to externalize media: {0}")]
    WriteFailed(String),
    /// The part's inline payload was not valid base64.
    #[error("invalid base64 payload: {0}")]
    InvalidPayload(String),
}

/// Moves one part's bytes to external storage, returning the path to
/// record on the part.
#[async_trait]
pub trait MediaExternalizer: Send + Sync {
    /// Write `part`'s inline bytes out and return the path they now live
    /// at. Only called for parts whose `inline_byte_len()` exceeds the
    /// configured threshold.
    async fn externalize(&self, part: &Part) -> Result<String, MediaError>;
}

/// Externalizes parts above [`DEFAULT_EXTERNALIZE_THRESHOLD_BYTES`] (or a
/// caller-chosen threshold) to flat files under a directory, named by a
/// random id plus an extension derived from the part's MIME type.
pub struct FsMediaExternalizer {
    dir: PathBuf,
    threshold_bytes: usize,
}

impl FsMediaExternalizer {
    /// Externalize to `dir` using the default threshold.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            threshold_bytes: DEFAULT_EXTERNALIZE_THRESHOLD_BYTES,
        }
    }

    /// Externalize to `dir` using a caller-chosen threshold.
    pub fn with_threshold(dir: impl Into<PathBuf>, threshold_bytes: usize) -> Self {
        Self {
            dir: dir.into(),
            threshold_bytes,
        }
    }

    /// Whether `part` is large enough to externalize.
    pub fn should_externalize(&self, part: &Part) -> bool {
        !part.is_externalized() && part.inline_byte_len() > self.threshold_bytes
    }
}

fn extension_for(media_type: &str) -> &'static str {
    match media_type {
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/webp" => "webp",
        "audio/wav" | "audio/wave" | "audio/x-wav" => "wav",
        "audio/mpeg" => "mp3",
        "video/mp4" => "mp4",
        _ => "bin",
    }
}

#[async_trait]
impl MediaExternalizer for FsMediaExternalizer {
    async fn externalize(&self, part: &Part) -> Result<String, MediaError> {
        let (media_type, data) = match part {
            Part::Image { media_type, source: PartSource::Inline { data }, .. }
            | Part::Audio { media_type, source: PartSource::Inline { data }, .. }
            | Part::Video { media_type, source: PartSource::Inline { data }, .. } => {
                (media_type.as_str(), data.as_str())
            }
            _ => return Err(MediaError::InvalidPayload("part has no inline source".into())),
        };
        let bytes = STANDARD
            .decode(data)
            .map_err(|e| MediaError::InvalidPayload(e.to_string()))?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| MediaError::WriteFailed(e.to_string()))?;
        let filename = format!("{}.{}", uuid::Uuid::new_v4(), extension_for(media_type));
        let path = self.dir.join(&filename);
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| MediaError::WriteFailed(e.to_string()))?;
        Ok(path.display().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_image() -> Part {
        Part::Image {
            media_type: "image/png".into(),
            source: PartSource::Inline { data: "AAAA".into() },
            width: None,
            height: None,
        }
    }

    #[test]
    fn small_parts_are_not_externalized() {
        let ext = FsMediaExternalizer::new("/tmp/arena-media-test");
        assert!(!ext.should_externalize(&small_image()));
    }

    #[test]
    fn large_parts_are_flagged() {
        let data = "A".repeat(200_000);
        let part = Part::Image {
            media_type: "image/png".into(),
            source: PartSource::Inline { data },
            width: None,
            height: None,
        };
        let ext = FsMediaExternalizer::new("/tmp/arena-media-test");
        assert!(ext.should_externalize(&part));
    }

    #[tokio::test]
    async fn externalize_writes_a_file_and_returns_its_path() {
        let dir = tempfile::tempdir().unwrap();
        let ext = FsMediaExternalizer::new(dir.path());
        let part = Part::Image {
            media_type: "image/png".into(),
            source: PartSource::Inline { data: "AAAA".into() },
            width: Some(1),
            height: Some(1),
        };
        let path = ext.externalize(&part).await.unwrap();
        assert!(tokio::fs::metadata(&path).await.is_ok());
    }
}
