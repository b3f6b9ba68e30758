//! Typed content parts carried by a [`crate::conversation::Message`].
//!
//! A part is either inline (its bytes live in the part itself, base64
//! encoded) or externalized (the bytes were written to the media storage
//! service and only a file path remains). [`MediaExternalizerStage`] in the
//! pipeline crate is what flips a part from inline to externalized; this
//! module only defines the shape.

use serde::{Deserialize, Serialize};

/// One piece of typed content within a message.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Part {
    /// Plain text.
    Text {
        /// The text content.
        text: String,
    },
    /// A still image.
    Image {
        /// MIME type, e.g. `image/png`.
        media_type: String,
        /// Where the bytes live.
        source: PartSource,
        /// Pixel width, if known.
        width: Option<u32>,
        /// Pixel height, if known.
        height: Option<u32>,
    },
    /// An audio clip, e.g. one duplex turn's input/output frames.
    Audio {
        /// MIME type, e.g. `audio/wav`.
        media_type: String,
        /// Where the bytes live.
        source: PartSource,
        /// Sample rate in Hz, if known.
        sample_rate: Option<u32>,
    },
    /// A video clip.
    Video {
        /// MIME type, e.g. `video/mp4`.
        media_type: String,
        /// Where the bytes live.
        source: PartSource,
        /// Pixel width, if known.
        width: Option<u32>,
        /// Pixel height, if known.
        height: Option<u32>,
    },
}

/// Where a part's bytes actually live.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PartSource {
    /// Base64-encoded bytes carried inline in the message.
    Inline {
        /// Base64-encoded payload.
        data: String,
    },
    /// Bytes were moved out to the media storage service; only the path
    /// remains. MIME type and dimensions stay on the owning [`Part`].
    File {
        /// Path under the media storage root.
        path: String,
    },
}

impl Part {
    /// A plain text part.
    pub fn text(s: impl Into<String>) -> Self {
        Part::Text { text: s.into() }
    }

    /// Size in bytes of the inline payload, decoded. Externalized parts
    /// report `0` — they've already been moved out and shouldn't be
    /// re-externalized.
    ///
    /// Uses the base64-encoded length's ceiling estimate (`len * 3 / 4`)
    /// rather than decoding, since the externalizer only needs a threshold
    /// comparison, not the exact byte count.
    pub fn inline_byte_len(&self) -> usize {
        match self.source() {
            Some(PartSource::Inline { data }) => data.len() * 3 / 4,
            _ => 0,
        }
    }

    /// Borrow this part's source, if it carries one (text parts don't).
    pub fn source(&self) -> Option<&PartSource> {
        match self {
            Part::Text { .. } => None,
            Part::Image { source, .. } | Part::Audio { source, .. } | Part::Video { source, .. } => {
                Some(source)
            }
        }
    }

    /// Replace this part's source with a file path, preserving MIME type
    /// and dimensions. No-op on text parts.
    pub fn externalize_to(&mut self, path: impl Into<String>) {
        let new_source = PartSource::File { path: path.into() };
        match self {
            Part::Text { .. } => {}
            Part::Image { source, .. } | Part::Audio { source, .. } | Part::Video { source, .. } => {
                *source = new_source;
            }
        }
    }

    /// True once this part's bytes have been moved to external storage.
    pub fn is_externalized(&self) -> bool {
        matches!(self.source(), Some(PartSource::File { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_parts_have_no_source() {
        let p = Part::text("hi");
        assert!(p.source().is_none());
        assert_eq!(p.inline_byte_len(), 0);
    }

    #[test]
    fn externalize_replaces_source_in_place() {
        let mut p = Part::Image {
            media_type: "image/png".into(),
            source: PartSource::Inline { data: "AAAA".into() },
            width: Some(10),
            height: Some(10),
        };
        p.externalize_to("media/abc.png");
        assert!(p.is_externalized());
        if let Part::Image { width, .. } = &p {
            assert_eq!(*width, Some(10));
        } else {
            panic!("expected image part");
        }
    }
}
