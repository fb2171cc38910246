//! Image format identification.
//!
//! This crate wraps the four formats the pipeline can read and write behind a
//! single [`ImageFormat`] enum, providing:
//!
//! - **Extension handling** ([`ImageFormat::from_extension`],
//!   [`normalize_extension`]) which is always
//!   case-insensitive, plus the canonical extension written for each format.
//! - **Content sniffing** via magic bytes ([`ImageFormat::from_magic_bytes`],
//!   [`ImageFormat::check_magic_bytes`]).
//! - **Parsing** from configuration strings through [`FromStr`](std::str::FromStr).

mod construct;
pub mod error;
mod util;

pub use crate::construct::{SUPPORTED_EXTENSIONS, is_supported_extension, normalize_extension};

/// A supported image format.
///
/// Serves both as the inferred format of a source file and as the target
/// format of an encode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ImageFormat {
    /// JPEG (.jpg, .jpeg)
    Jpeg,
    /// PNG (.png)
    Png,
    /// WebP (.webp)
    Webp,
    /// AVIF (.avif)
    Avif,
}

impl ImageFormat {
    /// Every format, in display order.
    pub const ALL: [ImageFormat; 4] = [ImageFormat::Jpeg, ImageFormat::Png, ImageFormat::Webp, ImageFormat::Avif];

    /// JPEG cannot carry an alpha channel; anything with transparency has to
    /// be flattened before it is encoded as JPEG.
    #[inline]
    #[must_use]
    pub fn supports_alpha(&self) -> bool {
        !matches!(self, ImageFormat::Jpeg)
    }

    /// Whether the encoder for this format is driven by the quality setting.
    /// PNG uses its compression level instead.
    #[inline]
    #[must_use]
    pub fn uses_quality(&self) -> bool {
        !matches!(self, ImageFormat::Png)
    }
}
