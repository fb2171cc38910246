use crate::ImageFormat;
use std::fmt::{Display, Formatter, Result as FmtResult};

impl Display for ImageFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}

impl AsRef<str> for ImageFormat {
    fn as_ref(&self) -> &'static str {
        self.as_str()
    }
}

impl ImageFormat {
    /// Returns the extension written for newly generated files of this format.
    #[inline]
    #[must_use]
    pub fn canonical_extension(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => ".jpg",
            ImageFormat::Png => ".png",
            ImageFormat::Webp => ".webp",
            ImageFormat::Avif => ".avif",
        }
    }

    /// Returns the short name used in configuration.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Png => "png",
            ImageFormat::Webp => "webp",
            ImageFormat::Avif => "avif",
        }
    }

    /// Returns the name shown to users.
    #[inline]
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "JPEG",
            ImageFormat::Png => "PNG",
            ImageFormat::Webp => "WebP",
            ImageFormat::Avif => "AVIF",
        }
    }

    /// Verify that `bytes` start with the signature of this format.
    ///
    /// Useful for cross-checking a format inferred from a file extension
    /// against the actual file contents.
    #[must_use]
    pub fn check_magic_bytes(&self, bytes: &[u8]) -> bool {
        Self::from_magic_bytes(bytes) == Some(*self)
    }
}
