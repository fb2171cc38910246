use crate::ImageFormat;
use crate::error::{Error, ErrorKind};
use std::{path::Path, str::FromStr};

/// Source extensions accepted as input, lower-cased and dot-prefixed.
pub const SUPPORTED_EXTENSIONS: [&str; 5] = [".jpg", ".jpeg", ".png", ".webp", ".avif"];

const JPEG_MAGIC: [u8; 3] = [0xFF, 0xD8, 0xFF];
const PNG_MAGIC: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
const RIFF_MAGIC: &[u8; 4] = b"RIFF";
const WEBP_MAGIC: &[u8; 4] = b"WEBP";
const FTYP_MAGIC: &[u8; 4] = b"ftyp";
const AVIF_BRANDS: [&[u8; 4]; 2] = [b"avif", b"avis"];

/// Lower-cased, dot-prefixed extension of `path` (`"photo.JPG"` → `".jpg"`).
///
/// Returns `None` when the file name has no extension at all, including
/// dotfiles such as `.png` and names ending in a bare dot.
#[must_use]
pub fn normalize_extension(path: impl AsRef<Path>) -> Option<String> {
    path.as_ref()
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .map(|ext| format!(".{}", ext.to_lowercase()))
}

/// Whether a normalized extension (see [`normalize_extension`]) is an
/// accepted input type.
#[must_use]
pub fn is_supported_extension(ext: Option<&str>) -> bool {
    ext.is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext))
}

impl FromStr for ImageFormat {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "jpeg" | "jpg" => Ok(ImageFormat::Jpeg),
            "png" => Ok(ImageFormat::Png),
            "webp" => Ok(ImageFormat::Webp),
            "avif" => Ok(ImageFormat::Avif),
            _ => exn::bail!(ErrorKind::UnsupportedFormat(s.to_string())),
        }
    }
}

impl ImageFormat {
    /// Infer the format from an extension, with or without the leading dot.
    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim_start_matches('.').to_lowercase().as_str() {
            "jpg" | "jpeg" => Some(ImageFormat::Jpeg),
            "png" => Some(ImageFormat::Png),
            "webp" => Some(ImageFormat::Webp),
            "avif" => Some(ImageFormat::Avif),
            _ => None,
        }
    }

    /// Detect the format from the leading bytes of a file.
    ///
    /// Returns `None` if no signature matches or the input is too short.
    #[must_use]
    pub fn from_magic_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(&PNG_MAGIC) {
            return Some(ImageFormat::Png);
        }
        if bytes.starts_with(&JPEG_MAGIC) {
            return Some(ImageFormat::Jpeg);
        }
        if bytes.len() >= 12 && bytes[..4] == *RIFF_MAGIC && bytes[8..12] == *WEBP_MAGIC {
            return Some(ImageFormat::Webp);
        }
        // ISO-BMFF: [box size: 4][`ftyp`][major brand: 4]
        if bytes.len() >= 12 && bytes[4..8] == *FTYP_MAGIC && AVIF_BRANDS.iter().any(|b| bytes[8..12] == **b) {
            return Some(ImageFormat::Avif);
        }
        None
    }
}
