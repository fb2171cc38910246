//! Compression settings (schema version 1).
//!
//! A [`Settings`] value is immutable once handed to a session: changing any
//! field means building a new value and applying it as a whole. Values read
//! from outside the program (the persisted defaults, CLI flags) pass through
//! [`normalize_settings`] or [`Settings::normalized`] first, so nothing out of
//! range ever reaches an encoder.

use crate::error::{Error, ErrorKind};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::ops::RangeInclusive;
use std::str::FromStr;
use tinyimage_format::ImageFormat;

/// Version tag written alongside every persisted settings blob.
pub const SCHEMA_VERSION: u32 = 1;
/// Encoder quality for JPEG, WebP and AVIF.
pub const QUALITY_RANGE: RangeInclusive<u8> = 1..=100;
/// zlib-style compression level for PNG.
pub const PNG_COMPRESSION_RANGE: RangeInclusive<u8> = 0..=9;

/// Where compressed output goes.
#[derive(Clone, Copy, Debug, Default, Display, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputMode {
    /// Write a sibling file named `<stem>.tiny<ext>`.
    #[default]
    #[display("generate-new")]
    GenerateNew,
    /// Replace the source file, possibly under a new extension.
    #[display("overwrite-original")]
    OverwriteOriginal,
}

/// Whether the output keeps the source format.
#[derive(Clone, Copy, Debug, Default, Display, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FormatMode {
    #[default]
    #[display("keep-original")]
    KeepOriginal,
    /// Convert everything to [`Settings::target_format`].
    #[display("convert")]
    Convert,
}

impl FromStr for OutputMode {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "generate-new" => Ok(Self::GenerateNew),
            "overwrite-original" => Ok(Self::OverwriteOriginal),
            _ => exn::bail!(ErrorKind::InvalidValue("output mode", s.to_string())),
        }
    }
}

impl FromStr for FormatMode {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "keep-original" => Ok(Self::KeepOriginal),
            "convert" => Ok(Self::Convert),
            _ => exn::bail!(ErrorKind::InvalidValue("format mode", s.to_string())),
        }
    }
}

/// One complete compression configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub output_mode: OutputMode,
    pub format_mode: FormatMode,
    /// Only consulted when `format_mode` is [`FormatMode::Convert`].
    pub target_format: ImageFormat,
    pub quality: u8,
    pub png_compression_level: u8,
    /// Preserve the embedded colour profile instead of stripping it.
    pub keep_metadata: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            output_mode: OutputMode::GenerateNew,
            format_mode: FormatMode::KeepOriginal,
            target_format: ImageFormat::Webp,
            quality: 80,
            png_compression_level: 6,
            keep_metadata: false,
        }
    }
}

impl Settings {
    /// Clamp the numeric fields into their valid ranges.
    #[must_use]
    pub fn normalized(self) -> Self {
        Self {
            quality: self.quality.clamp(*QUALITY_RANGE.start(), *QUALITY_RANGE.end()),
            png_compression_level: self
                .png_compression_level
                .clamp(*PNG_COMPRESSION_RANGE.start(), *PNG_COMPRESSION_RANGE.end()),
            ..self
        }
    }

    /// The JSON blob persisted for these settings, including the schema tag.
    pub fn to_stored_json(&self) -> serde_json::Result<String> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Stored<'a> {
            schema_version: u32,
            #[serde(flatten)]
            settings: &'a Settings,
        }
        serde_json::to_string(&Stored {
            schema_version: SCHEMA_VERSION,
            settings: &self.normalized(),
        })
    }
}

/// Build valid settings out of arbitrary JSON.
///
/// Never fails: anything that is not an object is treated as empty, unknown
/// enum values fall back to the defaults, numbers (or numeric strings) are
/// rounded and clamped with unparseable values pinned to the range minimum,
/// and a `keepMetadata` that is not a boolean becomes `false`.
#[must_use]
pub fn normalize_settings(input: &Value) -> Settings {
    let empty = Map::new();
    let object = input.as_object().unwrap_or(&empty);
    let defaults = Settings::default();

    let output_mode = enum_or(object.get("outputMode"), defaults.output_mode);
    let format_mode = enum_or(object.get("formatMode"), defaults.format_mode);
    let target_format = enum_or(object.get("targetFormat"), defaults.target_format);
    let quality = clamp_number(number_or(object.get("quality"), defaults.quality), &QUALITY_RANGE);
    let png_compression_level = clamp_number(
        number_or(object.get("pngCompressionLevel"), defaults.png_compression_level),
        &PNG_COMPRESSION_RANGE,
    );
    let keep_metadata = object.get("keepMetadata").and_then(Value::as_bool).unwrap_or(false);

    Settings {
        output_mode,
        format_mode,
        target_format,
        quality,
        png_compression_level,
        keep_metadata,
    }
}

/// Parse a persisted settings blob. Returns `None` if it is not JSON at all.
#[must_use]
pub fn parse_stored_settings(raw: &str) -> Option<Settings> {
    match serde_json::from_str::<Value>(raw) {
        Ok(value) => Some(normalize_settings(&value)),
        Err(err) => {
            tracing::warn!(error = %err, "Ignoring stored settings that are not valid JSON");
            None
        },
    }
}

fn enum_or<T: for<'de> Deserialize<'de>>(value: Option<&Value>, default: T) -> T {
    value
        .and_then(|v| v.as_str())
        .and_then(|s| serde_json::from_value(Value::String(s.to_string())).ok())
        .unwrap_or(default)
}

/// Loose numeric coercion: absent or `null` means "use the default", numeric
/// strings are parsed, anything else unusable is `NaN`.
fn number_or(value: Option<&Value>, default: u8) -> f64 {
    match value {
        None | Some(Value::Null) => f64::from(default),
        Some(Value::Number(n)) => n.as_f64().unwrap_or(f64::NAN),
        Some(Value::Bool(b)) => f64::from(u8::from(*b)),
        Some(Value::String(s)) if s.trim().is_empty() => 0.0,
        Some(Value::String(s)) => s.trim().parse().unwrap_or(f64::NAN),
        Some(_) => f64::NAN,
    }
}

fn clamp_number(value: f64, range: &RangeInclusive<u8>) -> u8 {
    let (min, max) = (*range.start(), *range.end());
    if value.is_nan() {
        return min;
    }
    // Clamped into u8 range before the cast, so it cannot truncate.
    value.round().clamp(f64::from(min), f64::from(max)) as u8
}
