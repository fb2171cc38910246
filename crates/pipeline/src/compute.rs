//! The compute stage: read, encode and plan, without touching the disk.

use crate::error::{ErrorKind, Result, classify};
use crate::plan::{plan_output_path, resolve_output_format};
use crate::task::{ComputedOutput, Task};
use tinyimage_codec::{Codec, EncodeRequest};
use tinyimage_config::Settings;
use tinyimage_format::{ImageFormat, is_supported_extension};
use tinyimage_storage::Filesystem;
use tracing::instrument;

/// A finished compute for one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Computed {
    pub source_size_bytes: u64,
    pub output: ComputedOutput,
}

/// Produce the encoded output for `task` under `settings`.
///
/// The source is read from its current location. The extension decides the
/// format; the leading bytes are only checked to log a mismatch.
#[instrument(skip_all, fields(task = %task.id, source = %task.current_source_path.display()))]
pub async fn compute(fs: &dyn Filesystem, codec: &dyn Codec, task: &Task, settings: &Settings) -> Result<Computed> {
    let Some(extension) = task.source_extension.as_deref() else {
        exn::bail!(ErrorKind::MissingExtension);
    };
    if !is_supported_extension(Some(extension)) {
        exn::bail!(ErrorKind::UnsupportedFormat(extension.to_string()));
    }
    let Some(format) = resolve_output_format(Some(extension), settings) else {
        exn::bail!(ErrorKind::UnsupportedFormat(extension.to_string()));
    };

    let source = &task.current_source_path;
    let info = classify(fs.stat(source).await, ErrorKind::from_storage)?;
    if !info.is_file() {
        exn::bail!(ErrorKind::NotAFile);
    }
    let input = classify(fs.read(source).await, ErrorKind::from_storage)?;
    let source_size_bytes = input.len() as u64;

    if let Some(declared) = ImageFormat::from_extension(extension)
        && !declared.check_magic_bytes(&input)
    {
        let sniffed = ImageFormat::from_magic_bytes(&input);
        tracing::warn!(%declared, ?sniffed, "File contents do not match the extension");
    }

    let request = EncodeRequest {
        format,
        quality: settings.quality,
        png_compression_level: settings.png_compression_level,
        keep_metadata: settings.keep_metadata,
    };
    let encoded = classify(codec.encode(input, request).await, ErrorKind::from_codec)?;
    if encoded.flattened_alpha {
        tracing::debug!("Flattened transparency onto white");
    }

    let plan = plan_output_path(fs, source, Some(extension), settings, format).await?;
    tracing::debug!(
        input = source_size_bytes,
        output = encoded.data.len(),
        planned = %plan.final_path.display(),
        "Computed output"
    );
    Ok(Computed {
        source_size_bytes,
        output: ComputedOutput {
            data: encoded.data,
            format,
            planned_path: plan.final_path,
            delete_source_after_write: plan.delete_source_after_write,
        },
    })
}
