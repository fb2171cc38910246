//! Output path planning.
//!
//! Decides where a computed image goes and whether the source has to be
//! deleted once the output is committed. Planning only ever reads the
//! filesystem (existence checks), and is deterministic: the same inputs
//! against the same filesystem state always produce the same path.

use crate::error::{ErrorKind, Result, classify};
use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tinyimage_config::{FormatMode, OutputMode, Settings};
use tinyimage_format::{ImageFormat, is_supported_extension};
use tinyimage_storage::{Filesystem, normalize_path};
use tracing::instrument;

/// Candidates tried before giving up: the requested name, then suffixes
/// `-1` through `-9999`.
pub const MAX_PATH_ATTEMPTS: usize = 10_000;

/// Infix for generated sibling files (`photo.jpg` → `photo.tiny.jpg`).
const GENERATED_INFIX: &str = ".tiny";

/// Where to write, and whether the source goes away afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPlan {
    pub final_path: PathBuf,
    pub delete_source_after_write: bool,
}

/// The format an item is encoded to: the target format when converting,
/// otherwise the format inferred from the source extension.
#[must_use]
pub fn resolve_output_format(source_extension: Option<&str>, settings: &Settings) -> Option<ImageFormat> {
    match settings.format_mode {
        FormatMode::Convert => Some(settings.target_format),
        FormatMode::KeepOriginal => source_extension.and_then(ImageFormat::from_extension),
    }
}

/// Plan the destination of `source` encoded as `output_format`.
///
/// - **Generate new:** a sibling `<stem>.tiny<ext>`, where `<ext>` is the
///   source's own extension when keeping the original format, else the
///   canonical extension of `output_format`. Never deletes the source.
/// - **Overwrite:** the source itself when the format does not change.
///   Otherwise a sibling `<stem><canonical ext>`, and the source is deleted
///   after the write.
///
/// Taken names get a numeric suffix (see [`find_available_path`]).
#[instrument(level = "debug", skip_all, fields(source = %source.display(), format = %output_format))]
pub async fn plan_output_path(
    fs: &dyn Filesystem,
    source: &Path,
    source_extension: Option<&str>,
    settings: &Settings,
    output_format: ImageFormat,
) -> Result<OutputPlan> {
    plan_output_path_avoiding(fs, source, source_extension, settings, output_format, &HashSet::new()).await
}

/// [`plan_output_path`], additionally treating every path in `reserved` as
/// taken.
pub(crate) async fn plan_output_path_avoiding(
    fs: &dyn Filesystem,
    source: &Path,
    source_extension: Option<&str>,
    settings: &Settings,
    output_format: ImageFormat,
    reserved: &HashSet<PathBuf>,
) -> Result<OutputPlan> {
    let source = classify(normalize_path(source), ErrorKind::from_storage)?;
    let dir = source.parent().unwrap_or(Path::new("/"));
    let stem = source.file_stem().unwrap_or_default();

    if settings.output_mode == OutputMode::GenerateNew {
        let extension = match source_extension {
            Some(ext) if settings.format_mode == FormatMode::KeepOriginal && is_supported_extension(Some(ext)) => ext,
            _ => output_format.canonical_extension(),
        };
        let requested = dir.join(file_name(stem, &[GENERATED_INFIX, extension]));
        let final_path = find_available_path_avoiding(fs, &requested, &source, reserved).await?;
        return Ok(OutputPlan {
            final_path,
            delete_source_after_write: false,
        });
    }

    let source_format = source_extension.and_then(ImageFormat::from_extension);
    if settings.format_mode == FormatMode::KeepOriginal || source_format == Some(output_format) {
        return Ok(OutputPlan {
            final_path: source,
            delete_source_after_write: false,
        });
    }

    let requested = dir.join(file_name(stem, &[output_format.canonical_extension()]));
    let final_path = if requested == source {
        source.clone()
    } else {
        find_available_path_avoiding(fs, &requested, &source, reserved).await?
    };
    Ok(OutputPlan {
        delete_source_after_write: final_path != source,
        final_path,
    })
}

/// First of `requested`, `<stem>-1<ext>`, `<stem>-2<ext>`, ... that does not
/// exist and is not `exclude`.
///
/// Fails with [`PathExhausted`](ErrorKind::PathExhausted) after
/// [`MAX_PATH_ATTEMPTS`] candidates.
pub async fn find_available_path(fs: &dyn Filesystem, requested: &Path, exclude: &Path) -> Result<PathBuf> {
    find_available_path_avoiding(fs, requested, exclude, &HashSet::new()).await
}

async fn find_available_path_avoiding(
    fs: &dyn Filesystem,
    requested: &Path,
    exclude: &Path,
    reserved: &HashSet<PathBuf>,
) -> Result<PathBuf> {
    let requested = classify(normalize_path(requested), ErrorKind::from_storage)?;
    let exclude = classify(normalize_path(exclude), ErrorKind::from_storage)?;

    if requested != exclude
        && !reserved.contains(&requested)
        && !classify(fs.exists(&requested).await, ErrorKind::from_storage)?
    {
        return Ok(requested);
    }

    let dir = requested.parent().unwrap_or(Path::new("/"));
    let stem = requested.file_stem().unwrap_or_default();
    let extension = requested.extension().map(|ext| format!(".{}", ext.to_string_lossy())).unwrap_or_default();
    for index in 1..MAX_PATH_ATTEMPTS {
        let candidate = dir.join(file_name(stem, &[format!("-{index}").as_str(), extension.as_str()]));
        if candidate == exclude || reserved.contains(&candidate) {
            continue;
        }
        if !classify(fs.exists(&candidate).await, ErrorKind::from_storage)? {
            tracing::debug!(
                requested = %requested.display(),
                candidate = %candidate.display(),
                "Avoided name collision"
            );
            return Ok(candidate);
        }
    }
    exn::bail!(ErrorKind::PathExhausted)
}

fn file_name(stem: &std::ffi::OsStr, suffixes: &[&str]) -> OsString {
    let mut name = stem.to_os_string();
    for suffix in suffixes {
        name.push(suffix);
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tinyimage_storage::backend::MockFilesystem;

    fn settings(output_mode: OutputMode, format_mode: FormatMode, target_format: ImageFormat) -> Settings {
        Settings {
            output_mode,
            format_mode,
            target_format,
            ..Settings::default()
        }
    }

    async fn plan(fs: &MockFilesystem, source: &str, settings: &Settings) -> OutputPlan {
        let ext = tinyimage_format::normalize_extension(source);
        let format = resolve_output_format(ext.as_deref(), settings).unwrap();
        plan_output_path(fs, Path::new(source), ext.as_deref(), settings, format).await.unwrap()
    }

    #[rstest]
    #[case(FormatMode::KeepOriginal, ImageFormat::Webp, Some(".jpg"), Some(ImageFormat::Jpeg))]
    #[case(FormatMode::KeepOriginal, ImageFormat::Webp, Some(".jpeg"), Some(ImageFormat::Jpeg))]
    #[case(FormatMode::KeepOriginal, ImageFormat::Webp, Some(".gif"), None)]
    #[case(FormatMode::KeepOriginal, ImageFormat::Webp, None, None)]
    #[case(FormatMode::Convert, ImageFormat::Avif, Some(".png"), Some(ImageFormat::Avif))]
    #[case(FormatMode::Convert, ImageFormat::Avif, None, Some(ImageFormat::Avif))]
    fn test_resolve_output_format(
        #[case] format_mode: FormatMode,
        #[case] target: ImageFormat,
        #[case] ext: Option<&str>,
        #[case] expected: Option<ImageFormat>,
    ) {
        let settings = settings(OutputMode::GenerateNew, format_mode, target);
        assert_eq!(resolve_output_format(ext, &settings), expected);
    }

    #[tokio::test]
    async fn test_generate_new_keep_original() {
        let fs = MockFilesystem::with_files([("/photos/photo.jpg", b"x")]);
        let settings = settings(OutputMode::GenerateNew, FormatMode::KeepOriginal, ImageFormat::Webp);
        let plan = plan(&fs, "/photos/photo.jpg", &settings).await;
        assert_eq!(plan.final_path, PathBuf::from("/photos/photo.tiny.jpg"));
        assert!(!plan.delete_source_after_write);
    }

    #[tokio::test]
    async fn test_generate_new_keeps_source_extension_spelling() {
        let fs = MockFilesystem::with_files([("/photos/photo.JPEG", b"x")]);
        let settings = settings(OutputMode::GenerateNew, FormatMode::KeepOriginal, ImageFormat::Webp);
        let plan = plan(&fs, "/photos/photo.JPEG", &settings).await;
        assert_eq!(plan.final_path, PathBuf::from("/photos/photo.tiny.jpeg"));
    }

    #[tokio::test]
    async fn test_generate_new_collision_gets_suffix() {
        let fs = MockFilesystem::with_files([
            ("/photos/photo.jpg", b"x"),
            ("/photos/photo.tiny.jpg", b"x"),
            ("/photos/photo.tiny-1.jpg", b"x"),
        ]);
        let settings = settings(OutputMode::GenerateNew, FormatMode::KeepOriginal, ImageFormat::Webp);
        let plan = plan(&fs, "/photos/photo.jpg", &settings).await;
        assert_eq!(plan.final_path, PathBuf::from("/photos/photo.tiny-2.jpg"));
    }

    #[tokio::test]
    async fn test_generate_new_convert_uses_canonical_extension() {
        let fs = MockFilesystem::with_files([("/photos/photo.jpeg", b"x")]);
        let settings = settings(OutputMode::GenerateNew, FormatMode::Convert, ImageFormat::Jpeg);
        let plan = plan(&fs, "/photos/photo.jpeg", &settings).await;
        assert_eq!(plan.final_path, PathBuf::from("/photos/photo.tiny.jpg"));
    }

    #[tokio::test]
    async fn test_generate_new_never_targets_source() {
        // A source that already looks like generated output.
        let fs = MockFilesystem::with_files([("/photos/a.tiny.png", b"x")]);
        let settings = settings(OutputMode::GenerateNew, FormatMode::KeepOriginal, ImageFormat::Webp);
        let plan = plan(&fs, "/photos/a.tiny.png", &settings).await;
        assert_eq!(plan.final_path, PathBuf::from("/photos/a.tiny.tiny.png"));
    }

    #[rstest]
    #[case::keep_original(FormatMode::KeepOriginal, ImageFormat::Png)]
    #[case::same_format(FormatMode::Convert, ImageFormat::Jpeg)]
    #[tokio::test]
    async fn test_overwrite_in_place(#[case] format_mode: FormatMode, #[case] target: ImageFormat) {
        let fs = MockFilesystem::with_files([("/photos/a.jpeg", b"x")]);
        let settings = settings(OutputMode::OverwriteOriginal, format_mode, target);
        let plan = plan(&fs, "/photos/a.jpeg", &settings).await;
        assert_eq!(plan.final_path, PathBuf::from("/photos/a.jpeg"));
        assert!(!plan.delete_source_after_write);
    }

    #[tokio::test]
    async fn test_overwrite_convert() {
        let fs = MockFilesystem::with_files([("/photos/a.jpg", b"x")]);
        let settings = settings(OutputMode::OverwriteOriginal, FormatMode::Convert, ImageFormat::Png);
        let plan = plan(&fs, "/photos/a.jpg", &settings).await;
        assert_eq!(plan.final_path, PathBuf::from("/photos/a.png"));
        assert!(plan.delete_source_after_write);
    }

    #[tokio::test]
    async fn test_overwrite_convert_collision() {
        let fs = MockFilesystem::with_files([("/photos/a.jpg", b"x"), ("/photos/a.png", b"x")]);
        let settings = settings(OutputMode::OverwriteOriginal, FormatMode::Convert, ImageFormat::Png);
        let plan = plan(&fs, "/photos/a.jpg", &settings).await;
        assert_eq!(plan.final_path, PathBuf::from("/photos/a-1.png"));
        assert!(plan.delete_source_after_write);
    }

    #[tokio::test]
    async fn test_overwrite_convert_upper_case_source() {
        let fs = MockFilesystem::with_files([("/photos/a.PNG", b"x")]);
        let settings = settings(OutputMode::OverwriteOriginal, FormatMode::Convert, ImageFormat::Jpeg);
        let plan = plan(&fs, "/photos/a.PNG", &settings).await;
        assert_eq!(plan.final_path, PathBuf::from("/photos/a.jpg"));
        assert!(plan.delete_source_after_write);
    }

    #[tokio::test]
    async fn test_planning_is_deterministic() {
        let fs = MockFilesystem::with_files([("/photos/photo.jpg", b"x"), ("/photos/photo.tiny.jpg", b"x")]);
        let settings = settings(OutputMode::GenerateNew, FormatMode::KeepOriginal, ImageFormat::Webp);
        let first = plan(&fs, "/photos/photo.jpg", &settings).await;
        let second = plan(&fs, "/photos/photo.jpg", &settings).await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_reserved_names_count_as_taken() {
        let fs = MockFilesystem::with_files([("/photos/a.jpg", b"x"), ("/photos/a.tiny-1.jpg", b"x")]);
        let settings = settings(OutputMode::GenerateNew, FormatMode::KeepOriginal, ImageFormat::Webp);
        let reserved = HashSet::from([PathBuf::from("/photos/a.tiny.jpg"), PathBuf::from("/photos/a.tiny-2.jpg")]);
        let plan = plan_output_path_avoiding(
            &fs,
            Path::new("/photos/a.jpg"),
            Some(".jpg"),
            &settings,
            ImageFormat::Jpeg,
            &reserved,
        )
        .await
        .unwrap();
        assert_eq!(plan.final_path, PathBuf::from("/photos/a.tiny-3.jpg"));
    }

    #[tokio::test]
    async fn test_find_available_path_excludes_source_spellings() {
        let fs = MockFilesystem::default();
        let found = find_available_path(&fs, Path::new("/a/b.png"), Path::new("/a/./x/../b.png")).await.unwrap();
        assert_eq!(found, PathBuf::from("/a/b-1.png"));
    }

    #[tokio::test]
    async fn test_find_available_path_exhausted() {
        let taken: Vec<(String, &[u8])> = std::iter::once("/a/b.png".to_string())
            .chain((1..MAX_PATH_ATTEMPTS).map(|i| format!("/a/b-{i}.png")))
            .map(|path| (path, b"x".as_slice()))
            .collect();
        let fs = MockFilesystem::with_files(taken);
        let err = find_available_path(&fs, Path::new("/a/b.png"), Path::new("/a/src.jpg")).await.unwrap_err();
        assert_eq!(*err, ErrorKind::PathExhausted);
    }

    #[tokio::test]
    async fn test_existence_check_failure_is_classified() {
        let fs = MockFilesystem::default();
        fs.fail_on(tinyimage_storage::backend::Operation::Exists, None::<PathBuf>).await;
        let err = find_available_path(&fs, Path::new("/a/b.png"), Path::new("/a/c.png")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Unknown(_)));
    }
}
