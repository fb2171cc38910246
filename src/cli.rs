use clap::Parser;
use std::path::PathBuf;
use std::str::FromStr;
use tinyimage_config::{FormatMode, OutputMode, Settings};
use tinyimage_format::ImageFormat;

/// Recompress a batch of images.
///
/// Every image is encoded in memory first and a report of the planned outputs
/// is printed. Nothing is written unless `--write` is given.
#[derive(Debug, Parser)]
#[command(name = "tinyimage", version, about)]
pub struct Cli {
    /// Images to recompress (jpg, jpeg, png, webp, avif).
    #[arg(required = true, value_name = "PATHS")]
    pub paths: Vec<PathBuf>,

    /// `generate-new` writes `<name>.tiny.<ext>` next to each image;
    /// `overwrite-original` replaces it.
    #[arg(long, value_parser = parse_value::<OutputMode, _>)]
    pub output_mode: Option<OutputMode>,

    /// `keep-original` or `convert` (to `--target-format`).
    #[arg(long, value_parser = parse_value::<FormatMode, _>)]
    pub format_mode: Option<FormatMode>,

    #[arg(long, value_parser = parse_value::<ImageFormat, _>)]
    pub target_format: Option<ImageFormat>,

    /// JPEG, WebP and AVIF quality.
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub quality: Option<u8>,

    /// PNG compression level.
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=9))]
    pub png_level: Option<u8>,

    /// Keep the colour profile of the source.
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    pub keep_metadata: Option<bool>,

    /// Extra configuration file, layered over the platform one.
    #[arg(long, env = "TINYIMAGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Maximum images encoded or written at once.
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Write every precomputed image once precompute has finished.
    #[arg(long)]
    pub write: bool,

    /// Do not ask before overwriting originals.
    #[arg(short, long)]
    pub yes: bool,

    /// Remember the effective settings as the new defaults.
    #[arg(long)]
    pub save_defaults: bool,
}

impl Cli {
    /// `defaults` with every setting given on the command line replaced.
    pub fn overlay(&self, defaults: Settings) -> Settings {
        Settings {
            output_mode: self.output_mode.unwrap_or(defaults.output_mode),
            format_mode: self.format_mode.unwrap_or(defaults.format_mode),
            target_format: self.target_format.unwrap_or(defaults.target_format),
            quality: self.quality.unwrap_or(defaults.quality),
            png_compression_level: self.png_level.unwrap_or(defaults.png_compression_level),
            keep_metadata: self.keep_metadata.unwrap_or(defaults.keep_metadata),
        }
        .normalized()
    }
}

fn parse_value<T, K>(raw: &str) -> Result<T, String>
where
    T: FromStr<Err = exn::Exn<K>>,
    K: std::error::Error + Send + Sync + 'static,
{
    raw.parse().map_err(|err: exn::Exn<K>| (*err).to_string())
}
