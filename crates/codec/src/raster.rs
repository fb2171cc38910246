//! [`ImageCodec`], the production codec built on the `image` crate.

use crate::error::{ErrorKind, Result};
use crate::{Codec, EncodeRequest, Encoded};
use async_trait::async_trait;
use exn::ResultExt;
use image::codecs::avif::AvifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::error::{EncodingError, ImageFormatHint};
use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageEncoder, ImageError, ImageReader, ImageResult, Rgb, RgbImage};
use std::io::Cursor;
use tinyimage_format::ImageFormat;

/// AVIF encoder speed (1 slowest/best, 10 fastest).
const AVIF_SPEED: u8 = 6;

/// Codec backed by the pure-Rust decoders and encoders of the `image` crate.
///
/// Decoding and encoding are CPU bound, so every call runs on Tokio's
/// blocking pool.
///
/// With `keep_metadata` the ICC profile and EXIF block are carried over.
/// Orientation is always baked into the pixels and the EXIF orientation tag
/// reset, so viewers do not rotate the output a second time.
///
/// Limitations of the underlying encoders:
/// - WebP is encoded lossily by libwebp, which writes no metadata chunks.
/// - AVIF sources need the `avif-decode` feature (on by default). Without it
///   they fail as [`Unparseable`](ErrorKind::Unparseable).
#[derive(Clone, Debug, Default)]
pub struct ImageCodec;

impl ImageCodec {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Codec for ImageCodec {
    async fn encode(&self, input: Vec<u8>, request: EncodeRequest) -> Result<Encoded> {
        tokio::task::spawn_blocking(move || transcode(&input, &request))
            .await
            .or_raise(|| ErrorKind::Worker)?
    }
}

/// Decode, normalize orientation, and re-encode.
pub(crate) fn transcode(input: &[u8], request: &EncodeRequest) -> Result<Encoded> {
    let Decoded { image, metadata } = decode(input)?;
    let metadata = if request.keep_metadata { metadata } else { Metadata::default() };
    let format = request.format;
    let had_alpha = image.color().has_alpha();

    let mut data = Vec::new();
    let flattened_alpha = had_alpha && !format.supports_alpha();
    let result = match format {
        ImageFormat::Jpeg => {
            let pixels = if flattened_alpha { flatten_onto_white(&image) } else { image.to_rgb8() };
            let mut encoder = JpegEncoder::new_with_quality(&mut data, request.quality);
            attach_metadata(&mut encoder, metadata);
            DynamicImage::ImageRgb8(pixels).write_with_encoder(encoder)
        },
        ImageFormat::Png => {
            let mut encoder = PngEncoder::new_with_quality(
                &mut data,
                png_compression(request.png_compression_level),
                FilterType::Adaptive,
            );
            attach_metadata(&mut encoder, metadata);
            to_8bit(&image, had_alpha).write_with_encoder(encoder)
        },
        ImageFormat::Webp => {
            if !metadata.is_empty() {
                tracing::debug!("WebP output carries no metadata; dropping it");
            }
            encode_lossy_webp(&to_8bit(&image, had_alpha), request.quality).map(|encoded| data = encoded)
        },
        ImageFormat::Avif => {
            let mut encoder = AvifEncoder::new_with_speed_quality(&mut data, AVIF_SPEED, request.quality);
            attach_metadata(&mut encoder, metadata);
            to_8bit(&image, had_alpha).write_with_encoder(encoder)
        },
    };
    if let Err(err) = result {
        let kind = match err {
            ImageError::Unsupported(_) => ErrorKind::Unsupported(format),
            _ => ErrorKind::Encode(format),
        };
        return Err(err).or_raise(|| kind);
    }

    tracing::trace!(
        %format,
        quality = format.uses_quality().then_some(request.quality),
        bytes = data.len(),
        flattened_alpha,
        "Encoded image"
    );
    Ok(Encoded {
        data,
        width: image.width(),
        height: image.height(),
        flattened_alpha,
    })
}

/// Metadata blocks that survive a re-encode.
#[derive(Debug, Default)]
struct Metadata {
    icc_profile: Option<Vec<u8>>,
    /// Raw TIFF-structured EXIF, orientation already reset.
    exif: Option<Vec<u8>>,
}

impl Metadata {
    fn is_empty(&self) -> bool {
        self.icc_profile.is_none() && self.exif.is_none()
    }
}

struct Decoded {
    /// Upright pixels.
    image: DynamicImage,
    metadata: Metadata,
}

fn decode(input: &[u8]) -> Result<Decoded> {
    let reader = ImageReader::new(Cursor::new(input)).with_guessed_format().or_raise(|| ErrorKind::Unparseable)?;
    let mut decoder = reader.into_decoder().or_raise(|| ErrorKind::Unparseable)?;
    // Missing or broken metadata is not a reason to reject the image.
    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
    let icc_profile = decoder.icc_profile().ok().flatten();
    let mut exif = decoder.exif_metadata().ok().flatten();
    if let Some(chunk) = exif.as_deref_mut() {
        // Returns `None` and leaves the chunk alone when there is no valid tag.
        let _ = Orientation::remove_from_exif_chunk(chunk);
    }
    let mut image = DynamicImage::from_decoder(decoder).or_raise(|| ErrorKind::Unparseable)?;
    image.apply_orientation(orientation);
    Ok(Decoded {
        image,
        metadata: Metadata { icc_profile, exif },
    })
}

fn attach_metadata(encoder: &mut impl ImageEncoder, metadata: Metadata) {
    if let Some(profile) = metadata.icc_profile
        && let Err(err) = encoder.set_icc_profile(profile)
    {
        tracing::debug!(error = %err, "Encoder cannot embed an ICC profile; dropping it");
    }
    if let Some(exif) = metadata.exif
        && let Err(err) = encoder.set_exif_metadata(exif)
    {
        tracing::debug!(error = %err, "Encoder cannot embed EXIF; dropping it");
    }
}

/// Lossy WebP through libwebp; `image` only ships a lossless WebP encoder.
fn encode_lossy_webp(image: &DynamicImage, quality: u8) -> ImageResult<Vec<u8>> {
    let (width, height) = (image.width(), image.height());
    let encoder = match image {
        DynamicImage::ImageRgba8(pixels) => webp::Encoder::from_rgba(pixels.as_raw(), width, height),
        DynamicImage::ImageRgb8(pixels) => webp::Encoder::from_rgb(pixels.as_raw(), width, height),
        other => {
            let hint = ImageFormatHint::Exact(image::ImageFormat::WebP);
            let message = format!("unexpected pixel layout {:?}", other.color());
            return Err(ImageError::Encoding(EncodingError::new(hint, message)));
        },
    };
    match encoder.encode_simple(false, f32::from(quality)) {
        Ok(memory) => Ok(memory.to_vec()),
        Err(err) => {
            let hint = ImageFormatHint::Exact(image::ImageFormat::WebP);
            Err(ImageError::Encoding(EncodingError::new(hint, format!("libwebp: {err:?}"))))
        },
    }
}

/// Map a 0-9 zlib-style level onto the encoder's presets.
fn png_compression(level: u8) -> CompressionType {
    match level {
        0..=2 => CompressionType::Fast,
        3..=6 => CompressionType::Default,
        _ => CompressionType::Best,
    }
}

fn to_8bit(image: &DynamicImage, alpha: bool) -> DynamicImage {
    if alpha {
        DynamicImage::ImageRgba8(image.to_rgba8())
    } else {
        DynamicImage::ImageRgb8(image.to_rgb8())
    }
}

/// Composite onto an opaque white background.
fn flatten_onto_white(image: &DynamicImage) -> RgbImage {
    let rgba = image.to_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let alpha = u32::from(a);
        let blend = |channel: u8| ((u32::from(channel) * alpha + 255 * (255 - alpha) + 127) / 255) as u8;
        Rgb([blend(r), blend(g), blend(b)])
    })
}
