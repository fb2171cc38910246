//! Image codecs for tinyimage.
//!
//! The pipeline treats encoding as an opaque capability: bytes of a source
//! image go in, bytes of the re-encoded image come out. [`Codec`] is that
//! seam. [`ImageCodec`] implements it with the `image` crate; a scriptable
//! [`MockCodec`] is available behind the `mock` feature for tests that care
//! about scheduling rather than pixels.

pub mod error;
#[cfg(feature = "mock")]
mod mock;
mod raster;

use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tinyimage_format::ImageFormat;

#[cfg(feature = "mock")]
pub use crate::mock::MockCodec;
pub use crate::raster::ImageCodec;

pub type CodecHandle = Arc<dyn Codec>;

/// Everything an encoder needs to know about the output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EncodeRequest {
    pub format: ImageFormat,
    /// 1-100, used by JPEG, WebP and AVIF.
    pub quality: u8,
    /// 0-9, used by PNG.
    pub png_compression_level: u8,
    /// Carry the ICC profile and EXIF over to the output.
    pub keep_metadata: bool,
}

/// An encoded image held in memory.
#[derive(Clone, PartialEq, Eq)]
pub struct Encoded {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// The source had an alpha channel that was composited onto white.
    pub flattened_alpha: bool,
}

impl std::fmt::Debug for Encoded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Encoded")
            .field("bytes", &self.data.len())
            .field("width", &self.width)
            .field("height", &self.height)
            .field("flattened_alpha", &self.flattened_alpha)
            .finish()
    }
}

/// Decode-transform-encode capability.
///
/// Implementations decode `input`, apply orientation normalization, flatten
/// alpha onto white when the target cannot carry it, strip or keep metadata
/// per the request, and encode.
#[async_trait]
pub trait Codec: Send + Sync {
    async fn encode(&self, input: Vec<u8>, request: EncodeRequest) -> Result<Encoded>;
}
