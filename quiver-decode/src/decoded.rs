//! Decoded image buffers and the options that shape them.

use quiver_cache::Weighted;
use quiver_common::{PixelLayout, Size};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Decoder options that change the produced pixels; part of the request key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DecodeOptions {
    /// Channel layout of the output buffer.
    #[serde(default)]
    pub layout: PixelLayout,
}

impl DecodeOptions {
    pub const fn with_layout(layout: PixelLayout) -> Self {
        Self { layout }
    }
}

/// An immutable, tightly packed pixel buffer plus decode diagnostics.
#[derive(Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pixels: Vec<u8>,
    layout: PixelLayout,
    width: u32,
    height: u32,
    source_width: u32,
    source_height: u32,
    subsample: u32,
}

impl DecodedImage {
    pub(crate) fn new(
        pixels: Vec<u8>,
        layout: PixelLayout,
        size: Size,
        source: Size,
        subsample: u32,
    ) -> Self {
        debug_assert_eq!(pixels.len(), layout.buffer_len(size.width, size.height));
        Self {
            pixels,
            layout,
            width: size.width,
            height: size.height,
            source_width: source.width,
            source_height: source.height,
            subsample,
        }
    }

    /// Build an image from raw pixels, e.g. for placeholders or tests.
    ///
    /// Returns `None` if the buffer length does not match the dimensions.
    pub fn from_pixels(pixels: Vec<u8>, layout: PixelLayout, width: u32, height: u32) -> Option<Self> {
        if width == 0 || height == 0 || pixels.len() != layout.buffer_len(width, height) {
            return None;
        }
        let size = Size::new(width, height);
        Some(Self::new(pixels, layout, size, size, 1))
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    /// Dimensions reported by the source header.
    pub fn source_size(&self) -> Size {
        Size::new(self.source_width, self.source_height)
    }

    /// Power-of-two divisor applied while decoding.
    pub fn subsample(&self) -> u32 {
        self.subsample
    }

    /// Approximate heap footprint for cache accounting.
    pub fn byte_size(&self) -> usize {
        self.pixels.len() + std::mem::size_of::<Self>()
    }
}

impl Weighted for DecodedImage {
    fn weight(&self) -> usize {
        self.byte_size()
    }
}

impl fmt::Debug for DecodedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedImage")
            .field("layout", &self.layout)
            .field("size", &format_args!("{}x{}", self.width, self.height))
            .field(
                "source",
                &format_args!("{}x{}", self.source_width, self.source_height),
            )
            .field("subsample", &self.subsample)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}
