//! Bounds probe followed by a power-of-two subsampled decode.
//!
//! # Algorithm
//!
//! 1. Open the source and read just the header to learn the source size.
//! 2. Pick the subsample factor with [`compute_subsample`].
//! 3. Open the source again and decode at `1/s` resolution. Only baseline
//!    JPEGs subsample while decoding: they are scaled inside the IDCT
//!    (`jpeg-decoder`'s `scale`), so their full resolution buffer is never
//!    allocated. Every other format is decoded in full, under
//!    [`image::io::Limits`] derived from the probe, and resized afterwards.
//! 4. Convert to the requested [`PixelLayout`].
//!
//! The output is never larger than the source; no upscaling is performed.

use crate::decoded::{DecodeOptions, DecodedImage};
use crate::error::{DecodeError, FetchError};
use crate::source::StreamOpener;
use image::imageops::FilterType;
use image::{DynamicImage, ImageBuffer, ImageFormat};
use quiver_common::{PixelLayout, Size, SizeSpec};
use tracing::{debug, trace};

/// Default ceiling on the buffer a full-resolution decode may allocate.
pub const DEFAULT_MAX_DECODE_BYTES: u64 = 512 * 1024 * 1024;

/// Result of the header-only pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeInfo {
    pub size: Size,
    pub format: ImageFormat,
}

/// Largest power-of-two `s` such that decoding at `1/s` still leaves both
/// axes strictly larger than the target.
///
/// Returns 1 for [`SizeSpec::Unspecified`] and for sources that already fit.
///
/// ```
/// use quiver_common::SizeSpec;
/// use quiver_decode::compute_subsample;
/// use quiver_common::Size;
///
/// let target = SizeSpec::bounded(400, 300).unwrap();
/// assert_eq!(compute_subsample(Size::new(4000, 3000), target), 8);
/// ```
pub fn compute_subsample(source: Size, spec: SizeSpec) -> u32 {
    let Some(target) = spec.size() else {
        return 1;
    };
    let mut s: u32 = 1;
    while let Some(next) = s.checked_mul(2) {
        if source.width / next > target.width && source.height / next > target.height {
            s = next;
        } else {
            break;
        }
    }
    s
}

/// Dimensions produced by decoding `source` at subsample `s`.
pub fn subsampled_size(source: Size, s: u32) -> Size {
    let s = s.max(1);
    Size::new((source.width / s).max(1), (source.height / s).max(1))
}

/// Stateless image decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decoder {
    jpeg_scaling: bool,
    max_decode_bytes: u64,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            jpeg_scaling: true,
            max_decode_bytes: DEFAULT_MAX_DECODE_BYTES,
        }
    }

    /// Refuse full-resolution decodes whose RGBA buffer would exceed `bytes`.
    pub fn with_max_decode_bytes(mut self, bytes: u64) -> Self {
        self.max_decode_bytes = bytes;
        self
    }

    /// Always decode JPEGs at full resolution before reducing.
    pub fn without_jpeg_scaling(mut self) -> Self {
        self.jpeg_scaling = false;
        self
    }

    /// Read the header only and report format and source dimensions.
    pub fn probe(&self, opener: &dyn StreamOpener) -> Result<ProbeInfo, DecodeError> {
        let stream = opener.open()?;
        let reader = image::io::Reader::new(stream)
            .with_guessed_format()
            .map_err(FetchError::from)?;
        let format = reader
            .format()
            .ok_or_else(|| DecodeError::Unsupported("unrecognized image signature".to_string()))?;
        let (width, height) = reader.into_dimensions()?;
        if width == 0 || height == 0 {
            return Err(DecodeError::ZeroDimension { width, height });
        }
        trace!(source = %opener.describe(), ?format, width, height, "probed image");
        Ok(ProbeInfo {
            size: Size::new(width, height),
            format,
        })
    }

    /// Decode `opener` so that it covers `spec` without allocating more than needed.
    pub fn decode(
        &self,
        opener: &dyn StreamOpener,
        spec: SizeSpec,
        options: DecodeOptions,
    ) -> Result<DecodedImage, DecodeError> {
        let probe = self.probe(opener)?;
        let subsample = compute_subsample(probe.size, spec);
        let target = subsampled_size(probe.size, subsample);

        let scaled = if probe.format == ImageFormat::Jpeg && self.jpeg_scaling && subsample > 1 {
            decode_jpeg_scaled(opener, target)?
        } else {
            None
        };
        let image = match scaled {
            Some(image) => image,
            None => decode_full(opener, probe, self.max_decode_bytes)?,
        };
        if image.width() == 0 || image.height() == 0 {
            return Err(DecodeError::ZeroDimension {
                width: image.width(),
                height: image.height(),
            });
        }

        let image = if image.width() != target.width || image.height() != target.height {
            image.resize_exact(target.width, target.height, FilterType::Triangle)
        } else {
            image
        };
        let pixels = into_layout(image, options.layout);

        debug!(
            source = %probe.size,
            target = %spec,
            subsample,
            output = %target,
            "decoded image"
        );
        Ok(DecodedImage::new(
            pixels,
            options.layout,
            target,
            probe.size,
            subsample,
        ))
    }
}

/// Decode at full resolution; no subsampling happens inside the decoder.
///
/// The decoder is held to the probed dimensions and to `max_alloc` bytes.
fn decode_full(
    opener: &dyn StreamOpener,
    probe: ProbeInfo,
    max_alloc: u64,
) -> Result<DynamicImage, DecodeError> {
    let Size { width, height } = probe.size;
    let needed = u64::from(width) * u64::from(height) * 4;
    if needed > max_alloc {
        return Err(DecodeError::TooLarge(format!(
            "{width}x{height} needs {needed} bytes, limit is {max_alloc}"
        )));
    }

    let mut limits = image::io::Limits::default();
    limits.max_image_width = Some(width);
    limits.max_image_height = Some(height);
    limits.max_alloc = Some(max_alloc);

    let stream = opener.open()?;
    let mut reader = image::io::Reader::with_format(stream, probe.format);
    reader.limits(limits);
    Ok(reader.decode()?)
}

/// Decode a JPEG with DCT scaling so the output is at least `target`.
///
/// Returns `Ok(None)` for colour models the fast path does not handle.
fn decode_jpeg_scaled(
    opener: &dyn StreamOpener,
    target: Size,
) -> Result<Option<DynamicImage>, DecodeError> {
    let stream = opener.open()?;
    let mut decoder = jpeg_decoder::Decoder::new(stream);
    let requested_w = u16::try_from(target.width).unwrap_or(u16::MAX);
    let requested_h = u16::try_from(target.height).unwrap_or(u16::MAX);
    let (width, height) = decoder.scale(requested_w, requested_h)?;
    let info = decoder
        .info()
        .ok_or_else(|| DecodeError::Malformed("JPEG decoder missing metadata".to_string()))?;

    let (width, height) = (u32::from(width), u32::from(height));
    let image = match info.pixel_format {
        jpeg_decoder::PixelFormat::L8 => {
            let pixels = decoder.decode()?;
            ImageBuffer::from_raw(width, height, pixels).map(DynamicImage::ImageLuma8)
        }
        jpeg_decoder::PixelFormat::RGB24 => {
            let pixels = decoder.decode()?;
            ImageBuffer::from_raw(width, height, pixels).map(DynamicImage::ImageRgb8)
        }
        other => {
            trace!(?other, "JPEG pixel format not scaled in place");
            return Ok(None);
        }
    };
    match image {
        Some(image) => Ok(Some(image)),
        None => Err(DecodeError::Malformed(format!(
            "JPEG buffer does not match {width}x{height}"
        ))),
    }
}

fn into_layout(image: DynamicImage, layout: PixelLayout) -> Vec<u8> {
    match layout {
        PixelLayout::Rgba8 => image.into_rgba8().into_raw(),
        PixelLayout::Rgb8 => image.into_rgb8().into_raw(),
        PixelLayout::Luma8 => image.into_luma8().into_raw(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::RawBytesHandle;
    use image::{ImageOutputFormat, Rgb, RgbImage};
    use proptest::prelude::*;
    use std::io::Cursor;

    fn encode(width: u32, height: u32, format: ImageOutputFormat) -> RawBytesHandle {
        let img = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
        });
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img).write_to(&mut out, format).unwrap();
        RawBytesHandle::buffered(out.into_inner())
    }

    fn bounded(w: u32, h: u32) -> SizeSpec {
        SizeSpec::bounded(w, h).unwrap()
    }

    #[test]
    fn test_subsample_reference_case() {
        assert_eq!(compute_subsample(Size::new(4000, 3000), bounded(400, 300)), 8);
    }

    #[test]
    fn test_subsample_never_upscales() {
        assert_eq!(compute_subsample(Size::new(100, 100), bounded(400, 300)), 1);
        assert_eq!(compute_subsample(Size::new(4000, 3000), SizeSpec::Unspecified), 1);
        // Both axes must still exceed; a wide panorama stops on its height.
        assert_eq!(compute_subsample(Size::new(8000, 400), bounded(100, 100)), 2);
        // Exactly twice the target is not enough to halve.
        assert_eq!(compute_subsample(Size::new(800, 600), bounded(400, 300)), 1);
    }

    #[test]
    fn test_subsample_huge_source() {
        let s = compute_subsample(Size::new(u32::MAX, u32::MAX), bounded(1, 1));
        assert!(s.is_power_of_two());
        assert!(u32::MAX / s > 1);
    }

    #[test]
    fn test_subsampled_size_is_clamped() {
        assert_eq!(subsampled_size(Size::new(4000, 3000), 8), Size::new(500, 375));
        assert_eq!(subsampled_size(Size::new(3, 1), 4), Size::new(1, 1));
    }

    #[test]
    fn test_probe_png() {
        let handle = encode(64, 48, ImageOutputFormat::Png);
        let probe = Decoder::new().probe(&handle).unwrap();
        assert_eq!(probe.size, Size::new(64, 48));
        assert_eq!(probe.format, ImageFormat::Png);
    }

    #[test]
    fn test_decode_png_subsampled() {
        let handle = encode(64, 48, ImageOutputFormat::Png);
        let img = Decoder::new()
            .decode(&handle, bounded(8, 6), DecodeOptions::default())
            .unwrap();
        assert_eq!(img.subsample(), 4);
        assert_eq!(img.size(), Size::new(16, 12));
        assert_eq!(img.source_size(), Size::new(64, 48));
        assert_eq!(img.pixels().len(), 16 * 12 * 4);
    }

    #[test]
    fn test_full_decode_respects_allocation_limit() {
        let handle = encode(64, 48, ImageOutputFormat::Png);
        let decoder = Decoder::new().with_max_decode_bytes(64 * 48 * 4 - 1);
        let err = decoder
            .decode(&handle, bounded(8, 6), DecodeOptions::default())
            .unwrap_err();
        assert!(matches!(err, DecodeError::TooLarge(_)), "{err:?}");

        let img = Decoder::new()
            .with_max_decode_bytes(64 * 48 * 4)
            .decode(&handle, bounded(8, 6), DecodeOptions::default())
            .unwrap();
        assert_eq!(img.size(), Size::new(16, 12));
    }

    #[test]
    fn test_jpeg_scaling_decodes_under_full_size_limit() {
        let handle = encode(128, 96, ImageOutputFormat::Jpeg(90));
        let decoder = Decoder::new().with_max_decode_bytes(1024);
        let img = decoder
            .decode(&handle, bounded(16, 12), DecodeOptions::default())
            .unwrap();
        assert_eq!(img.size(), Size::new(32, 24));
        assert!(matches!(
            decoder.without_jpeg_scaling().decode(&handle, bounded(16, 12), DecodeOptions::default()),
            Err(DecodeError::TooLarge(_))
        ));
    }

    #[test]
    fn test_decode_unspecified_keeps_source_size() {
        let handle = encode(20, 10, ImageOutputFormat::Png);
        let img = Decoder::new()
            .decode(&handle, SizeSpec::Unspecified, DecodeOptions::default())
            .unwrap();
        assert_eq!(img.size(), Size::new(20, 10));
        assert_eq!(img.subsample(), 1);
    }

    #[test]
    fn test_decode_jpeg_scaled_matches_full_path() {
        let handle = encode(128, 96, ImageOutputFormat::Jpeg(90));
        let spec = bounded(16, 12);
        let options = DecodeOptions::with_layout(PixelLayout::Rgb8);

        let fast = Decoder::new().decode(&handle, spec, options).unwrap();
        let slow = Decoder::new()
            .without_jpeg_scaling()
            .decode(&handle, spec, options)
            .unwrap();

        assert_eq!(fast.subsample(), 4);
        assert_eq!(fast.size(), Size::new(32, 24));
        assert_eq!(fast.size(), slow.size());
        assert_eq!(fast.pixels().len(), 32 * 24 * 3);
    }

    #[test]
    fn test_decode_layouts() {
        let handle = encode(10, 10, ImageOutputFormat::Png);
        for (layout, bpp) in [
            (PixelLayout::Rgba8, 4),
            (PixelLayout::Rgb8, 3),
            (PixelLayout::Luma8, 1),
        ] {
            let img = Decoder::new()
                .decode(&handle, SizeSpec::Unspecified, DecodeOptions::with_layout(layout))
                .unwrap();
            assert_eq!(img.layout(), layout);
            assert_eq!(img.pixels().len(), 100 * bpp);
        }
    }

    #[test]
    fn test_garbage_is_rejected() {
        let handle = RawBytesHandle::buffered(&b"definitely not an image"[..]);
        let err = Decoder::new()
            .decode(&handle, SizeSpec::Unspecified, DecodeOptions::default())
            .unwrap_err();
        assert!(matches!(err, DecodeError::Unsupported(_)));
    }

    #[test]
    fn test_truncated_png_is_rejected() {
        let RawBytesHandle::Buffered(bytes) = encode(64, 64, ImageOutputFormat::Png) else {
            unreachable!()
        };
        let truncated = RawBytesHandle::buffered(bytes.slice(..bytes.len() / 2));
        assert!(Decoder::new()
            .decode(&truncated, SizeSpec::Unspecified, DecodeOptions::default())
            .is_err());
    }

    proptest! {
        #[test]
        fn prop_subsample_is_largest_power_of_two(
            sw in 1u32..20_000,
            sh in 1u32..20_000,
            tw in 1u32..5_000,
            th in 1u32..5_000,
        ) {
            let s = compute_subsample(Size::new(sw, sh), bounded(tw, th));
            prop_assert!(s.is_power_of_two());
            if s > 1 {
                prop_assert!(sw / s > tw && sh / s > th);
            }
            prop_assert!(!(sw / (s * 2) > tw && sh / (s * 2) > th));
            let out = subsampled_size(Size::new(sw, sh), s);
            prop_assert!(out.width <= sw && out.height <= sh);
        }
    }
}
