//! Common types shared by the quiver image loading crates.
//!
//! This crate provides the leaf types every other layer agrees on:
//! - [`Size`] / [`SizeSpec`] - target bounds used to drive decode subsampling
//! - [`SizeHint`] and [`resolve_size`] - turn a display target into a [`SizeSpec`]
//! - [`ImageUri`] / [`Scheme`] - parsed and normalized source identifiers
//! - [`PixelLayout`] - channel layout of decoded pixel buffers

pub mod size;
pub mod uri;

pub use size::{resolve_size, Size, SizeHint, SizeSpec};
pub use uri::{ImageUri, Scheme, UriError};

use serde::{Deserialize, Serialize};

/// Channel layout of a decoded pixel buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelLayout {
    /// 8-bit red, green, blue, alpha.
    #[default]
    Rgba8,
    /// 8-bit red, green, blue; alpha is dropped.
    Rgb8,
    /// 8-bit luminance.
    Luma8,
}

impl PixelLayout {
    /// Bytes used by a single pixel in this layout.
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgba8 => 4,
            Self::Rgb8 => 3,
            Self::Luma8 => 1,
        }
    }

    /// Byte length of a tightly packed buffer of the given dimensions.
    pub const fn buffer_len(self, width: u32, height: u32) -> usize {
        width as usize * height as usize * self.bytes_per_pixel()
    }
}
