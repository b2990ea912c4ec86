//! Image decoding for the quiver image loader.
//!
//! A [`Decoder`] turns a re-openable byte source ([`StreamOpener`], usually a
//! [`RawBytesHandle`]) into a [`DecodedImage`] no larger than needed to cover
//! a target [`SizeSpec`](quiver_common::SizeSpec):
//!
//! - the header is probed first, without allocating the pixel buffer
//! - the source is then decoded at a power-of-two fraction of its size
//!   (see [`compute_subsample`])
//!
//! # Example
//!
//! ```no_run
//! use quiver_common::SizeSpec;
//! use quiver_decode::{DecodeOptions, Decoder, RawBytesHandle};
//!
//! let handle = RawBytesHandle::file("/tmp/photo.jpg");
//! let spec = SizeSpec::bounded(400, 300).unwrap_or_default();
//! let image = Decoder::new().decode(&handle, spec, DecodeOptions::default())?;
//! println!(
//!     "{} decoded at {} (subsample {})",
//!     image.source_size(),
//!     image.size(),
//!     image.subsample()
//! );
//! # Ok::<(), quiver_decode::DecodeError>(())
//! ```

pub mod decoded;
pub mod decoder;
pub mod error;
pub mod source;

pub use decoded::{DecodeOptions, DecodedImage};
pub use decoder::{
    compute_subsample, subsampled_size, Decoder, ProbeInfo, DEFAULT_MAX_DECODE_BYTES,
};
pub use error::{DecodeError, FetchError};
pub use source::{ImageStream, RawBytesHandle, StreamOpener};
