//! Request identity.

use quiver_common::{ImageUri, SizeSpec};
use quiver_decode::DecodeOptions;
use std::fmt;

/// What makes two requests "the same": source, target size and decode options.
///
/// Used both as the memory cache key and as the coalescing key. The disk
/// cache keys on the URI alone since it stores raw source bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    pub uri: ImageUri,
    pub size: SizeSpec,
    pub decode: DecodeOptions,
}

impl RequestKey {
    pub fn new(uri: ImageUri, size: SizeSpec, decode: DecodeOptions) -> Self {
        Self { uri, size, decode }
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}/{:?}", self.uri, self.size, self.decode.layout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiver_common::PixelLayout;
    use std::collections::HashSet;

    fn key(uri: &str, size: SizeSpec, layout: PixelLayout) -> RequestKey {
        RequestKey::new(
            ImageUri::parse(uri).unwrap(),
            size,
            DecodeOptions::with_layout(layout),
        )
    }

    #[test]
    fn test_identity() {
        let small = SizeSpec::bounded(10, 10).unwrap();
        let mut keys = HashSet::new();
        keys.insert(key("HTTPS://example.com/a.png", small, PixelLayout::Rgba8));
        keys.insert(key(" https://example.com/a.png ", small, PixelLayout::Rgba8));
        assert_eq!(keys.len(), 1);

        keys.insert(key("https://example.com/a.png", SizeSpec::Unspecified, PixelLayout::Rgba8));
        keys.insert(key("https://example.com/a.png", small, PixelLayout::Luma8));
        assert_eq!(keys.len(), 3);
    }

    #[test]
    fn test_display() {
        let k = key("/tmp/a.png", SizeSpec::bounded(4, 3).unwrap(), PixelLayout::Rgb8);
        assert_eq!(k.to_string(), "file:///tmp/a.png@4x3/Rgb8");
    }
}
