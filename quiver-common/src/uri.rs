//! Image source identifiers.
//!
//! Supported forms:
//! - `http://host/image.png`, `https://host/image.png` - remote
//! - `/abs/path/image.png`, `file:///abs/path/image.png` - filesystem
//! - `asset://icons/logo.png` - bundled asset relative to the asset root
//! - `resource://42` - in-process resource table

use std::fmt;
use thiserror::Error;

/// Errors produced while parsing an image URI.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UriError {
    /// Nothing but whitespace.
    #[error("Empty image URI")]
    Empty,

    /// Scheme not handled by any fetcher.
    #[error("Unsupported URI scheme: {0}")]
    UnsupportedScheme(String),

    /// Scheme is known but the remainder is unusable.
    #[error("Malformed URI: {0}")]
    Malformed(String),
}

/// Where the bytes of an image come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// `http` / `https`; the only scheme that goes through the disk cache.
    Remote,
    /// Local filesystem.
    File,
    /// Bundled asset.
    Asset,
    /// Registered in-process resource.
    Resource,
}

impl Scheme {
    /// True for sources whose raw bytes are worth persisting on disk.
    pub const fn is_remote(self) -> bool {
        matches!(self, Self::Remote)
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote => write!(f, "remote"),
            Self::File => write!(f, "file"),
            Self::Asset => write!(f, "asset"),
            Self::Resource => write!(f, "resource"),
        }
    }
}

/// A parsed, normalized image URI.
///
/// Two URIs that differ only in scheme case or surrounding whitespace
/// normalize to the same string, and therefore to the same request key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageUri {
    normalized: String,
    scheme: Scheme,
    /// Offset of the scheme-specific part within `normalized`.
    location_start: usize,
}

impl ImageUri {
    /// Parse and normalize a URI.
    pub fn parse(input: &str) -> Result<Self, UriError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(UriError::Empty);
        }

        if trimmed.starts_with('/') {
            return Ok(Self::build("file", Scheme::File, trimmed));
        }

        let Some((scheme_str, rest)) = trimmed.split_once("://") else {
            return Err(UriError::UnsupportedScheme(trimmed.to_string()));
        };
        let scheme_lower = scheme_str.to_ascii_lowercase();
        let scheme = match scheme_lower.as_str() {
            "http" | "https" => Scheme::Remote,
            "file" => Scheme::File,
            "asset" | "assets" => Scheme::Asset,
            "resource" | "drawable" => Scheme::Resource,
            _ => return Err(UriError::UnsupportedScheme(scheme_str.to_string())),
        };

        if rest.is_empty() {
            return Err(UriError::Malformed(trimmed.to_string()));
        }
        match scheme {
            Scheme::File if !rest.starts_with('/') => {
                return Err(UriError::Malformed(trimmed.to_string()));
            }
            Scheme::Asset if rest.split('/').any(|c| c == "..") => {
                return Err(UriError::Malformed(trimmed.to_string()));
            }
            _ => {}
        }

        let canonical_scheme = match scheme {
            Scheme::Asset => "asset",
            Scheme::Resource => "resource",
            _ => scheme_lower.as_str(),
        };
        Ok(Self::build(canonical_scheme, scheme, rest))
    }

    fn build(scheme_str: &str, scheme: Scheme, location: &str) -> Self {
        let normalized = format!("{scheme_str}://{location}");
        let location_start = scheme_str.len() + 3;
        Self {
            normalized,
            scheme,
            location_start,
        }
    }

    /// The normalized URI string.
    pub fn as_str(&self) -> &str {
        &self.normalized
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Scheme-specific part: a path for files, a relative path for assets,
    /// an id for resources, or `host/path` for remote URIs.
    pub fn location(&self) -> &str {
        &self.normalized[self.location_start..]
    }
}

impl fmt::Display for ImageUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.normalized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote() {
        let uri = ImageUri::parse("  HTTPS://example.com/a.png ").unwrap();
        assert_eq!(uri.scheme(), Scheme::Remote);
        assert_eq!(uri.as_str(), "https://example.com/a.png");
        assert_eq!(uri.location(), "example.com/a.png");
    }

    #[test]
    fn test_absolute_path_becomes_file_uri() {
        let uri = ImageUri::parse("/tmp/a.jpg").unwrap();
        assert_eq!(uri.scheme(), Scheme::File);
        assert_eq!(uri.as_str(), "file:///tmp/a.jpg");
        assert_eq!(uri.location(), "/tmp/a.jpg");
        assert_eq!(uri, ImageUri::parse("file:///tmp/a.jpg").unwrap());
    }

    #[test]
    fn test_asset_and_resource_aliases() {
        let asset = ImageUri::parse("assets://icons/logo.png").unwrap();
        assert_eq!(asset.scheme(), Scheme::Asset);
        assert_eq!(asset.as_str(), "asset://icons/logo.png");

        let res = ImageUri::parse("drawable://17").unwrap();
        assert_eq!(res.scheme(), Scheme::Resource);
        assert_eq!(res.location(), "17");
    }

    #[test]
    fn test_rejections() {
        assert_eq!(ImageUri::parse("   "), Err(UriError::Empty));
        assert!(matches!(
            ImageUri::parse("ftp://x/y"),
            Err(UriError::UnsupportedScheme(_))
        ));
        assert!(matches!(
            ImageUri::parse("relative/path.png"),
            Err(UriError::UnsupportedScheme(_))
        ));
        assert!(matches!(
            ImageUri::parse("asset://../secret"),
            Err(UriError::Malformed(_))
        ));
        assert!(matches!(
            ImageUri::parse("file://relative"),
            Err(UriError::Malformed(_))
        ));
        assert!(matches!(ImageUri::parse("http://"), Err(UriError::Malformed(_))));
    }

    #[test]
    fn test_only_remote_is_remote() {
        assert!(Scheme::Remote.is_remote());
        assert!(!Scheme::File.is_remote());
        assert!(!Scheme::Asset.is_remote());
        assert!(!Scheme::Resource.is_remote());
    }
}
