//! Target sizes and the size resolver.
//!
//! A display target rarely knows exactly how large the decoded image should be.
//! [`resolve_size`] picks each axis independently from, in order: the target's
//! laid-out size, the target's maximum size, and the engine-wide fallback.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Plain width/height pair in pixels.
///
/// A zero axis means "unknown" when used inside a [`SizeHint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    /// Create a new size.
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// True when both axes are positive.
    pub const fn is_positive(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    /// Number of pixels covered.
    pub const fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Bounds a decode should fit, or "use the source dimensions".
///
/// `Bounded` axes are always positive; construct through [`SizeSpec::bounded`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SizeSpec {
    /// Decode at full source resolution.
    #[default]
    Unspecified,
    /// Decode no smaller than necessary to cover these bounds.
    Bounded(Size),
}

impl SizeSpec {
    /// Bounded spec, or `None` if either axis is zero.
    pub const fn bounded(width: u32, height: u32) -> Option<Self> {
        if width > 0 && height > 0 {
            Some(Self::Bounded(Size::new(width, height)))
        } else {
            None
        }
    }

    /// The bounds, if any.
    pub const fn size(&self) -> Option<Size> {
        match self {
            Self::Unspecified => None,
            Self::Bounded(size) => Some(*size),
        }
    }

    pub const fn is_unspecified(&self) -> bool {
        matches!(self, Self::Unspecified)
    }
}

impl From<Option<Size>> for SizeSpec {
    fn from(size: Option<Size>) -> Self {
        size.and_then(|s| Self::bounded(s.width, s.height))
            .unwrap_or(Self::Unspecified)
    }
}

impl fmt::Display for SizeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unspecified => write!(f, "original"),
            Self::Bounded(size) => write!(f, "{size}"),
        }
    }
}

/// What a display target knows about its own geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SizeHint {
    /// Laid-out size; zero on an axis that has not been measured yet.
    pub layout: Size,
    /// Maximum size the target will ever grow to; zero when unbounded.
    pub max: Size,
}

impl SizeHint {
    /// Hint from a measured layout size.
    pub const fn layout(width: u32, height: u32) -> Self {
        Self {
            layout: Size::new(width, height),
            max: Size::new(0, 0),
        }
    }

    /// Add a maximum size to this hint.
    #[must_use]
    pub const fn with_max(mut self, width: u32, height: u32) -> Self {
        self.max = Size::new(width, height);
        self
    }
}

/// Resolve the size spec a request should decode against.
///
/// An explicit spec always wins, including an explicit
/// [`SizeSpec::Unspecified`]. Otherwise each axis takes the first positive
/// value of `hint.layout`, `hint.max` and `fallback`; if either axis stays
/// unknown the result is [`SizeSpec::Unspecified`].
pub fn resolve_size(explicit: Option<SizeSpec>, hint: SizeHint, fallback: SizeSpec) -> SizeSpec {
    if let Some(spec) = explicit {
        return spec;
    }

    let fallback = fallback.size().unwrap_or_default();
    let pick = |layout: u32, max: u32, fallback: u32| {
        [layout, max, fallback].into_iter().find(|v| *v > 0)
    };

    let width = pick(hint.layout.width, hint.max.width, fallback.width);
    let height = pick(hint.layout.height, hint.max.height, fallback.height);

    match (width, height) {
        (Some(w), Some(h)) => SizeSpec::Bounded(Size::new(w, h)),
        _ => SizeSpec::Unspecified,
    }
}
