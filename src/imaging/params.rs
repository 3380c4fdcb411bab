//! Parameter types for image operations.
//!
//! These types describe *what* the codec should do, not *how*. They sit
//! between the resolver (which decides whether a variant is needed) and the
//! [`backend`](super::backend) (which does the pixel work), so a mock codec
//! can be swapped in without touching resolution logic.
//!
//! - [`Quality`] — lossy encoding quality (1–100, default 90). Clamped on construction.
//! - [`ResizeMode`] — fit inside the box, or fill and crop to it.

use std::fmt;

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(pub u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(90)
    }
}

/// How a source raster is brought down to a target box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResizeMode {
    /// Scale to fit inside the box, preserving aspect ratio.
    Fit,
    /// Scale to cover the box, then centre-crop to exactly its size.
    Crop,
}

impl ResizeMode {
    pub fn from_crop(crop: bool) -> Self {
        if crop { Self::Crop } else { Self::Fit }
    }

    pub fn is_crop(self) -> bool {
        matches!(self, Self::Crop)
    }
}

impl fmt::Display for ResizeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fit => f.write_str("fit"),
            Self::Crop => f.write_str("crop"),
        }
    }
}
