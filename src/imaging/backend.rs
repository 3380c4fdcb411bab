//! Image codec traits and shared types.
//!
//! The resolver never touches pixels itself. It talks to an [`ImageBackend`],
//! which can probe a file's dimensions and open it for editing, and to the
//! [`ImageEditor`] handle the backend returns, which scales, crops and saves.
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend), built on the `image`
//! crate. Tests use the recording `MockBackend` in this module.

use super::params::{Quality, ResizeMode};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

/// Pixel dimensions of a raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn as_tuple(self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl From<(u32, u32)> for Dimensions {
    fn from((width, height): (u32, u32)) -> Self {
        Self { width, height }
    }
}

/// An opened raster that can be resized and written out.
pub trait ImageEditor {
    /// Quality used by lossy encoders on [`save`](Self::save).
    fn set_quality(&mut self, quality: Quality);

    /// Scale (and for [`ResizeMode::Crop`], crop) the in-memory raster
    /// towards the given box. Returns the raster's new size.
    fn resize(&mut self, width: u32, height: u32, mode: ResizeMode)
    -> Result<Dimensions, BackendError>;

    /// Encode the raster to `dest`; the format follows the extension.
    fn save(&self, dest: &Path) -> Result<(), BackendError>;
}

/// Trait for image codec backends.
pub trait ImageBackend: Sync {
    type Editor: ImageEditor;

    /// Read dimensions from the file header without decoding pixels.
    fn identify(&self, path: &Path) -> Result<Dimensions, BackendError>;

    /// Decode a file for editing.
    fn open(&self, path: &Path) -> Result<Self::Editor, BackendError>;
}
