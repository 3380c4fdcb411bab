//! Shared test utilities.
//!
//! Raster fixtures written with the `image` crate, repository shorthands, and
//! [`MockSite`]: a temp document root holding one source image, wired to a
//! [`MockBackend`] and an [`InMemoryRepository`].
//!
//! # Usage
//!
//! ```ignore
//! use crate::test_helpers::*;
//!
//! let site = MockSite::new(2000, 1000);   // uploads/sunset.jpg, item 1
//! let resolver = site.resolver();
//! let d = resolver.resolve_variant(&item, &VariantRequest::fit(140, 110))?;
//! assert!(site.dir().join("sunset-140x70.jpg").is_file());
//! ```

use image::{ImageEncoder, RgbImage};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::imaging::backend::tests::MockBackend;
use crate::resolve::VariantResolver;
use crate::source::{InMemoryRepository, StoredItem};

// =========================================================================
// Raster fixtures
// =========================================================================

fn gradient(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    })
}

/// Create a small valid JPEG file with the given dimensions.
pub fn create_test_jpeg(path: &Path, width: u32, height: u32) {
    let img = gradient(width, height);
    let file = std::fs::File::create(path).unwrap();
    let writer = std::io::BufWriter::new(file);
    image::codecs::jpeg::JpegEncoder::new(writer)
        .write_image(img.as_raw(), width, height, image::ExtendedColorType::Rgb8)
        .unwrap();
}

/// Create a small valid PNG file with the given dimensions.
pub fn create_test_png(path: &Path, width: u32, height: u32) {
    gradient(width, height)
        .save_with_format(path, image::ImageFormat::Png)
        .unwrap();
}

// =========================================================================
// Repository shorthands
// =========================================================================

pub fn stored_item(path: &str, url: &str, width: u32, height: u32) -> StoredItem {
    StoredItem {
        path: PathBuf::from(path),
        url: url.to_string(),
        width,
        height,
    }
}

// =========================================================================
// MockSite
// =========================================================================

/// A document root with `uploads/sunset.jpg` registered as item 1 and served
/// at `http://example.com/uploads/sunset.jpg`.
///
/// The source file holds placeholder bytes; its dimensions live in the
/// [`MockBackend`]. Every backend handed out shares the same recorded state.
pub struct MockSite {
    _tmp: TempDir,
    pub root: PathBuf,
    pub source: PathBuf,
    pub url: String,
    width: u32,
    height: u32,
    backend: MockBackend,
}

impl MockSite {
    pub fn new(width: u32, height: u32) -> Self {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().to_path_buf();
        std::fs::create_dir_all(root.join("uploads")).unwrap();
        let source = root.join("uploads/sunset.jpg");
        std::fs::write(&source, b"source raster").unwrap();
        let backend = MockBackend::new().with_file(source.clone(), width, height);
        Self {
            _tmp: tmp,
            root,
            source,
            url: "http://example.com/uploads/sunset.jpg".to_string(),
            width,
            height,
            backend,
        }
    }

    /// Directory holding the source and its variants.
    pub fn dir(&self) -> PathBuf {
        self.root.join("uploads")
    }

    pub fn backend(&self) -> MockBackend {
        self.backend.clone()
    }

    pub fn repository(&self) -> InMemoryRepository {
        InMemoryRepository::new().with_item(
            1,
            stored_item("uploads/sunset.jpg", &self.url, self.width, self.height),
        )
    }

    pub fn resolver(&self) -> VariantResolver<MockBackend, InMemoryRepository> {
        self.resolver_with(self.backend())
    }

    pub fn resolver_with(
        &self,
        backend: MockBackend,
    ) -> VariantResolver<MockBackend, InMemoryRepository> {
        VariantResolver::new(backend, self.repository(), &self.root)
    }

    /// Number of entries in [`dir`](Self::dir), the source included.
    pub fn file_count(&self) -> usize {
        std::fs::read_dir(self.dir()).unwrap().count()
    }
}
