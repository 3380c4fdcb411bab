//! Pure Rust codec backend built on the `image` crate.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Identify | `image::image_dimensions` (header only) |
//! | Decode (JPEG, PNG, GIF, TIFF, WebP) | `image::ImageReader`, format guessed from content |
//! | Fit resize | `fit_dimensions`, then `DynamicImage::resize_exact` with `Lanczos3` |
//! | Crop resize | `image::DynamicImage::resize_to_fill` with `Lanczos3` |
//! | Encode JPEG | `image::codecs::jpeg::JpegEncoder` at the configured quality |
//! | Encode PNG, GIF, TIFF, WebP | `DynamicImage::save_with_format` (WebP is lossless) |

use super::backend::{BackendError, Dimensions, ImageBackend, ImageEditor};
use super::calculations::fit_dimensions;
use super::params::{Quality, ResizeMode};
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader};
use std::path::Path;
use std::sync::LazyLock;

/// Extensions whose decoders and encoders are compiled in.
const FORMAT_CANDIDATES: &[(&str, ImageFormat)] = &[
    ("jpg", ImageFormat::Jpeg),
    ("jpeg", ImageFormat::Jpeg),
    ("png", ImageFormat::Png),
    ("gif", ImageFormat::Gif),
    ("tif", ImageFormat::Tiff),
    ("tiff", ImageFormat::Tiff),
    ("webp", ImageFormat::WebP),
];

static SUPPORTED_EXTENSIONS: LazyLock<Vec<&'static str>> = LazyLock::new(|| {
    FORMAT_CANDIDATES
        .iter()
        .filter(|(_, fmt)| fmt.reading_enabled() && fmt.writing_enabled())
        .map(|(ext, _)| *ext)
        .collect()
});

/// Returns the image file extensions that can be both decoded and re-encoded.
pub fn supported_input_extensions() -> &'static [&'static str] {
    &SUPPORTED_EXTENSIONS
}

/// Whether a path has one of the [`supported_input_extensions`].
pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| {
            supported_input_extensions()
                .iter()
                .any(|s| s.eq_ignore_ascii_case(e))
        })
}

fn format_for_path(path: &Path) -> Result<ImageFormat, BackendError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    FORMAT_CANDIDATES
        .iter()
        .find(|(candidate, _)| *candidate == ext)
        .map(|(_, fmt)| *fmt)
        .ok_or(BackendError::UnsupportedFormat(ext))
}

/// Pure Rust backend using the `image` crate ecosystem.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct RustBackend;

impl RustBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// A decoded raster plus the quality it will be encoded with.
pub struct RustEditor {
    image: DynamicImage,
    quality: Quality,
}

/// Load and decode an image from disk.
fn load_image(path: &Path) -> Result<DynamicImage, BackendError> {
    ImageReader::open(path)
        .map_err(BackendError::Io)?
        .with_guessed_format()
        .map_err(BackendError::Io)?
        .decode()
        .map_err(|e| {
            BackendError::ProcessingFailed(format!("Failed to decode {}: {}", path.display(), e))
        })
}

/// Encode and save, inferring the format from the extension.
fn save_image(img: &DynamicImage, path: &Path, quality: Quality) -> Result<(), BackendError> {
    match format_for_path(path)? {
        ImageFormat::Jpeg => save_jpeg(img, path, quality),
        format => img.save_with_format(path, format).map_err(|e| {
            BackendError::ProcessingFailed(format!("Failed to encode {}: {}", path.display(), e))
        }),
    }
}

/// JPEG has no alpha channel, so transparent sources are flattened to RGB.
fn save_jpeg(img: &DynamicImage, path: &Path, quality: Quality) -> Result<(), BackendError> {
    let file = std::fs::File::create(path).map_err(BackendError::Io)?;
    let writer = std::io::BufWriter::new(file);
    let encoder =
        image::codecs::jpeg::JpegEncoder::new_with_quality(writer, quality.value() as u8);
    let result = if img.color().has_alpha() || !matches!(img, DynamicImage::ImageRgb8(_)) {
        DynamicImage::ImageRgb8(img.to_rgb8()).write_with_encoder(encoder)
    } else {
        img.write_with_encoder(encoder)
    };
    result.map_err(|e| BackendError::ProcessingFailed(format!("JPEG encode failed: {}", e)))
}

impl ImageBackend for RustBackend {
    type Editor = RustEditor;

    fn identify(&self, path: &Path) -> Result<Dimensions, BackendError> {
        let (width, height) = image::image_dimensions(path).map_err(|e| {
            BackendError::ProcessingFailed(format!("Failed to read dimensions: {}", e))
        })?;
        Ok(Dimensions { width, height })
    }

    fn open(&self, path: &Path) -> Result<RustEditor, BackendError> {
        Ok(RustEditor {
            image: load_image(path)?,
            quality: Quality::default(),
        })
    }
}

impl ImageEditor for RustEditor {
    fn set_quality(&mut self, quality: Quality) {
        self.quality = quality;
    }

    fn resize(
        &mut self,
        width: u32,
        height: u32,
        mode: ResizeMode,
    ) -> Result<Dimensions, BackendError> {
        if width == 0 || height == 0 {
            return Err(BackendError::ProcessingFailed(format!(
                "Invalid target size {}x{}",
                width, height
            )));
        }
        self.image = match mode {
            // Same rounding as the cache lookup, so fitted names always match
            ResizeMode::Fit => {
                let (w, h) = fit_dimensions(
                    (self.image.width(), self.image.height()),
                    (width, height),
                );
                self.image.resize_exact(w, h, FilterType::Lanczos3)
            }
            // Fill-resize then centre-crop to exact dimensions
            ResizeMode::Crop => self.image.resize_to_fill(width, height, FilterType::Lanczos3),
        };
        Ok(Dimensions {
            width: self.image.width(),
            height: self.image.height(),
        })
    }

    fn save(&self, dest: &Path) -> Result<(), BackendError> {
        save_image(&self.image, dest, self.quality)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{create_test_jpeg, create_test_png};

    #[test]
    fn supported_extensions_match_codecs() {
        let exts = supported_input_extensions();
        for expected in &["jpg", "jpeg", "png", "gif", "tif", "tiff", "webp"] {
            assert!(
                exts.contains(expected),
                "expected {expected} in supported extensions"
            );
        }
        assert!(!exts.contains(&"avif"));
    }

    #[test]
    fn supported_image_is_case_insensitive() {
        assert!(is_supported_image(Path::new("a/B.JPG")));
        assert!(is_supported_image(Path::new("photo.webp")));
        assert!(!is_supported_image(Path::new("notes.txt")));
        assert!(!is_supported_image(Path::new("no-extension")));
    }

    #[test]
    fn identify_synthetic_jpeg() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("test.jpg");
        create_test_jpeg(&path, 200, 150);

        let dims = RustBackend::new().identify(&path).unwrap();
        assert_eq!(dims, Dimensions::new(200, 150));
    }

    #[test]
    fn identify_nonexistent_file_errors() {
        let result = RustBackend::new().identify(Path::new("/nonexistent/image.jpg"));
        assert!(result.is_err());
    }

    #[test]
    fn open_garbage_errors() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("broken.jpg");
        std::fs::write(&path, b"definitely not a jpeg").unwrap();

        assert!(RustBackend::new().open(&path).is_err());
    }

    #[test]
    fn fit_resize_keeps_aspect() {
        let tmp = tempfile::TempDir::new().unwrap();
        let source = tmp.path().join("source.jpg");
        create_test_jpeg(&source, 400, 200);

        let backend = RustBackend::new();
        let mut editor = backend.open(&source).unwrap();
        let dims = editor.resize(140, 110, ResizeMode::Fit).unwrap();
        assert_eq!(dims, Dimensions::new(140, 70));

        let output = tmp.path().join("out.jpg");
        editor.save(&output).unwrap();
        assert_eq!(backend.identify(&output).unwrap(), Dimensions::new(140, 70));
    }

    #[test]
    fn crop_resize_is_exact() {
        let tmp = tempfile::TempDir::new().unwrap();
        let source = tmp.path().join("source.png");
        create_test_png(&source, 400, 200);

        let backend = RustBackend::new();
        let mut editor = backend.open(&source).unwrap();
        let dims = editor.resize(140, 110, ResizeMode::Crop).unwrap();
        assert_eq!(dims, Dimensions::new(140, 110));

        let output = tmp.path().join("out.png");
        editor.save(&output).unwrap();
        assert_eq!(backend.identify(&output).unwrap(), Dimensions::new(140, 110));
    }

    #[test]
    fn save_unsupported_extension_errors() {
        let tmp = tempfile::TempDir::new().unwrap();
        let source = tmp.path().join("source.jpg");
        create_test_jpeg(&source, 100, 100);

        let editor = RustBackend::new().open(&source).unwrap();
        let result = editor.save(&tmp.path().join("output.bmpx"));
        assert!(matches!(result, Err(BackendError::UnsupportedFormat(_))));
    }

    #[test]
    fn zero_target_is_rejected() {
        let tmp = tempfile::TempDir::new().unwrap();
        let source = tmp.path().join("source.jpg");
        create_test_jpeg(&source, 100, 100);

        let mut editor = RustBackend::new().open(&source).unwrap();
        assert!(editor.resize(0, 10, ResizeMode::Fit).is_err());
    }
}
