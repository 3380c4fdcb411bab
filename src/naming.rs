//! Derived-filename convention for cached variants.
//!
//! A variant lives next to its source and its name *is* the cache key:
//!
//! ```text
//! uploads/2014/05/sunset.JPG                 ← source
//! uploads/2014/05/sunset-140x70.jpg          ← fit variant (actual size 140x70)
//! uploads/2014/05/sunset-140x110-crop.jpg    ← crop variant (exactly 140x110)
//! ```
//!
//! Fit and crop variants carry different names, so a fit result that happens
//! to match a crop box can never be mistaken for a crop (or the reverse).
//! Extensions are lower-cased on the derived name.
//!
//! Generated files are first written to a hidden temp sibling
//! (`.tmp-<pid>-<seq>-<final name>`) and renamed into place; temp names are
//! never parsed as variants.

use crate::imaging::{Dimensions, ResizeMode, needs_resize};
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Suffix marking a crop-mode variant.
const CROP_TAG: &str = "crop";

/// Prefix of in-flight temp files.
const TEMP_PREFIX: &str = ".tmp-";

static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// A parsed derived filename like `sunset-140x110-crop.jpg`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedName {
    /// Source base name without extension (`sunset`).
    pub stem: String,
    pub dims: Dimensions,
    pub mode: ResizeMode,
    /// Lower-case extension without the dot; empty if the source had none.
    pub extension: String,
}

/// File name of a variant: `<stem>-<W>x<H>[-crop][.<ext>]`.
pub fn derived_file_name(stem: &str, dims: Dimensions, mode: ResizeMode, extension: &str) -> String {
    let mut name = format!("{}-{}x{}", stem, dims.width, dims.height);
    if mode.is_crop() {
        name.push('-');
        name.push_str(CROP_TAG);
    }
    if !extension.is_empty() {
        name.push('.');
        name.push_str(&extension.to_lowercase());
    }
    name
}

/// Full path of the variant of `source` at `dims` in `mode`.
///
/// Pure function of the source directory, stem, extension, size and mode.
pub fn derived_path(source: &Path, dims: Dimensions, mode: ResizeMode) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy())
        .unwrap_or_default();
    let extension = source
        .extension()
        .map(|e| e.to_string_lossy())
        .unwrap_or_default();
    source.with_file_name(derived_file_name(&stem, dims, mode, &extension))
}

/// Parse a variant file name. Returns `None` for anything that is not one,
/// including hidden and temp files.
pub fn parse_derived_name(file_name: &str) -> Option<DerivedName> {
    if file_name.starts_with('.') {
        return None;
    }
    let (base, extension) = match file_name.rsplit_once('.') {
        Some((base, ext)) if !ext.is_empty() => (base, ext),
        _ => (file_name, ""),
    };
    let (base, mode) = match base.strip_suffix(CROP_TAG).and_then(|b| b.strip_suffix('-')) {
        Some(rest) => (rest, ResizeMode::Crop),
        None => (base, ResizeMode::Fit),
    };
    let (stem, size) = base.rsplit_once('-')?;
    if stem.is_empty() {
        return None;
    }
    let (w, h) = size.split_once('x')?;
    Some(DerivedName {
        stem: stem.to_string(),
        dims: Dimensions::new(parse_side(w)?, parse_side(h)?),
        mode,
        extension: extension.to_lowercase(),
    })
}

fn parse_side(digits: &str) -> Option<u32> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok().filter(|&n| n > 0)
}

impl DerivedName {
    /// Whether this name belongs to `source` (same stem, same extension up
    /// to case).
    pub fn names_source(&self, source: &Path) -> bool {
        let stem = source.file_stem().map(|s| s.to_string_lossy());
        let extension = source
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        stem.as_deref() == Some(self.stem.as_str()) && self.extension == extension
    }

    /// Whether a source of `original` size could have produced this variant.
    ///
    /// Any crop qualifies. A fit must be smaller than the source and keep its
    /// aspect ratio up to rounding, so `banner-728x90.jpg` next to a 1000x500
    /// `banner.jpg` is an upload, not a variant.
    pub fn matches_source(&self, original: Dimensions) -> bool {
        match self.mode {
            ResizeMode::Crop => true,
            ResizeMode::Fit => {
                let (w, h) = (u64::from(self.dims.width), u64::from(self.dims.height));
                let (src_w, src_h) = (u64::from(original.width), u64::from(original.height));
                // The unconstrained side is off by at most half a pixel, or clamped to 1.
                let skew = (w * src_h).abs_diff(h * src_w);
                needs_resize(original.as_tuple(), self.dims.as_tuple())
                    && w <= src_w
                    && h <= src_h
                    && (2 * skew <= src_w.max(src_h) || w == 1 || h == 1)
            }
        }
    }
}

/// Whether `file_name` is a derived variant of `source`, whose full size is
/// `original`.
pub fn is_variant_of(source: &Path, original: Dimensions, file_name: &str) -> bool {
    parse_derived_name(file_name)
        .is_some_and(|parsed| parsed.names_source(source) && parsed.matches_source(original))
}

/// Unique hidden sibling of `final_path` used while a variant is written.
///
/// Keeps the final name (and therefore extension) as its tail so the
/// encoder picks the same format.
pub fn temp_path(final_path: &Path) -> PathBuf {
    let name = final_path
        .file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_default();
    let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
    final_path.with_file_name(format!(
        "{}{}-{}-{}",
        TEMP_PREFIX,
        std::process::id(),
        seq,
        name
    ))
}

/// Inverse of [`temp_path`].
pub fn final_path_of_temp(temp: &Path) -> Option<PathBuf> {
    let name = temp.file_name()?.to_str()?;
    let rest = name.strip_prefix(TEMP_PREFIX)?;
    let (_pid, rest) = rest.split_once('-')?;
    let (_seq, final_name) = rest.split_once('-')?;
    if final_name.is_empty() {
        return None;
    }
    Some(temp.with_file_name(final_name))
}

/// Bytes escaped when a file name becomes a URL path segment.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Replace the last path segment of `url` with `file_name`, keeping any
/// query string or fragment. The file name is percent-encoded.
///
/// - `http://x.com/a/b.jpg` + `b-10x10.jpg` → `http://x.com/a/b-10x10.jpg`
/// - `/a/b.jpg?v=2` + `b-10x10.jpg` → `/a/b-10x10.jpg?v=2`
/// - `/a/my%20b.jpg` + `my b-10x10.jpg` → `/a/my%20b-10x10.jpg`
pub fn substitute_basename(url: &str, file_name: &str) -> String {
    let split_at = url.find(|c| c == '?' || c == '#').unwrap_or(url.len());
    let (base, suffix) = url.split_at(split_at);
    let segment = utf8_percent_encode(file_name, PATH_SEGMENT);
    match base.rfind('/') {
        Some(slash) => format!("{}{}{}", &base[..=slash], segment, suffix),
        None => format!("{}{}", segment, suffix),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::fit_dimensions;

    fn dims(w: u32, h: u32) -> Dimensions {
        Dimensions::new(w, h)
    }

    // =========================================================================
    // derived_path
    // =========================================================================

    #[test]
    fn fit_variant_path() {
        let p = derived_path(Path::new("/srv/up/sunset.jpg"), dims(140, 70), ResizeMode::Fit);
        assert_eq!(p, PathBuf::from("/srv/up/sunset-140x70.jpg"));
    }

    #[test]
    fn crop_variant_path_is_tagged() {
        let p = derived_path(
            Path::new("/srv/up/sunset.jpg"),
            dims(140, 110),
            ResizeMode::Crop,
        );
        assert_eq!(p, PathBuf::from("/srv/up/sunset-140x110-crop.jpg"));
    }

    #[test]
    fn fit_and_crop_keys_differ_for_same_box() {
        let src = Path::new("/srv/a.png");
        assert_ne!(
            derived_path(src, dims(100, 100), ResizeMode::Fit),
            derived_path(src, dims(100, 100), ResizeMode::Crop)
        );
    }

    #[test]
    fn extension_is_lowercased() {
        let p = derived_path(Path::new("/srv/IMG_01.JPG"), dims(10, 20), ResizeMode::Fit);
        assert_eq!(p, PathBuf::from("/srv/IMG_01-10x20.jpg"));
    }

    #[test]
    fn dotted_stem_keeps_inner_dots() {
        let p = derived_path(Path::new("/srv/my.photo.v2.png"), dims(5, 5), ResizeMode::Fit);
        assert_eq!(p, PathBuf::from("/srv/my.photo.v2-5x5.png"));
    }

    #[test]
    fn derived_path_is_deterministic() {
        let src = Path::new("/srv/up/sunset.jpg");
        let a = derived_path(src, dims(300, 200), ResizeMode::Fit);
        let b = derived_path(src, dims(300, 200), ResizeMode::Fit);
        assert_eq!(a, b);
    }

    // =========================================================================
    // parse_derived_name
    // =========================================================================

    #[test]
    fn parse_fit_name() {
        assert_eq!(
            parse_derived_name("sunset-140x70.jpg"),
            Some(DerivedName {
                stem: "sunset".into(),
                dims: dims(140, 70),
                mode: ResizeMode::Fit,
                extension: "jpg".into(),
            })
        );
    }

    #[test]
    fn parse_crop_name() {
        let parsed = parse_derived_name("my-trip-140x110-crop.png").unwrap();
        assert_eq!(parsed.stem, "my-trip");
        assert_eq!(parsed.dims, dims(140, 110));
        assert_eq!(parsed.mode, ResizeMode::Crop);
    }

    #[test]
    fn parse_inverts_derived_file_name() {
        let name = derived_file_name("a-b", dims(12, 34), ResizeMode::Crop, "webp");
        let parsed = parse_derived_name(&name).unwrap();
        assert_eq!(parsed.stem, "a-b");
        assert_eq!(parsed.dims, dims(12, 34));
        assert_eq!(parsed.mode, ResizeMode::Crop);
        assert_eq!(parsed.extension, "webp");
    }

    #[test]
    fn parse_rejects_non_variants() {
        assert_eq!(parse_derived_name("sunset.jpg"), None);
        assert_eq!(parse_derived_name("sunset-large.jpg"), None);
        assert_eq!(parse_derived_name("sunset-10x.jpg"), None);
        assert_eq!(parse_derived_name("sunset-0x10.jpg"), None);
        assert_eq!(parse_derived_name("sunset-+1x2.jpg"), None);
        assert_eq!(parse_derived_name("-10x10.jpg"), None);
        assert_eq!(parse_derived_name(".hidden-10x10.jpg"), None);
    }

    #[test]
    fn parse_ignores_temp_files() {
        let tmp = temp_path(Path::new("/x/sunset-10x10.jpg"));
        let name = tmp.file_name().unwrap().to_str().unwrap();
        assert_eq!(parse_derived_name(name), None);
    }

    #[test]
    fn variant_of_matches_stem_and_extension() {
        let src = Path::new("/srv/sunset.JPG");
        let original = dims(2000, 1000);
        assert!(is_variant_of(src, original, "sunset-140x70.jpg"));
        assert!(is_variant_of(src, original, "sunset-140x110-crop.jpg"));
        assert!(!is_variant_of(src, original, "sunset-140x70.png"));
        assert!(!is_variant_of(src, original, "sunrise-140x70.jpg"));
        assert!(!is_variant_of(src, original, "sunset.jpg"));
    }

    #[test]
    fn fit_variant_must_keep_source_aspect() {
        let src = Path::new("/srv/banner.jpg");
        let original = dims(1000, 500);
        assert!(is_variant_of(src, original, "banner-180x90.jpg"));
        assert!(is_variant_of(src, original, "banner-728x90-crop.jpg"));
        assert!(!is_variant_of(src, original, "banner-728x90.jpg"));
        // Not smaller than the source, so never generated.
        assert!(!is_variant_of(src, original, "banner-1000x500.jpg"));
    }

    #[test]
    fn fit_aspect_check_tolerates_rounding() {
        // Every size the fit math produces is recognised as a fit of its source.
        for original in [
            dims(2000, 1000),
            dims(3, 1000),
            dims(1234, 567),
            dims(640, 481),
            dims(1000, 13),
            dims(1000, 17),
        ] {
            for bounds in [(140, 110), (1, 500), (100, 100), (333, 17)] {
                let (w, h) = fit_dimensions(original.as_tuple(), bounds);
                if !needs_resize(original.as_tuple(), bounds) {
                    continue;
                }
                let name = derived_file_name("a", dims(w, h), ResizeMode::Fit, "jpg");
                assert!(
                    parse_derived_name(&name).unwrap().matches_source(original),
                    "{name} from {original:?} into {bounds:?}"
                );
            }
        }
    }

    // =========================================================================
    // temp paths
    // =========================================================================

    #[test]
    fn temp_path_roundtrips_and_keeps_extension() {
        let final_path = Path::new("/srv/up/sunset-140x70.jpg");
        let tmp = temp_path(final_path);
        assert_eq!(tmp.parent(), final_path.parent());
        assert_eq!(tmp.extension().unwrap(), "jpg");
        assert_eq!(final_path_of_temp(&tmp).as_deref(), Some(final_path));
    }

    #[test]
    fn temp_paths_are_unique() {
        let final_path = Path::new("/srv/a-1x1.png");
        assert_ne!(temp_path(final_path), temp_path(final_path));
    }

    #[test]
    fn final_path_of_regular_file_is_none() {
        assert_eq!(final_path_of_temp(Path::new("/srv/a-1x1.png")), None);
    }

    // =========================================================================
    // substitute_basename
    // =========================================================================

    #[test]
    fn substitute_absolute_url() {
        assert_eq!(
            substitute_basename("http://example.com/up/sunset.jpg", "sunset-140x70.jpg"),
            "http://example.com/up/sunset-140x70.jpg"
        );
    }

    #[test]
    fn substitute_keeps_query_and_fragment() {
        assert_eq!(
            substitute_basename("/up/sunset.jpg?ver=3#top", "sunset-1x1.jpg"),
            "/up/sunset-1x1.jpg?ver=3#top"
        );
    }

    #[test]
    fn substitute_only_touches_last_segment() {
        // The basename also appears as a directory name.
        assert_eq!(
            substitute_basename("http://x.com/sunset.jpg/sunset.jpg", "s-1x1.jpg"),
            "http://x.com/sunset.jpg/s-1x1.jpg"
        );
    }

    #[test]
    fn substitute_bare_name() {
        assert_eq!(substitute_basename("a.jpg", "a-1x1.jpg"), "a-1x1.jpg");
    }

    #[test]
    fn substitute_encodes_file_name() {
        assert_eq!(
            substitute_basename("http://x.com/up/my%20photo.png", "my photo-140x70.png"),
            "http://x.com/up/my%20photo-140x70.png"
        );
        assert_eq!(
            substitute_basename("/up/café.jpg", "café-10x5.jpg"),
            "/up/caf%C3%A9-10x5.jpg"
        );
        assert_eq!(
            substitute_basename("/up/100%.jpg", "100%-1x1.jpg"),
            "/up/100%25-1x1.jpg"
        );
    }
}
