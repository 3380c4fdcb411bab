//! Pure calculation functions for image dimensions.
//!
//! All functions here are pure and testable without any I/O or images.

/// Whether an image of `original` size must be scaled down to fit `bounds`.
///
/// An image that already fits in both directions is used as-is, even when
/// the caller asked for a crop.
pub fn needs_resize(original: (u32, u32), bounds: (u32, u32)) -> bool {
    original.0 > bounds.0 || original.1 > bounds.1
}

/// Calculate "fit" dimensions: the largest size with the source aspect ratio
/// that fits inside `bounds`.
///
/// Never upscales and never returns a zero side. When the source exceeds the
/// box, the constraining side lands exactly on its bound and the other side
/// is rounded to the nearest pixel.
///
/// # Arguments
/// * `original` - Source dimensions (width, height)
/// * `bounds` - Bounding box (width, height), both non-zero
///
/// # Examples
/// ```
/// # use image_variants::imaging::fit_dimensions;
/// // 2000x1000 into a 140x110 box → width-limited
/// assert_eq!(fit_dimensions((2000, 1000), (140, 110)), (140, 70));
///
/// // Already small enough → unchanged
/// assert_eq!(fit_dimensions((100, 50), (140, 110)), (100, 50));
/// ```
pub fn fit_dimensions(original: (u32, u32), bounds: (u32, u32)) -> (u32, u32) {
    let (src_w, src_h) = original;
    let (max_w, max_h) = bounds;

    if src_w == 0 || src_h == 0 || !needs_resize(original, bounds) {
        return original;
    }

    let width_ratio = max_w as f64 / src_w as f64;
    let height_ratio = max_h as f64 / src_h as f64;
    let ratio = width_ratio.min(height_ratio);

    let w = ((src_w as f64 * ratio).round() as u32).clamp(1, max_w.max(1));
    let h = ((src_h as f64 * ratio).round() as u32).clamp(1, max_h.max(1));
    (w, h)
}
