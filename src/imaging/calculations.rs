//! Pure calculation functions for output dimensions.
//!
//! All functions here are pure and testable without any I/O or images.

use super::params::ResizeSpec;

/// Calculate dimensions that fit within a maximum width, preserving aspect ratio.
///
/// Sources already narrower than `max_width` keep their size; outputs are
/// never upscaled.
///
/// # Arguments
/// * `source` - Original image dimensions (width, height)
/// * `max_width` - Largest allowed output width in pixels
///
/// # Returns
/// * `(width, height)` - Output dimensions, each at least 1px
pub fn fit_to_width(source: (u32, u32), max_width: u32) -> (u32, u32) {
    let (src_w, src_h) = source;
    if src_w <= max_width || src_w == 0 {
        return source;
    }
    let h = (src_h as f64 * max_width as f64 / src_w as f64).round() as u32;
    (max_width.max(1), h.max(1))
}

/// Resolve the output dimensions for a [`ResizeSpec`].
pub fn target_dimensions(source: (u32, u32), resize: ResizeSpec) -> (u32, u32) {
    match resize {
        ResizeSpec::Original => source,
        ResizeSpec::MaxWidth(w) => fit_to_width(source, w),
    }
}
