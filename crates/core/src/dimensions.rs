//! Output dimension resolution.
//!
//! A video job may leave its width and/or height at 0, meaning "derive from
//! the first clip's start image". Only the image header is read.

use std::path::Path;

use crate::error::CoreError;

/// Long side used when neither dimension is given.
pub const DEFAULT_LONG_SIDE: u32 = 832;

/// Both output dimensions are rounded to a multiple of this.
pub const DIMENSION_MULTIPLE: u32 = 16;

/// Maximum dimension (width or height) allowed.
const MAX_DIMENSION: u32 = 7680;

/// Validate that width and height are positive and within bounds.
pub fn validate_dimensions(width: u32, height: u32) -> Result<(), CoreError> {
    if width == 0 || height == 0 {
        return Err(CoreError::Validation(
            "Width and height must be greater than 0".to_string(),
        ));
    }
    if width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(CoreError::Validation(format!(
            "Dimensions must not exceed {MAX_DIMENSION}px (got {width}x{height})"
        )));
    }
    Ok(())
}

/// Round to the nearest multiple of [`DIMENSION_MULTIPLE`], never below it.
pub fn round_to_multiple(value: f64) -> u32 {
    let m = DIMENSION_MULTIPLE as f64;
    let rounded = (value / m).round() * m;
    (rounded as u32).max(DIMENSION_MULTIPLE)
}

/// Fit requested dimensions to a source aspect ratio.
///
/// - both requested: kept as given (rounded)
/// - one requested: the other follows the source aspect ratio
/// - none requested: the long side becomes [`DEFAULT_LONG_SIDE`]
pub fn fit_dimensions(
    requested_width: u32,
    requested_height: u32,
    source_width: u32,
    source_height: u32,
) -> Result<(u32, u32), CoreError> {
    if requested_width > 0 && requested_height > 0 {
        return Ok((
            round_to_multiple(requested_width as f64),
            round_to_multiple(requested_height as f64),
        ));
    }
    validate_dimensions(source_width, source_height)?;
    let aspect = source_width as f64 / source_height as f64;

    let (w, h) = match (requested_width, requested_height) {
        (0, 0) if source_width >= source_height => {
            let w = DEFAULT_LONG_SIDE as f64;
            (w, w / aspect)
        }
        (0, 0) => {
            let h = DEFAULT_LONG_SIDE as f64;
            (h * aspect, h)
        }
        (w, 0) => (w as f64, w as f64 / aspect),
        (0, h) => (h as f64 * aspect, h as f64),
        (w, h) => (w as f64, h as f64),
    };
    Ok((round_to_multiple(w), round_to_multiple(h)))
}

/// Resolve output dimensions, reading the source image header only when a
/// dimension is missing.
pub fn resolve_dimensions(
    requested_width: u32,
    requested_height: u32,
    source_image: &Path,
) -> Result<(u32, u32), CoreError> {
    if requested_width > 0 && requested_height > 0 {
        return fit_dimensions(requested_width, requested_height, 0, 0);
    }
    let (sw, sh) = image::image_dimensions(source_image).map_err(|e| {
        CoreError::Validation(format!(
            "Cannot read dimensions of {}: {e}",
            source_image.display()
        ))
    })?;
    fit_dimensions(requested_width, requested_height, sw, sh)
}
