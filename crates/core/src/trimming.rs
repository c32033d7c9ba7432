//! Head/tail trim bookkeeping and validation.
//!
//! A clip is trimmed by dropping whole frames from its start and end. The
//! drop counts combine the clip's manual trim with whatever the adjoining
//! transitions consume.

use crate::error::CoreError;

/// Minimum number of frames that must remain after trimming.
pub const MIN_TRIMMED_FRAMES: u64 = 1;

/// Frames to drop from the start and end of a clip.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrimWindow {
    pub drop_first: u64,
    pub drop_last: u64,
}

impl TrimWindow {
    pub fn new(drop_first: u64, drop_last: u64) -> Self {
        Self {
            drop_first,
            drop_last,
        }
    }

    /// `true` when nothing is dropped; trimming then returns the input unchanged.
    pub fn is_noop(&self) -> bool {
        self.drop_first == 0 && self.drop_last == 0
    }

    /// Combine with additional drops from an adjoining transition.
    pub fn extend(self, head: u64, tail: u64) -> Self {
        Self {
            drop_first: self.drop_first + head,
            drop_last: self.drop_last + tail,
        }
    }

    /// Frames remaining out of `total_frames`, after validation.
    pub fn kept_frames(&self, total_frames: u64) -> Result<u64, CoreError> {
        validate_trim(self.drop_first, self.drop_last, total_frames)?;
        Ok(total_frames - self.drop_first - self.drop_last)
    }
}

/// Validate that dropping `drop_first + drop_last` frames leaves at least
/// [`MIN_TRIMMED_FRAMES`] of `total_frames`.
///
/// A trim that would remove the whole clip is rejected rather than silently
/// truncated.
pub fn validate_trim(drop_first: u64, drop_last: u64, total_frames: u64) -> Result<(), CoreError> {
    let dropped = drop_first.saturating_add(drop_last);
    if dropped >= total_frames || total_frames - dropped < MIN_TRIMMED_FRAMES {
        return Err(CoreError::Validation(format!(
            "Cannot drop {drop_first} leading and {drop_last} trailing frames from a \
             {total_frames}-frame clip"
        )));
    }
    Ok(())
}

/// Validate a playback-speed multiplier.
pub fn validate_speed(speed: f64) -> Result<(), CoreError> {
    if !speed.is_finite() || speed <= 0.0 {
        return Err(CoreError::Validation(format!(
            "Speed multiplier must be positive, got {speed}"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
