//! Frame arithmetic for trimming, transition sampling and frame-rate
//! normalization.
//!
//! Everything here is pure. The transition planner and the stitcher turn
//! these plans into ffmpeg work through [`crate::media::VideoTools`].

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Reference frames taken from each side of an interpolated bridge.
pub const INTERPOLATION_REFERENCE_FRAMES: u64 = 3;

/// Upper bound on samples taken from each side of a redirect bridge.
pub const MAX_REDIRECT_SAMPLES: usize = 5;

/// A redirect bridge needs at least this many samples per side.
pub const MIN_REDIRECT_SAMPLES: usize = 2;

/// Frame rates below this are tripled by the quality pass.
pub const TRIPLE_RATE_BELOW_FPS: f64 = 15.0;

/// Frame rates below this (and at least [`TRIPLE_RATE_BELOW_FPS`]) are doubled.
pub const DOUBLE_RATE_BELOW_FPS: f64 = 30.0;

// ---------------------------------------------------------------------------
// Basic conversions
// ---------------------------------------------------------------------------

/// Number of frames covering `duration_secs` at `fps`, i.e.
/// `round(duration * fps)`. Non-positive inputs yield zero.
pub fn frame_count(duration_secs: f64, fps: f64) -> u64 {
    if duration_secs <= 0.0 || fps <= 0.0 || !duration_secs.is_finite() || !fps.is_finite() {
        return 0;
    }
    (duration_secs * fps).round() as u64
}

/// Quality-driven output rate for a source rate: x3 below 15 fps, x2 below
/// 30 fps, unchanged otherwise.
pub fn quality_frame_rate(fps: f64) -> f64 {
    if fps < TRIPLE_RATE_BELOW_FPS {
        fps * 3.0
    } else if fps < DOUBLE_RATE_BELOW_FPS {
        fps * 2.0
    } else {
        fps
    }
}

/// Pick the one frame rate every stitched unit is normalized to.
///
/// `units` holds `(source_fps, speed)` pairs. Each unit proposes the larger
/// of its source rate and the quality multiple of its slowed-down rate
/// (speed-ups never raise the proposal); the maximum proposal wins.
pub fn uniform_frame_rate(units: &[(f64, f64)]) -> f64 {
    units
        .iter()
        .filter(|(fps, _)| *fps > 0.0)
        .map(|&(fps, speed)| {
            let speed = if speed > 0.0 { speed.min(1.0) } else { 1.0 };
            fps.max(quality_frame_rate(fps * speed))
        })
        .fold(0.0, f64::max)
}

// ---------------------------------------------------------------------------
// Frame spans
// ---------------------------------------------------------------------------

/// A clip's frame total together with the frames manually dropped at each end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSpan {
    pub total: u64,
    pub drop_first: u64,
    pub drop_last: u64,
}

impl FrameSpan {
    pub fn new(total: u64, drop_first: u64, drop_last: u64) -> Self {
        Self {
            total,
            drop_first,
            drop_last,
        }
    }

    /// Frames left once the manual drops are applied.
    pub fn available(&self) -> u64 {
        self.total
            .saturating_sub(self.drop_first.saturating_add(self.drop_last))
    }

    /// Index of the last kept frame, if any frame is kept.
    pub fn last_kept(&self) -> Option<u64> {
        (self.available() > 0).then(|| self.total - self.drop_last - 1)
    }
}

// ---------------------------------------------------------------------------
// Interpolated bridge
// ---------------------------------------------------------------------------

/// Sampling plan for an `Interpolate` transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterpolationPlan {
    /// Reference frame indices in the previous clip, in playback order.
    pub prev_indices: Vec<u64>,
    /// Reference frame indices in the next clip, in playback order.
    pub next_indices: Vec<u64>,
    /// Output frames per reference gap (`add_frames + 1`).
    pub step: u64,
    /// First bridge frame to keep after interpolation.
    pub keep_start: u64,
    /// Number of bridge frames to keep.
    pub keep_frames: u64,
}

impl InterpolationPlan {
    /// Frames the previous clip cedes to the bridge.
    pub fn prev_frames_used(&self) -> u64 {
        self.keep_frames
    }
}

/// Plan an interpolated bridge of exactly `add_frames` frames.
///
/// Requires `3 * (add_frames + 1)` available frames on both sides. The
/// previous clip's last `add_frames` kept frames are replaced: its reference
/// frames end at the frame that becomes its new last frame, and the bridge
/// keeps only the synthesized frames between that frame and the next clip's
/// first kept frame.
pub fn plan_interpolation(
    prev: FrameSpan,
    next: FrameSpan,
    add_frames: u64,
) -> Option<InterpolationPlan> {
    if add_frames == 0 {
        return None;
    }
    let step = add_frames + 1;
    let required = INTERPOLATION_REFERENCE_FRAMES * step;
    if prev.available() < required || next.available() < required {
        return None;
    }

    let prev_anchor = prev.last_kept()? - add_frames;
    let prev_indices = (0..INTERPOLATION_REFERENCE_FRAMES)
        .rev()
        .map(|k| prev_anchor - k * step)
        .collect();
    let next_indices = (0..INTERPOLATION_REFERENCE_FRAMES)
        .map(|k| next.drop_first + k * step)
        .collect();

    Some(InterpolationPlan {
        prev_indices,
        next_indices,
        step,
        keep_start: (INTERPOLATION_REFERENCE_FRAMES - 1) * step + 1,
        keep_frames: add_frames,
    })
}

// ---------------------------------------------------------------------------
// Redirect bridge
// ---------------------------------------------------------------------------

/// Sampling plan for a `Redirect` transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectPlan {
    pub prev_indices: Vec<u64>,
    pub next_indices: Vec<u64>,
    pub step: u64,
    pub prev_frames_used: u64,
    pub next_frames_used: u64,
}

impl RedirectPlan {
    /// Length of the interpolated bridge in frames.
    pub fn bridge_frames(&self) -> u64 {
        let samples = (self.prev_indices.len() + self.next_indices.len()) as u64;
        samples.saturating_sub(1) * self.step + 1
    }
}

/// Offsets from a clip boundary at doubling gaps: 0, 1, 3, 7, 15, ...
///
/// At least one frame always remains beyond the furthest offset.
pub fn redirect_offsets(available: u64) -> Vec<u64> {
    let mut offsets = Vec::with_capacity(MAX_REDIRECT_SAMPLES);
    let mut offset = 0u64;
    let mut gap = 1u64;
    while offsets.len() < MAX_REDIRECT_SAMPLES && offset + 1 < available {
        offsets.push(offset);
        offset += gap;
        gap *= 2;
    }
    offsets
}

/// Plan a redirect bridge sampling both clips at increasing gaps away from
/// the cut. Each side cedes every frame from the boundary up to and
/// including its furthest sample.
pub fn plan_redirect(prev: FrameSpan, next: FrameSpan, add_frames: u64) -> Option<RedirectPlan> {
    let prev_offsets = redirect_offsets(prev.available());
    let next_offsets = redirect_offsets(next.available());
    if prev_offsets.len() < MIN_REDIRECT_SAMPLES || next_offsets.len() < MIN_REDIRECT_SAMPLES {
        return None;
    }

    let prev_end = prev.last_kept()?;
    let prev_indices = prev_offsets.iter().rev().map(|o| prev_end - o).collect();
    let next_indices = next_offsets.iter().map(|o| next.drop_first + o).collect();

    Some(RedirectPlan {
        prev_indices,
        next_indices,
        step: add_frames + 1,
        prev_frames_used: prev_offsets.last().copied().unwrap_or(0) + 1,
        next_frames_used: next_offsets.last().copied().unwrap_or(0) + 1,
    })
}

// ---------------------------------------------------------------------------
// Cross-fade
// ---------------------------------------------------------------------------

/// Time windows for a `Fade` transition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FadePlan {
    /// Where the faded-out tail starts in the previous clip (seconds).
    pub prev_start_secs: f64,
    /// Where the faded-in head starts in the next clip (seconds).
    pub next_start_secs: f64,
    pub duration_secs: f64,
}

/// Plan a cross-fade of `duration_secs`. Both clips must keep more frames
/// than the fade overlaps, otherwise no fade is produced.
pub fn plan_fade(
    prev: FrameSpan,
    prev_fps: f64,
    next: FrameSpan,
    next_fps: f64,
    duration_secs: f64,
) -> Option<FadePlan> {
    let prev_frames = frame_count(duration_secs, prev_fps);
    let next_frames = frame_count(duration_secs, next_fps);
    if prev_frames == 0 || next_frames == 0 {
        return None;
    }
    if prev.available() <= prev_frames || next.available() <= next_frames {
        return None;
    }

    let prev_end = prev.total - prev.drop_last;
    Some(FadePlan {
        prev_start_secs: (prev_end - prev_frames) as f64 / prev_fps,
        next_start_secs: next.drop_first as f64 / next_fps,
        duration_secs,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // -- conversions ---------------------------------------------------------

    #[test]
    fn frame_count_rounds() {
        assert_eq!(frame_count(5.0, 16.0), 80);
        assert_eq!(frame_count(0.5, 25.0), 13);
        assert_eq!(frame_count(1.0, 23.976), 24);
    }

    #[test]
    fn frame_count_rejects_non_positive() {
        assert_eq!(frame_count(0.0, 30.0), 0);
        assert_eq!(frame_count(2.0, 0.0), 0);
        assert_eq!(frame_count(-1.0, 30.0), 0);
    }

    #[test]
    fn quality_rate_multiples() {
        assert_eq!(quality_frame_rate(12.0), 36.0);
        assert_eq!(quality_frame_rate(16.0), 32.0);
        assert_eq!(quality_frame_rate(30.0), 30.0);
        assert_eq!(quality_frame_rate(60.0), 60.0);
    }

    #[test]
    fn uniform_rate_takes_highest_proposal() {
        assert_eq!(uniform_frame_rate(&[(16.0, 1.0), (30.0, 1.0)]), 32.0);
        assert_eq!(uniform_frame_rate(&[(30.0, 1.0), (30.0, 1.0)]), 30.0);
    }

    #[test]
    fn uniform_rate_slowdown_uses_effective_rate() {
        // 30 fps at half speed is effectively 15 fps -> doubled to 30.
        assert_eq!(uniform_frame_rate(&[(30.0, 0.5)]), 30.0);
        // 24 fps at half speed is 12 fps -> tripled to 36.
        assert_eq!(uniform_frame_rate(&[(24.0, 0.5)]), 36.0);
    }

    #[test]
    fn uniform_rate_speedup_keeps_source_rate() {
        assert_eq!(uniform_frame_rate(&[(30.0, 2.0)]), 30.0);
    }

    #[test]
    fn uniform_rate_empty_is_zero() {
        assert_eq!(uniform_frame_rate(&[]), 0.0);
    }

    // -- spans ---------------------------------------------------------------

    #[test]
    fn span_available_and_last_kept() {
        let span = FrameSpan::new(81, 2, 3);
        assert_eq!(span.available(), 76);
        assert_eq!(span.last_kept(), Some(77));
        assert_eq!(FrameSpan::new(4, 2, 2).last_kept(), None);
    }

    // -- interpolation -------------------------------------------------------

    #[test]
    fn interpolation_plan_indices() {
        let plan = plan_interpolation(FrameSpan::new(81, 0, 0), FrameSpan::new(81, 0, 0), 4)
            .expect("enough frames");
        assert_eq!(plan.step, 5);
        // New last frame of prev is 80 - 4 = 76.
        assert_eq!(plan.prev_indices, vec![66, 71, 76]);
        assert_eq!(plan.next_indices, vec![0, 5, 10]);
        assert_eq!(plan.keep_start, 11);
        assert_eq!(plan.keep_frames, 4);
        assert_eq!(plan.prev_frames_used(), 4);
    }

    #[test]
    fn interpolation_respects_manual_drops() {
        let plan = plan_interpolation(FrameSpan::new(81, 0, 10), FrameSpan::new(81, 7, 0), 2)
            .expect("enough frames");
        assert_eq!(plan.prev_indices, vec![62, 65, 68]);
        assert_eq!(plan.next_indices, vec![7, 10, 13]);
    }

    #[test]
    fn interpolation_needs_three_steps_on_both_sides() {
        // add_frames = 4 -> 15 frames required.
        assert!(plan_interpolation(FrameSpan::new(15, 0, 0), FrameSpan::new(15, 0, 0), 4).is_some());
        assert!(plan_interpolation(FrameSpan::new(14, 0, 0), FrameSpan::new(81, 0, 0), 4).is_none());
        assert!(plan_interpolation(FrameSpan::new(81, 0, 0), FrameSpan::new(20, 6, 0), 4).is_none());
    }

    #[test]
    fn interpolation_at_minimum_keeps_indices_in_range() {
        let plan = plan_interpolation(FrameSpan::new(15, 0, 0), FrameSpan::new(15, 0, 0), 4)
            .expect("exactly enough frames");
        assert_eq!(plan.prev_indices, vec![0, 5, 10]);
        assert_eq!(plan.next_indices, vec![0, 5, 10]);
    }

    #[test]
    fn interpolation_without_added_frames_is_none() {
        assert!(plan_interpolation(FrameSpan::new(81, 0, 0), FrameSpan::new(81, 0, 0), 0).is_none());
    }

    // -- redirect ------------------------------------------------------------

    #[test]
    fn redirect_offsets_double() {
        assert_eq!(redirect_offsets(100), vec![0, 1, 3, 7, 15]);
        assert_eq!(redirect_offsets(8), vec![0, 1, 3]);
        assert_eq!(redirect_offsets(1), Vec::<u64>::new());
    }

    #[test]
    fn redirect_plan_counts_from_sampled_indices() {
        let plan = plan_redirect(FrameSpan::new(81, 0, 0), FrameSpan::new(10, 0, 0), 1)
            .expect("enough frames");
        assert_eq!(plan.prev_indices, vec![65, 73, 77, 79, 80]);
        assert_eq!(plan.next_indices, vec![0, 1, 3, 7]);
        assert_eq!(plan.prev_frames_used, 16);
        assert_eq!(plan.next_frames_used, 8);
        // 9 samples, 8 gaps of 2 frames, plus the closing sample.
        assert_eq!(plan.bridge_frames(), 17);
    }

    #[test]
    fn redirect_needs_two_samples_per_side() {
        assert!(plan_redirect(FrameSpan::new(2, 0, 0), FrameSpan::new(81, 0, 0), 2).is_none());
        assert!(plan_redirect(FrameSpan::new(3, 0, 0), FrameSpan::new(3, 0, 0), 2).is_some());
    }

    // -- fade ----------------------------------------------------------------

    #[test]
    fn fade_plan_windows() {
        let plan = plan_fade(FrameSpan::new(80, 0, 8), 16.0, FrameSpan::new(80, 4, 0), 16.0, 1.0)
            .expect("fade fits");
        assert!((plan.prev_start_secs - 56.0 / 16.0).abs() < 1e-9);
        assert!((plan.next_start_secs - 0.25).abs() < 1e-9);
        assert_eq!(plan.duration_secs, 1.0);
    }

    #[test]
    fn fade_longer_than_clip_is_none() {
        assert!(plan_fade(FrameSpan::new(16, 0, 0), 16.0, FrameSpan::new(80, 0, 0), 16.0, 1.0).is_none());
        assert!(plan_fade(FrameSpan::new(80, 0, 0), 16.0, FrameSpan::new(80, 0, 0), 16.0, 0.0).is_none());
    }
}
