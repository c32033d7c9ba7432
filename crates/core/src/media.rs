//! The media toolkit seam.
//!
//! Transition planning, stitching and last-frame chaining all go through
//! [`VideoTools`]. [`crate::ffmpeg::FfmpegTools`] is the production
//! implementation; tests substitute in-process fakes.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::ffmpeg::FfmpegError;

/// Probed properties of a video file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub frame_count: u64,
    pub duration_secs: f64,
}

/// Parameters for rendering a cross-fade segment from two clips.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CrossfadeSpec {
    pub prev_start_secs: f64,
    pub next_start_secs: f64,
    pub duration_secs: f64,
    /// Output rate; both inputs are resampled to it.
    pub fps: f64,
    pub width: u32,
    pub height: u32,
}

/// Parameters for interpolating a still-frame sequence into a bridge clip.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BridgeSpec {
    /// Rate the reference frames are laid out at (`fps / step`).
    pub input_fps: f64,
    /// Rate the bridge is interpolated to.
    pub output_fps: f64,
    /// First interpolated frame to keep.
    pub keep_start: u64,
    /// Frames to keep from `keep_start`.
    pub keep_frames: u64,
    pub width: u32,
    pub height: u32,
}

/// Parameters for speed change plus frame-rate/size normalization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetimeSpec {
    pub speed: f64,
    pub source_fps: f64,
    pub target_fps: f64,
    pub width: u32,
    pub height: u32,
}

impl RetimeSpec {
    /// `true` when the retimed stream has fewer frames per second than the
    /// target, so frames must be synthesized rather than dropped.
    pub fn needs_interpolation(&self) -> bool {
        self.source_fps * self.speed + 1e-6 < self.target_fps
    }
}

/// Video operations used by the generation and stitching pipeline.
///
/// Every method writes to an explicit output path; callers own cleanup.
#[async_trait]
pub trait VideoTools: Send + Sync {
    /// Probe dimensions, frame rate, frame count and duration.
    async fn probe(&self, video: &Path) -> Result<VideoInfo, FfmpegError>;

    /// Write the final frame of `video` as an image.
    async fn extract_last_frame(&self, video: &Path, output: &Path) -> Result<(), FfmpegError>;

    /// Write the frames at `indices` as images in `output_dir`, named with
    /// `prefix`, returning the paths in the order of `indices`.
    async fn extract_frames(
        &self,
        video: &Path,
        indices: &[u64],
        output_dir: &Path,
        prefix: &str,
    ) -> Result<Vec<PathBuf>, FfmpegError>;

    /// Drop whole frames from the start and end of `video`.
    async fn trim(
        &self,
        video: &Path,
        drop_first: u64,
        drop_last: u64,
        output: &Path,
    ) -> Result<(), FfmpegError>;

    /// Render the overlap of `prev`'s tail and `next`'s head as one cross-fade.
    async fn crossfade(
        &self,
        prev: &Path,
        next: &Path,
        spec: &CrossfadeSpec,
        output: &Path,
    ) -> Result<(), FfmpegError>;

    /// Lay out still frames at a reduced rate and motion-interpolate them.
    async fn interpolate_frames(
        &self,
        frames: &[PathBuf],
        spec: &BridgeSpec,
        output: &Path,
    ) -> Result<(), FfmpegError>;

    /// Upscale and frame-interpolate a unit (quality pass).
    async fn enhance(&self, video: &Path, target_fps: f64, output: &Path)
        -> Result<(), FfmpegError>;

    /// Apply a speed multiplier and normalize frame rate and size.
    async fn retime(&self, video: &Path, spec: &RetimeSpec, output: &Path)
        -> Result<(), FfmpegError>;

    /// Concatenate uniformly encoded inputs in order.
    async fn concat(&self, inputs: &[PathBuf], output: &Path) -> Result<(), FfmpegError>;
}
