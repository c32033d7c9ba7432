//! Transition planning between adjacent clips.
//!
//! For each pair the planner renders an optional bridge segment and reports
//! how many frames each neighbour cedes to it. Any shortfall in source
//! frames, or any media tool failure, degrades to "no segment" so a single
//! awkward pair never fails a whole stitch.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clipchain_core::frames::{plan_fade, plan_interpolation, plan_redirect, FrameSpan};
use clipchain_core::ffmpeg::FfmpegError;
use clipchain_core::media::{BridgeSpec, CrossfadeSpec, VideoInfo, VideoTools};
use clipchain_core::naming::clip_stem;
use clipchain_db::models::clip::TransitionKind;

use crate::stitcher::StitchClip;

/// A clip together with its probed media properties.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipMedia {
    pub clip: StitchClip,
    pub info: VideoInfo,
}

impl ClipMedia {
    pub fn new(clip: StitchClip, info: VideoInfo) -> Self {
        Self { clip, info }
    }

    /// Frame total with the manual trim applied.
    pub fn span(&self) -> FrameSpan {
        FrameSpan::new(self.info.frame_count, self.clip.drop_first, self.clip.drop_last)
    }

    fn stem(&self) -> String {
        clip_stem(self.clip.order_index)
    }
}

/// Result of planning one clip pair.
///
/// `fade_secs` is non-zero only for cross-fades; their overlap is trimmed by
/// duration rather than through the frame counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransitionInfo {
    pub segment: Option<PathBuf>,
    pub prev_frames_used: u64,
    pub next_frames_used: u64,
    pub fade_secs: f64,
}

impl TransitionInfo {
    pub fn none() -> Self {
        Self::default()
    }
}

pub struct TransitionPlanner {
    tools: Arc<dyn VideoTools>,
}

impl TransitionPlanner {
    pub fn new(tools: Arc<dyn VideoTools>) -> Self {
        Self { tools }
    }

    /// Plan the transition from `prev` into `next`, writing any segment and
    /// scratch frames under `work_dir`.
    pub async fn plan(&self, prev: &ClipMedia, next: &ClipMedia, work_dir: &Path) -> TransitionInfo {
        let kind = prev.clip.transition;
        let planned = match kind {
            TransitionKind::None => return TransitionInfo::none(),
            TransitionKind::Fade => self.fade(prev, next, work_dir).await,
            TransitionKind::Interpolate => self.interpolate(prev, next, work_dir).await,
            TransitionKind::Redirect => self.redirect(prev, next, work_dir).await,
        };

        match planned {
            Ok(Some(info)) => {
                tracing::debug!(
                    transition = %kind,
                    prev = prev.clip.order_index,
                    next = next.clip.order_index,
                    prev_frames_used = info.prev_frames_used,
                    next_frames_used = info.next_frames_used,
                    "Transition planned",
                );
                info
            }
            Ok(None) => {
                tracing::info!(
                    transition = %kind,
                    prev = prev.clip.order_index,
                    next = next.clip.order_index,
                    "Not enough frames for transition; joining without a segment",
                );
                TransitionInfo::none()
            }
            Err(e) => {
                tracing::warn!(
                    transition = %kind,
                    prev = prev.clip.order_index,
                    next = next.clip.order_index,
                    error = %e,
                    "Transition segment failed; joining without a segment",
                );
                TransitionInfo::none()
            }
        }
    }

    async fn fade(
        &self,
        prev: &ClipMedia,
        next: &ClipMedia,
        work_dir: &Path,
    ) -> Result<Option<TransitionInfo>, FfmpegError> {
        let Some(plan) = plan_fade(
            prev.span(),
            prev.info.fps,
            next.span(),
            next.info.fps,
            prev.clip.transition_secs,
        ) else {
            return Ok(None);
        };

        let output = work_dir.join(format!("{}_fade.mp4", prev.stem()));
        let spec = CrossfadeSpec {
            prev_start_secs: plan.prev_start_secs,
            next_start_secs: plan.next_start_secs,
            duration_secs: plan.duration_secs,
            fps: prev.info.fps,
            width: prev.info.width,
            height: prev.info.height,
        };
        self.tools
            .crossfade(&prev.clip.path, &next.clip.path, &spec, &output)
            .await?;

        Ok(Some(TransitionInfo {
            segment: Some(output),
            prev_frames_used: 0,
            next_frames_used: 0,
            fade_secs: plan.duration_secs,
        }))
    }

    async fn interpolate(
        &self,
        prev: &ClipMedia,
        next: &ClipMedia,
        work_dir: &Path,
    ) -> Result<Option<TransitionInfo>, FfmpegError> {
        let Some(plan) = plan_interpolation(prev.span(), next.span(), prev.clip.add_frames) else {
            return Ok(None);
        };

        let spec = BridgeSpec {
            input_fps: prev.info.fps / plan.step as f64,
            output_fps: prev.info.fps,
            keep_start: plan.keep_start,
            keep_frames: plan.keep_frames,
            width: prev.info.width,
            height: prev.info.height,
        };
        let segment = self
            .bridge(prev, next, &plan.prev_indices, &plan.next_indices, &spec, work_dir)
            .await?;

        Ok(Some(TransitionInfo {
            segment: Some(segment),
            prev_frames_used: plan.prev_frames_used(),
            next_frames_used: 0,
            fade_secs: 0.0,
        }))
    }

    async fn redirect(
        &self,
        prev: &ClipMedia,
        next: &ClipMedia,
        work_dir: &Path,
    ) -> Result<Option<TransitionInfo>, FfmpegError> {
        let Some(plan) = plan_redirect(prev.span(), next.span(), prev.clip.add_frames) else {
            return Ok(None);
        };

        let spec = BridgeSpec {
            input_fps: prev.info.fps / plan.step as f64,
            output_fps: prev.info.fps,
            keep_start: 0,
            keep_frames: plan.bridge_frames(),
            width: prev.info.width,
            height: prev.info.height,
        };
        let segment = self
            .bridge(prev, next, &plan.prev_indices, &plan.next_indices, &spec, work_dir)
            .await?;

        Ok(Some(TransitionInfo {
            segment: Some(segment),
            prev_frames_used: plan.prev_frames_used,
            next_frames_used: plan.next_frames_used,
            fade_secs: 0.0,
        }))
    }

    /// Extract reference frames from both clips and interpolate them into
    /// one bridge clip. The frame directory is removed afterwards.
    async fn bridge(
        &self,
        prev: &ClipMedia,
        next: &ClipMedia,
        prev_indices: &[u64],
        next_indices: &[u64],
        spec: &BridgeSpec,
        work_dir: &Path,
    ) -> Result<PathBuf, FfmpegError> {
        let frames_dir = work_dir.join(format!("{}_bridge_frames", prev.stem()));
        tokio::fs::create_dir_all(&frames_dir).await?;

        let result = async {
            let mut frames = self
                .tools
                .extract_frames(&prev.clip.path, prev_indices, &frames_dir, "prev")
                .await?;
            frames.extend(
                self.tools
                    .extract_frames(&next.clip.path, next_indices, &frames_dir, "next")
                    .await?,
            );

            let output = work_dir.join(format!("{}_bridge.mp4", prev.stem()));
            self.tools.interpolate_frames(&frames, spec, &output).await?;
            Ok::<_, FfmpegError>(output)
        }
        .await;

        if let Err(e) = tokio::fs::remove_dir_all(&frames_dir).await {
            tracing::debug!(dir = %frames_dir.display(), error = %e, "Frame cleanup failed");
        }
        result
    }
}
