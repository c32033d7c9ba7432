//! Composition of generated clips into one video.
//!
//! Steps, in order:
//! 1. plan one transition per adjacent pair (plus last to first when
//!    wrapping);
//! 2. trim each clip by its manual drops plus the frames its neighbouring
//!    transitions consume;
//! 3. join each trimmed clip with its outgoing segment into a unit;
//! 4. optionally enhance every unit (upscale + frame interpolation);
//! 5. retime every unit to its speed and one shared frame rate;
//! 6. concatenate the units.
//!
//! All intermediates live in a scratch directory next to the output and
//! are removed whatever the outcome.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clipchain_core::ffmpeg::ENHANCE_SCALE;
use clipchain_core::frames::{frame_count, quality_frame_rate, uniform_frame_rate};
use clipchain_core::media::{RetimeSpec, VideoTools};
use clipchain_core::naming::clip_stem;
use clipchain_core::trimming::{validate_speed, TrimWindow};
use clipchain_db::models::clip::{ClipJob, TransitionKind};

use crate::error::StitchError;
use crate::transitions::{ClipMedia, TransitionInfo, TransitionPlanner};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StitchOptions {
    pub high_quality: bool,
    /// Also plan a transition from the last clip back to the first.
    pub wrap_around: bool,
}

/// One generated clip as the stitcher sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct StitchClip {
    pub path: PathBuf,
    pub order_index: u32,
    pub drop_first: u64,
    pub drop_last: u64,
    /// Transition into the following clip.
    pub transition: TransitionKind,
    pub transition_secs: f64,
    pub add_frames: u64,
    pub speed: f64,
}

impl StitchClip {
    pub fn from_job(clip: &ClipJob) -> Result<Self, StitchError> {
        let path = clip
            .video_path
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or(StitchError::MissingVideo {
                order_index: clip.order_index,
            })?;
        validate_speed(clip.speed).map_err(|source| StitchError::InvalidSpeed {
            order_index: clip.order_index,
            source,
        })?;
        Ok(Self {
            path: PathBuf::from(path),
            order_index: clip.order_index,
            drop_first: u64::from(clip.drop_first),
            drop_last: u64::from(clip.drop_last),
            transition: clip.transition,
            transition_secs: clip.transition_secs,
            add_frames: u64::from(clip.add_frames),
            speed: clip.speed,
        })
    }
}

/// A working unit: one trimmed clip plus its outgoing segment.
struct Unit {
    path: PathBuf,
    fps: f64,
    speed: f64,
    stem: String,
}

pub struct VideoStitcher {
    tools: Arc<dyn VideoTools>,
    planner: TransitionPlanner,
}

impl VideoStitcher {
    pub fn new(tools: Arc<dyn VideoTools>) -> Self {
        Self {
            planner: TransitionPlanner::new(Arc::clone(&tools)),
            tools,
        }
    }

    /// Stitch `clips` (in playback order) into `output`.
    ///
    /// Returns `None` on any failure; the cause is logged and `output` is
    /// left untouched.
    pub async fn stitch(
        &self,
        clips: &[StitchClip],
        output: &Path,
        options: StitchOptions,
    ) -> Option<PathBuf> {
        let scratch = scratch_dir(output);
        let result = self.try_stitch(clips, output, &scratch, options).await;

        if let Err(e) = tokio::fs::remove_dir_all(&scratch).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(dir = %scratch.display(), error = %e, "Scratch cleanup failed");
            }
        }

        match result {
            Ok(path) => {
                tracing::info!(
                    output = %path.display(),
                    clips = clips.len(),
                    high_quality = options.high_quality,
                    "Video stitched",
                );
                Some(path)
            }
            Err(e) => {
                tracing::error!(output = %output.display(), error = %e, "Stitch failed");
                None
            }
        }
    }

    async fn try_stitch(
        &self,
        clips: &[StitchClip],
        output: &Path,
        scratch: &Path,
        options: StitchOptions,
    ) -> Result<PathBuf, StitchError> {
        if clips.is_empty() {
            return Err(StitchError::NoClips);
        }
        tokio::fs::create_dir_all(scratch).await?;

        let mut media = Vec::with_capacity(clips.len());
        for clip in clips {
            let info = self.tools.probe(&clip.path).await?;
            media.push(ClipMedia::new(clip.clone(), info));
        }

        // Outgoing transition per clip.
        let mut outgoing = vec![TransitionInfo::none(); media.len()];
        for (i, j) in transition_pairs(media.len(), options.wrap_around) {
            outgoing[i] = self.planner.plan(&media[i], &media[j], scratch).await;
        }

        let mut units = Vec::with_capacity(media.len());
        for (i, clip) in media.iter().enumerate() {
            let incoming = predecessor(i, media.len(), options.wrap_around).map(|p| &outgoing[p]);
            let window = trim_window(clip, incoming, &outgoing[i]);
            window
                .kept_frames(clip.info.frame_count)
                .map_err(|source| StitchError::Trim {
                    order_index: clip.clip.order_index,
                    source,
                })?;

            let stem = clip_stem(clip.clip.order_index);
            let trimmed = self
                .trim(&clip.clip.path, window, &scratch.join(format!("{stem}_trim.mp4")))
                .await?;

            let path = match &outgoing[i].segment {
                Some(segment) => {
                    let joined = scratch.join(format!("{stem}_unit.mp4"));
                    self.tools
                        .concat(&[trimmed, segment.clone()], &joined)
                        .await?;
                    joined
                }
                None => trimmed,
            };
            units.push(Unit {
                path,
                fps: clip.info.fps,
                speed: clip.clip.speed,
                stem,
            });
        }

        let scale = if options.high_quality { ENHANCE_SCALE } else { 1 };
        if options.high_quality {
            for unit in &mut units {
                let target = quality_frame_rate(unit.fps);
                let enhanced = scratch.join(format!("{}_hq.mp4", unit.stem));
                self.tools.enhance(&unit.path, target, &enhanced).await?;
                unit.path = enhanced;
                unit.fps = target;
            }
        }

        let rates: Vec<(f64, f64)> = units.iter().map(|u| (u.fps, u.speed)).collect();
        let target_fps = uniform_frame_rate(&rates);
        let (width, height) = (media[0].info.width * scale, media[0].info.height * scale);
        tracing::debug!(target_fps, width, height, units = units.len(), "Normalizing units");

        let mut retimed = Vec::with_capacity(units.len());
        for unit in &units {
            let out = scratch.join(format!("{}_retimed.mp4", unit.stem));
            let spec = RetimeSpec {
                speed: unit.speed,
                source_fps: unit.fps,
                target_fps,
                width,
                height,
            };
            self.tools.retime(&unit.path, &spec, &out).await?;
            retimed.push(out);
        }

        let stitched = scratch.join("stitched.mp4");
        self.tools.concat(&retimed, &stitched).await?;

        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(&stitched, output).await?;
        Ok(output.to_path_buf())
    }

    /// Drop frames from both ends of `video`.
    ///
    /// A no-op window returns `video` itself without touching the file.
    pub async fn trim(
        &self,
        video: &Path,
        window: TrimWindow,
        output: &Path,
    ) -> Result<PathBuf, StitchError> {
        if window.is_noop() {
            return Ok(video.to_path_buf());
        }
        self.tools
            .trim(video, window.drop_first, window.drop_last, output)
            .await?;
        Ok(output.to_path_buf())
    }
}

/// Clip index pairs that get a transition.
fn transition_pairs(count: usize, wrap_around: bool) -> Vec<(usize, usize)> {
    let mut pairs: Vec<(usize, usize)> = (1..count).map(|i| (i - 1, i)).collect();
    if wrap_around && count > 1 {
        pairs.push((count - 1, 0));
    }
    pairs
}

/// Index of the clip whose outgoing transition leads into clip `i`.
fn predecessor(i: usize, count: usize, wrap_around: bool) -> Option<usize> {
    match i {
        0 if wrap_around && count > 1 => Some(count - 1),
        0 => None,
        i => Some(i - 1),
    }
}

/// Manual drops plus the frames ceded to the incoming and outgoing
/// transitions. Fades are converted from their duration at the clip's rate.
fn trim_window(
    clip: &ClipMedia,
    incoming: Option<&TransitionInfo>,
    outgoing: &TransitionInfo,
) -> TrimWindow {
    let fps = clip.info.fps;
    let head = incoming
        .map(|t| t.next_frames_used + frame_count(t.fade_secs, fps))
        .unwrap_or(0);
    let tail = outgoing.prev_frames_used + frame_count(outgoing.fade_secs, fps);
    TrimWindow::new(clip.clip.drop_first, clip.clip.drop_last).extend(head, tail)
}

/// `{dir}/.{stem}_parts_{uuid}` beside the output file.
fn scratch_dir(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "stitch".to_string());
    let name = format!(".{stem}_parts_{}", uuid::Uuid::new_v4().simple());
    match output.parent() {
        Some(parent) => parent.join(name),
        None => PathBuf::from(name),
    }
}
