//! In-process fakes for the media toolkit and the clip generator.
//!
//! `FakeTools` writes placeholder files and tracks a frame count and rate
//! per path, so probing any output reflects the operations that built it.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use clipchain_comfyui::{ComfyUIApiError, ExecutionError};
use clipchain_core::ffmpeg::FfmpegError;
use clipchain_core::frames::frame_count;
use clipchain_core::media::{BridgeSpec, CrossfadeSpec, RetimeSpec, VideoInfo, VideoTools};
use clipchain_core::types::DbId;
use clipchain_db::models::clip::{ClipJob, CreateClipJob};
use clipchain_db::models::status::JobStatus;
use clipchain_db::models::video::{CreateVideoJob, VideoJob};
use clipchain_db::{GenerationStore, MemoryStore};
use clipchain_pipeline::{ClipGenerator, GenerateError, GeneratedClip};
use tokio_util::sync::CancellationToken;

pub const WIDTH: u32 = 832;
pub const HEIGHT: u32 = 464;

// ---------------------------------------------------------------------------
// FakeTools
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeTools {
    media: Mutex<HashMap<PathBuf, VideoInfo>>,
    calls: Mutex<Vec<String>>,
    /// Paths whose frame extraction fails.
    pub broken: Mutex<HashSet<PathBuf>>,
    /// Held by a test to park every probe until released.
    pub gate: tokio::sync::Mutex<()>,
    last_concat: Mutex<Option<VideoInfo>>,
}

impl FakeTools {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a fake video file of `frames` frames at `fps`.
    pub async fn add_video(&self, path: &Path, frames: u64, fps: f64) {
        self.register(path, info(frames, fps, WIDTH, HEIGHT)).await;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, op: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(op)).count()
    }

    /// Properties of the most recent concat output; stitched files are
    /// renamed afterwards, so they are not found by path.
    pub fn last_concat(&self) -> Option<VideoInfo> {
        *self.last_concat.lock().unwrap()
    }

    pub fn info_of(&self, path: &Path) -> Option<VideoInfo> {
        self.media.lock().unwrap().get(path).copied()
    }

    async fn register(&self, path: &Path, info: VideoInfo) {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.unwrap();
        }
        tokio::fs::write(path, b"fake video").await.unwrap();
        self.media.lock().unwrap().insert(path.to_path_buf(), info);
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn lookup(&self, path: &Path) -> Result<VideoInfo, FfmpegError> {
        self.info_of(path)
            .ok_or_else(|| FfmpegError::VideoNotFound(path.display().to_string()))
    }
}

fn info(frames: u64, fps: f64, width: u32, height: u32) -> VideoInfo {
    VideoInfo {
        width,
        height,
        fps,
        frame_count: frames,
        duration_secs: frames as f64 / fps,
    }
}

#[async_trait]
impl VideoTools for FakeTools {
    async fn probe(&self, video: &Path) -> Result<VideoInfo, FfmpegError> {
        let _open = self.gate.lock().await;
        self.lookup(video)
    }

    async fn extract_last_frame(&self, video: &Path, output: &Path) -> Result<(), FfmpegError> {
        self.lookup(video)?;
        self.record(format!("last_frame {}", video.display()));
        tokio::fs::write(output, format!("last frame of {}", video.display())).await?;
        Ok(())
    }

    async fn extract_frames(
        &self,
        video: &Path,
        indices: &[u64],
        output_dir: &Path,
        prefix: &str,
    ) -> Result<Vec<PathBuf>, FfmpegError> {
        let source = self.lookup(video)?;
        if self.broken.lock().unwrap().contains(video) {
            return Err(FfmpegError::Invalid("broken source".into()));
        }
        self.record(format!("extract_frames {} {indices:?}", video.display()));
        let mut paths = Vec::new();
        for (n, index) in indices.iter().enumerate() {
            if *index >= source.frame_count {
                return Err(FfmpegError::Invalid(format!("frame {index} out of range")));
            }
            let path = output_dir.join(format!("{prefix}_{n:02}.png"));
            tokio::fs::write(&path, b"frame").await?;
            paths.push(path);
        }
        Ok(paths)
    }

    async fn trim(
        &self,
        video: &Path,
        drop_first: u64,
        drop_last: u64,
        output: &Path,
    ) -> Result<(), FfmpegError> {
        let source = self.lookup(video)?;
        if drop_first + drop_last >= source.frame_count {
            return Err(FfmpegError::Invalid("trim removes every frame".into()));
        }
        self.record(format!("trim {} {drop_first} {drop_last}", video.display()));
        let frames = source.frame_count - drop_first - drop_last;
        self.register(output, info(frames, source.fps, source.width, source.height))
            .await;
        Ok(())
    }

    async fn crossfade(
        &self,
        prev: &Path,
        next: &Path,
        spec: &CrossfadeSpec,
        output: &Path,
    ) -> Result<(), FfmpegError> {
        self.lookup(prev)?;
        self.lookup(next)?;
        self.record(format!("crossfade {} {}", prev.display(), next.display()));
        let frames = frame_count(spec.duration_secs, spec.fps);
        self.register(output, info(frames, spec.fps, spec.width, spec.height))
            .await;
        Ok(())
    }

    async fn interpolate_frames(
        &self,
        frames: &[PathBuf],
        spec: &BridgeSpec,
        output: &Path,
    ) -> Result<(), FfmpegError> {
        self.record(format!("interpolate {} frames keep {}", frames.len(), spec.keep_frames));
        self.register(
            output,
            info(spec.keep_frames, spec.output_fps, spec.width, spec.height),
        )
        .await;
        Ok(())
    }

    async fn enhance(
        &self,
        video: &Path,
        target_fps: f64,
        output: &Path,
    ) -> Result<(), FfmpegError> {
        let source = self.lookup(video)?;
        self.record(format!("enhance {} {target_fps}", video.display()));
        let frames = frame_count(source.duration_secs, target_fps);
        self.register(
            output,
            info(frames, target_fps, source.width * 2, source.height * 2),
        )
        .await;
        Ok(())
    }

    async fn retime(
        &self,
        video: &Path,
        spec: &RetimeSpec,
        output: &Path,
    ) -> Result<(), FfmpegError> {
        let source = self.lookup(video)?;
        self.record(format!("retime {} x{} -> {}", video.display(), spec.speed, spec.target_fps));
        let duration = source.frame_count as f64 / spec.source_fps / spec.speed;
        let frames = frame_count(duration, spec.target_fps);
        self.register(output, info(frames, spec.target_fps, spec.width, spec.height))
            .await;
        Ok(())
    }

    async fn concat(&self, inputs: &[PathBuf], output: &Path) -> Result<(), FfmpegError> {
        let mut parts = Vec::with_capacity(inputs.len());
        for input in inputs {
            parts.push(self.lookup(input)?);
        }
        self.record(format!("concat {}", inputs.len()));
        let first = parts
            .first()
            .copied()
            .ok_or_else(|| FfmpegError::Invalid("nothing to concat".into()))?;
        let frames = parts.iter().map(|p| p.frame_count).sum();
        let joined = info(frames, first.fps, first.width, first.height);
        self.register(output, joined).await;
        *self.last_concat.lock().unwrap() = Some(joined);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FakeGenerator
// ---------------------------------------------------------------------------

/// What the generator saw when a clip was handed to it.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub clip_id: DbId,
    pub order_index: u32,
    pub start_image: Option<String>,
    pub clip_status: JobStatus,
    pub video_status: JobStatus,
}

pub struct FakeGenerator {
    store: Arc<MemoryStore>,
    tools: Arc<FakeTools>,
    frames: u64,
    fps: f64,
    /// Prompts whose upload is rejected by the backend.
    pub reject_upload: Mutex<HashSet<String>>,
    /// Prompts the backend runs and reports as failed.
    pub backend_failure: Mutex<HashSet<String>>,
    pub observations: Mutex<Vec<Observation>>,
    /// Cancelled while the first clip is in flight.
    pub cancel_during_first: Mutex<Option<CancellationToken>>,
}

impl FakeGenerator {
    pub fn new(store: Arc<MemoryStore>, tools: Arc<FakeTools>, frames: u64, fps: f64) -> Arc<Self> {
        Arc::new(Self {
            store,
            tools,
            frames,
            fps,
            reject_upload: Mutex::new(HashSet::new()),
            backend_failure: Mutex::new(HashSet::new()),
            observations: Mutex::new(Vec::new()),
            cancel_during_first: Mutex::new(None),
        })
    }

    pub fn observations(&self) -> Vec<Observation> {
        self.observations.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClipGenerator for FakeGenerator {
    async fn generate(
        &self,
        video: &VideoJob,
        clip: &ClipJob,
        output_dir: &Path,
    ) -> Result<Option<GeneratedClip>, GenerateError> {
        let stored_clip = self.store.get_clip(clip.id).await.unwrap().unwrap();
        let stored_video = self.store.get_video(video.id).await.unwrap().unwrap();
        self.observations.lock().unwrap().push(Observation {
            clip_id: clip.id,
            order_index: clip.order_index,
            start_image: clip.start_image.clone(),
            clip_status: stored_clip.status,
            video_status: stored_video.status,
        });

        if let Some(token) = self.cancel_during_first.lock().unwrap().take() {
            token.cancel();
        }

        if self.reject_upload.lock().unwrap().contains(&clip.prompt) {
            return Err(ExecutionError::Api(ComfyUIApiError::ApiError {
                status: 400,
                body: "invalid image".into(),
            })
            .into());
        }
        if self.backend_failure.lock().unwrap().contains(&clip.prompt) {
            return Ok(None);
        }

        let path = output_dir.join(format!("clip_{:03}.mp4", clip.order_index));
        self.tools.add_video(&path, self.frames, self.fps).await;
        Ok(Some(GeneratedClip {
            path,
            workflow_json: Some(format!(
                r#"{{"3": {{"class_type": "KSampler", "inputs": {{"seed": {}, "steps": 20, "cfg": 6.0, "sampler_name": "euler"}}}}}}"#,
                clip.seed.unwrap_or(1)
            )),
        }))
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// A video with explicit dimensions and `prompts.len()` clips in `Queue`.
pub async fn video_with_clips(
    store: &MemoryStore,
    source_image: &Path,
    prompts: &[&str],
) -> (VideoJob, Vec<ClipJob>) {
    let video = store
        .create_video(&CreateVideoJob {
            source_image: source_image.to_string_lossy().into_owned(),
            width: WIDTH,
            height: HEIGHT,
        })
        .await
        .unwrap();
    let mut clips = Vec::new();
    for prompt in prompts {
        let input = CreateClipJob {
            prompt: prompt.to_string(),
            ..Default::default()
        };
        clips.push(store.create_clip(video.id, None, &input).await.unwrap());
    }
    (video, clips)
}
