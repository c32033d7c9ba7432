//! Single-flight generation queue.
//!
//! Picks the oldest `Queued` clip (oldest video first, then lowest order
//! index), drives it through the [`ClipGenerator`], and chains each
//! finished clip's last frame into the next clip's start image. At most
//! one clip is in flight; cancellation is honored between clips only.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clipchain_core::dimensions::resolve_dimensions;
use clipchain_core::error::CoreError;
use clipchain_core::media::VideoTools;
use clipchain_core::naming::{ensure_video_work_dir, last_frame_path, video_work_dir};
use clipchain_db::models::clip::ClipJob;
use clipchain_db::models::status::JobStatus;
use clipchain_db::models::video::VideoJob;
use clipchain_db::{GenerationStore, StoreError};
use clipchain_events::EventBus;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::GenerateError;
use crate::generator::{start_image, ClipGenerator, GeneratedClip};
use crate::status::{refresh_video_status, save_clip, set_clip_status};

/// Default idle interval between queue checks in [`Scheduler::serve`].
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Outcome counts of one [`Scheduler::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub generated: usize,
    pub failed: usize,
    /// Stopped by cancellation rather than an empty queue.
    pub cancelled: bool,
}

impl RunSummary {
    pub fn processed(&self) -> usize {
        self.generated + self.failed
    }
}

pub struct Scheduler {
    store: Arc<dyn GenerationStore>,
    generator: Arc<dyn ClipGenerator>,
    tools: Arc<dyn VideoTools>,
    events: Arc<EventBus>,
    data_dir: PathBuf,
    poll_interval: Duration,
    /// Held for the duration of a run; a second concurrent run returns
    /// immediately.
    running: Mutex<()>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn GenerationStore>,
        generator: Arc<dyn ClipGenerator>,
        tools: Arc<dyn VideoTools>,
        events: Arc<EventBus>,
        data_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            generator,
            tools,
            events,
            data_dir: data_dir.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            running: Mutex::new(()),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Drain the queue until it is empty or `cancel` is triggered.
    ///
    /// Per-clip failures are recorded on the clip and never stop the loop;
    /// only store errors are returned.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<RunSummary, StoreError> {
        let Ok(_guard) = self.running.try_lock() else {
            tracing::debug!("Scheduler run already in progress");
            return Ok(RunSummary::default());
        };

        let mut summary = RunSummary::default();
        loop {
            if cancel.is_cancelled() {
                tracing::info!(processed = summary.processed(), "Scheduler run cancelled");
                summary.cancelled = true;
                break;
            }
            let Some(clip) = self.store.next_queued_clip().await? else {
                break;
            };
            match self.process(clip).await? {
                JobStatus::Generated => summary.generated += 1,
                _ => summary.failed += 1,
            }
        }
        Ok(summary)
    }

    /// Run until `cancel` is triggered, draining the queue on every tick.
    pub async fn serve(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        tracing::info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Generation scheduler started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Generation scheduler shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    match self.run(&cancel).await {
                        Ok(summary) if summary.processed() > 0 => {
                            tracing::info!(
                                generated = summary.generated,
                                failed = summary.failed,
                                "Queue drained",
                            );
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "Scheduler cycle failed"),
                    }
                }
            }
        }
    }

    /// Take one clip from `Queued` to a terminal status.
    async fn process(&self, mut clip: ClipJob) -> Result<JobStatus, StoreError> {
        let store = self.store.as_ref();
        let events = self.events.as_ref();

        tracing::info!(
            clip_id = clip.id,
            video_id = clip.video_id,
            order_index = clip.order_index,
            "Generating clip",
        );
        set_clip_status(store, events, &mut clip, JobStatus::Generating).await?;

        let Some(mut video) = store.get_video(clip.video_id).await? else {
            tracing::warn!(clip_id = clip.id, video_id = clip.video_id, "Clip has no video");
            set_clip_status(store, events, &mut clip, JobStatus::Failed).await?;
            return Ok(JobStatus::Failed);
        };
        // Aggregation reports Generating unless a sibling already failed.
        if let Some(refreshed) = refresh_video_status(store, events, video.id).await? {
            video = refreshed;
        }

        let outcome = self.generate(&mut video, &clip).await;
        let status = match outcome {
            Ok(Some(generated)) if generated.path.exists() => {
                self.complete(&video, &mut clip, generated).await?;
                JobStatus::Generated
            }
            Ok(Some(generated)) => {
                tracing::warn!(
                    clip_id = clip.id,
                    path = %generated.path.display(),
                    "Generated file is missing",
                );
                set_clip_status(store, events, &mut clip, JobStatus::Failed).await?;
                JobStatus::Failed
            }
            Ok(None) => {
                tracing::warn!(clip_id = clip.id, "Backend reported clip failure");
                set_clip_status(store, events, &mut clip, JobStatus::Failed).await?;
                JobStatus::Failed
            }
            Err(e) => {
                tracing::error!(clip_id = clip.id, error = %e, "Clip generation failed");
                set_clip_status(store, events, &mut clip, JobStatus::Failed).await?;
                JobStatus::Failed
            }
        };

        refresh_video_status(store, events, video.id).await?;
        Ok(status)
    }

    async fn generate(
        &self,
        video: &mut VideoJob,
        clip: &ClipJob,
    ) -> Result<Option<GeneratedClip>, GenerateError> {
        if start_image(video, clip).is_none() {
            return Err(GenerateError::MissingStartImage { clip_id: clip.id });
        }
        self.resolve_dimensions(video).await?;
        let work_dir = ensure_video_work_dir(&self.data_dir, video.id).await?;
        self.generator.generate(video, clip, &work_dir).await
    }

    /// Fill in zero width/height from the first clip's start image and
    /// persist them so later clips reuse the same size.
    async fn resolve_dimensions(&self, video: &mut VideoJob) -> Result<(), GenerateError> {
        if video.width > 0 && video.height > 0 {
            return Ok(());
        }
        let clips = self.store.list_clips(video.id).await?;
        let first = clips
            .iter()
            .find(|c| c.order_index == 0)
            .and_then(|c| start_image(video, c))
            .ok_or_else(|| {
                CoreError::Validation(format!(
                    "Video {} has no image to derive dimensions from",
                    video.id
                ))
            })?;

        let (width, height) = resolve_dimensions(video.width, video.height, &first)?;
        tracing::info!(video_id = video.id, width, height, "Resolved output dimensions");
        video.width = width;
        video.height = height;
        self.store.save_video(video).await?;
        Ok(())
    }

    async fn complete(
        &self,
        video: &VideoJob,
        clip: &mut ClipJob,
        generated: GeneratedClip,
    ) -> Result<(), StoreError> {
        clip.video_path = Some(generated.path.to_string_lossy().into_owned());
        clip.workflow_json = generated.workflow_json;
        set_clip_status(self.store.as_ref(), self.events.as_ref(), clip, JobStatus::Generated)
            .await?;
        tracing::info!(
            clip_id = clip.id,
            video_id = video.id,
            path = %generated.path.display(),
            "Clip generated",
        );

        let work_dir = video_work_dir(&self.data_dir, video.id);
        self.chain_next(clip, &generated.path, &work_dir).await
    }

    /// Give the next clip this clip's last frame when it has no start image.
    async fn chain_next(
        &self,
        clip: &ClipJob,
        output: &Path,
        work_dir: &Path,
    ) -> Result<(), StoreError> {
        let clips = self.store.list_clips(clip.video_id).await?;
        let Some(mut next) = clips
            .into_iter()
            .find(|c| c.order_index == clip.order_index + 1)
        else {
            return Ok(());
        };
        if next.has_start_image() {
            return Ok(());
        }

        let frame = last_frame_path(work_dir, clip.order_index);
        if let Err(e) = self.tools.extract_last_frame(output, &frame).await {
            tracing::warn!(
                clip_id = clip.id,
                next_clip_id = next.id,
                error = %e,
                "Last-frame extraction failed; next clip has no start image",
            );
            return Ok(());
        }

        next.start_image = Some(frame.to_string_lossy().into_owned());
        next.start_image_derived = true;
        tracing::debug!(
            clip_id = next.id,
            start_image = %frame.display(),
            "Chained start image from previous clip",
        );
        save_clip(self.store.as_ref(), self.events.as_ref(), &next).await
    }
}
