//! Video and clip management.
//!
//! Every mutation goes through the store (which keeps order indices
//! dense), then recomputes the owning video's aggregate status and
//! publishes the resulting events.

use std::path::PathBuf;
use std::sync::Arc;

use clipchain_core::dimensions::validate_dimensions;
use clipchain_core::error::CoreError;
use clipchain_core::naming::ensure_video_work_dir;
use clipchain_core::trimming::validate_speed;
use clipchain_core::types::DbId;
use clipchain_db::models::clip::{ClipJob, CreateClipJob};
use clipchain_db::models::status::JobStatus;
use clipchain_db::models::video::{CreateVideoJob, VideoJob};
use clipchain_db::GenerationStore;
use clipchain_events::{EventBus, StatusEvent};

use crate::error::JobError;
use crate::status::{refresh_video_status, save_clip, set_clip_status};

pub struct JobService {
    store: Arc<dyn GenerationStore>,
    events: Arc<EventBus>,
    data_dir: PathBuf,
}

impl JobService {
    pub fn new(
        store: Arc<dyn GenerationStore>,
        events: Arc<EventBus>,
        data_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            events,
            data_dir: data_dir.into(),
        }
    }

    pub async fn create_video(&self, input: &CreateVideoJob) -> Result<VideoJob, JobError> {
        if input.width > 0 && input.height > 0 {
            validate_dimensions(input.width, input.height)?;
        }
        let video = self.store.create_video(input).await?;
        ensure_video_work_dir(&self.data_dir, video.id).await?;
        tracing::info!(video_id = video.id, "Video created");
        Ok(video)
    }

    /// Append a clip at the next order index.
    pub async fn add_clip(&self, video_id: DbId, input: &CreateClipJob) -> Result<ClipJob, JobError> {
        self.create_clip(video_id, None, input).await
    }

    /// Insert a clip at `order_index`, shifting later clips back by one.
    pub async fn insert_clip(
        &self,
        video_id: DbId,
        order_index: u32,
        input: &CreateClipJob,
    ) -> Result<ClipJob, JobError> {
        self.create_clip(video_id, Some(order_index), input).await
    }

    async fn create_clip(
        &self,
        video_id: DbId,
        position: Option<u32>,
        input: &CreateClipJob,
    ) -> Result<ClipJob, JobError> {
        validate_clip(input)?;
        self.require_video(video_id).await?;

        let clip = self.store.create_clip(video_id, position, input).await?;
        self.events
            .publish(StatusEvent::clip_status(clip.id, video_id, clip.status));
        refresh_video_status(self.store.as_ref(), self.events.as_ref(), video_id).await?;
        tracing::info!(
            clip_id = clip.id,
            video_id,
            order_index = clip.order_index,
            "Clip added",
        );
        Ok(clip)
    }

    /// Delete a clip. Deleting the last clip deletes the video too.
    pub async fn delete_clip(&self, clip_id: DbId) -> Result<ClipJob, JobError> {
        let removed = self
            .store
            .delete_clip(clip_id)
            .await?
            .ok_or(JobError::NotFound {
                entity: "clip",
                id: clip_id,
            })?;
        let video_id = removed.video_id;
        self.events
            .publish(StatusEvent::clip_deleted(removed.id, video_id));
        tracing::info!(clip_id, video_id, "Clip deleted");

        if self.store.list_clips(video_id).await?.is_empty() {
            self.store.delete_video(video_id).await?;
            self.events.publish(StatusEvent::video_deleted(video_id));
            tracing::info!(video_id, "Video deleted with its last clip");
        } else {
            refresh_video_status(self.store.as_ref(), self.events.as_ref(), video_id).await?;
        }
        Ok(removed)
    }

    /// Move every `Queue` clip of the video through `Queuing` to `Queued`.
    /// Returns the number of clips queued.
    pub async fn queue_video(&self, video_id: DbId) -> Result<usize, JobError> {
        self.require_video(video_id).await?;

        let mut queued = 0;
        for mut clip in self.store.list_clips(video_id).await? {
            if clip.status != JobStatus::Queue {
                continue;
            }
            self.advance(&mut clip, JobStatus::Queuing).await?;
            self.advance(&mut clip, JobStatus::Queued).await?;
            queued += 1;
        }

        refresh_video_status(self.store.as_ref(), self.events.as_ref(), video_id).await?;
        tracing::info!(video_id, queued, "Video queued");
        Ok(queued)
    }

    /// Send a finished or failed clip back to the queue.
    ///
    /// With `cascade`, every following clip whose start image was chained
    /// from its predecessor loses that image and is requeued as well, up to
    /// the first clip with an image of its own. Returns the requeued ids.
    pub async fn requeue_clip(&self, clip_id: DbId, cascade: bool) -> Result<Vec<DbId>, JobError> {
        let clip = self
            .store
            .get_clip(clip_id)
            .await?
            .ok_or(JobError::NotFound {
                entity: "clip",
                id: clip_id,
            })?;
        if !clip.status.is_terminal() {
            return Err(JobError::InvalidTransition {
                clip_id,
                from: clip.status,
                to: JobStatus::Queuing,
            });
        }
        let video_id = clip.video_id;
        let order_index = clip.order_index;

        let mut requeued = vec![clip.id];
        self.requeue(clip).await?;

        if cascade {
            let downstream = self
                .store
                .list_clips(video_id)
                .await?
                .into_iter()
                .filter(|c| c.order_index > order_index);
            for mut next in downstream {
                if !next.start_image_derived {
                    break;
                }
                next.start_image = None;
                next.start_image_derived = false;
                if next.status.is_terminal() {
                    requeued.push(next.id);
                    self.requeue(next).await?;
                } else {
                    save_clip(self.store.as_ref(), self.events.as_ref(), &next).await?;
                }
            }
        }

        refresh_video_status(self.store.as_ref(), self.events.as_ref(), video_id).await?;
        tracing::info!(video_id, clip_id, requeued = requeued.len(), "Clips requeued");
        Ok(requeued)
    }

    async fn requeue(&self, mut clip: ClipJob) -> Result<(), JobError> {
        clip.video_path = None;
        clip.workflow_json = None;
        self.advance(&mut clip, JobStatus::Queuing).await?;
        self.advance(&mut clip, JobStatus::Queued).await
    }

    /// Apply one state-machine step.
    async fn advance(&self, clip: &mut ClipJob, to: JobStatus) -> Result<(), JobError> {
        if !clip.status.can_transition_to(to) {
            return Err(JobError::InvalidTransition {
                clip_id: clip.id,
                from: clip.status,
                to,
            });
        }
        set_clip_status(self.store.as_ref(), self.events.as_ref(), clip, to).await?;
        Ok(())
    }

    async fn require_video(&self, video_id: DbId) -> Result<VideoJob, JobError> {
        self.store
            .get_video(video_id)
            .await?
            .ok_or(JobError::NotFound {
                entity: "video",
                id: video_id,
            })
    }
}

fn validate_clip(input: &CreateClipJob) -> Result<(), CoreError> {
    validate_speed(input.speed)?;
    if !input.transition_secs.is_finite() || input.transition_secs < 0.0 {
        return Err(CoreError::Validation(format!(
            "Transition duration must be non-negative, got {}",
            input.transition_secs
        )));
    }
    Ok(())
}
