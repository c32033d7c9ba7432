//! Persist-then-notify helpers shared by the scheduler, exporter and job
//! service. Events are published only when the store reports a change.

use clipchain_core::types::DbId;
use clipchain_db::models::clip::ClipJob;
use clipchain_db::models::status::{aggregate_status, JobStatus};
use clipchain_db::models::video::VideoJob;
use clipchain_db::{GenerationStore, StoreError};
use clipchain_events::{EventBus, StatusEvent};

/// Set a clip's status, persist it and publish the change.
pub async fn set_clip_status(
    store: &dyn GenerationStore,
    events: &EventBus,
    clip: &mut ClipJob,
    status: JobStatus,
) -> Result<(), StoreError> {
    clip.status = status;
    save_clip(store, events, clip).await
}

/// Persist a clip; publish its status when anything changed.
pub async fn save_clip(
    store: &dyn GenerationStore,
    events: &EventBus,
    clip: &ClipJob,
) -> Result<(), StoreError> {
    if store.save_clip(clip).await? {
        events.publish(StatusEvent::clip_status(clip.id, clip.video_id, clip.status));
    }
    Ok(())
}

/// Set a video's status directly (export states, in-flight mirroring).
pub async fn set_video_status(
    store: &dyn GenerationStore,
    events: &EventBus,
    video: &mut VideoJob,
    status: JobStatus,
) -> Result<(), StoreError> {
    video.status = status;
    if store.save_video(video).await? {
        events.publish(StatusEvent::video_status(video.id, status));
    }
    Ok(())
}

/// Recompute a video's aggregate status from its clips and persist it.
///
/// Returns the refreshed video, or `None` when it no longer exists.
pub async fn refresh_video_status(
    store: &dyn GenerationStore,
    events: &EventBus,
    video_id: DbId,
) -> Result<Option<VideoJob>, StoreError> {
    let Some(mut video) = store.get_video(video_id).await? else {
        return Ok(None);
    };
    let clips = store.list_clips(video_id).await?;
    let status = aggregate_status(clips.iter().map(|c| c.status));
    if status != video.status {
        tracing::debug!(video_id, from = %video.status, to = %status, "Video status aggregated");
    }
    set_video_status(store, events, &mut video, status).await?;
    Ok(Some(video))
}
