//! The record-store seam.
//!
//! The pipeline never talks to storage directly; it loads and saves video
//! and clip records through [`GenerationStore`]. Saves are diff-based: a
//! record identical to the stored one is not written and reports `false`.

use async_trait::async_trait;
use clipchain_core::types::DbId;

use crate::models::clip::{ClipJob, CreateClipJob};
use crate::models::video::{CreateVideoJob, VideoJob};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: DbId },

    #[error("Invalid operation: {0}")]
    Invalid(String),

    #[error("Snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[async_trait]
pub trait GenerationStore: Send + Sync {
    async fn create_video(&self, input: &CreateVideoJob) -> Result<VideoJob, StoreError>;

    async fn get_video(&self, id: DbId) -> Result<Option<VideoJob>, StoreError>;

    /// All videos, oldest first.
    async fn list_videos(&self) -> Result<Vec<VideoJob>, StoreError>;

    /// Persist `video` if it differs from the stored record.
    async fn save_video(&self, video: &VideoJob) -> Result<bool, StoreError>;

    /// Delete a video and every clip it owns. Returns `false` if absent.
    async fn delete_video(&self, id: DbId) -> Result<bool, StoreError>;

    /// Create a clip at `position` (shifting later clips back) or, when
    /// `None` or past the end, append it.
    async fn create_clip(
        &self,
        video_id: DbId,
        position: Option<u32>,
        input: &CreateClipJob,
    ) -> Result<ClipJob, StoreError>;

    async fn get_clip(&self, id: DbId) -> Result<Option<ClipJob>, StoreError>;

    /// Clips of a video in ascending order index.
    async fn list_clips(&self, video_id: DbId) -> Result<Vec<ClipJob>, StoreError>;

    /// Persist `clip` if it differs from the stored record.
    ///
    /// The order index is owned by the store and is not changed by a save.
    async fn save_clip(&self, clip: &ClipJob) -> Result<bool, StoreError>;

    /// Delete a clip and close the gap in its video's order indices.
    /// Returns the removed clip, or `None` if absent.
    async fn delete_clip(&self, id: DbId) -> Result<Option<ClipJob>, StoreError>;

    /// The next clip to generate: status `Queued`, ordered by the owning
    /// video's creation time, then by order index.
    async fn next_queued_clip(&self) -> Result<Option<ClipJob>, StoreError>;
}
