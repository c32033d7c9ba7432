//! Video job record and DTOs.

use clipchain_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};

use crate::models::status::JobStatus;

/// One exported video: an ordered set of clips sharing a source image and
/// output size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoJob {
    pub id: DbId,
    pub source_image: String,
    /// 0 = derive from the first clip's start image.
    pub width: u32,
    /// 0 = derive from the first clip's start image.
    pub height: u32,
    pub status: JobStatus,
    /// Last exported file, if any.
    pub output_path: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for creating a video job.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateVideoJob {
    pub source_image: String,
    pub width: u32,
    pub height: u32,
}
