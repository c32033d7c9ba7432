use clipchain_comfyui::{ExecutionError, TemplateError};
use clipchain_core::error::CoreError;
use clipchain_core::ffmpeg::FfmpegError;
use clipchain_core::types::DbId;
use clipchain_db::models::status::JobStatus;
use clipchain_db::StoreError;

/// Failure to generate one clip. Always local to that clip.
#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    #[error("Clip {clip_id} has no start image and its video has no source image")]
    MissingStartImage { clip_id: DbId },

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of one stitch attempt.
#[derive(Debug, thiserror::Error)]
pub enum StitchError {
    #[error("Nothing to stitch")]
    NoClips,

    #[error("Clip {order_index} has no generated video")]
    MissingVideo { order_index: u32 },

    #[error("Clip {order_index} has an invalid speed: {source}")]
    InvalidSpeed {
        order_index: u32,
        source: CoreError,
    },

    #[error("Clip {order_index}: {source}")]
    Trim {
        order_index: u32,
        source: CoreError,
    },

    #[error(transparent)]
    Media(#[from] FfmpegError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("Video {0} is already being exported")]
    AlreadyExporting(DbId),

    #[error("Video {0} not found")]
    VideoNotFound(DbId),

    #[error("Video {video_id} is not ready: {reason}")]
    NotReady { video_id: DbId, reason: String },

    #[error("Stitching video {0} failed")]
    StitchFailed(DbId),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Failed to write export metadata: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: DbId },

    #[error("Clip {clip_id} cannot move from {from} to {to}")]
    InvalidTransition {
        clip_id: DbId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error(transparent)]
    Validation(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
