//! Generation and composition pipeline.
//!
//! - [`scheduler::Scheduler`]: single-flight generation queue.
//! - [`generator`]: the clip generation seam and its ComfyUI implementation.
//! - [`transitions::TransitionPlanner`]: bridge segments between clips.
//! - [`stitcher::VideoStitcher`]: trim, bridge, retime and concatenate.
//! - [`export::Exporter`]: per-video export with provenance sidecar.
//! - [`jobs::JobService`]: clip/video management that keeps indices dense.

pub mod error;
pub mod export;
pub mod generator;
pub mod jobs;
pub mod scheduler;
pub mod status;
pub mod stitcher;
pub mod transitions;

pub use error::{ExportError, GenerateError, JobError, StitchError};
pub use export::Exporter;
pub use generator::{ClipGenerator, ComfyClipGenerator, GeneratedClip, GenerationDefaults};
pub use jobs::JobService;
pub use scheduler::{RunSummary, Scheduler};
pub use stitcher::{StitchClip, StitchOptions, VideoStitcher};
pub use transitions::{ClipMedia, TransitionInfo, TransitionPlanner};
