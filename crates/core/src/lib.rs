//! Shared domain primitives for the clipchain workspace.
//!
//! Holds the error and id types, the ffmpeg/ffprobe toolkit behind the
//! [`media::VideoTools`] seam, frame arithmetic used by transition planning,
//! trim validation, dimension resolution, and provenance extraction from
//! retained workflow JSON.

pub mod dimensions;
pub mod error;
pub mod ffmpeg;
pub mod frames;
pub mod media;
pub mod naming;
pub mod provenance;
pub mod trimming;
pub mod types;
