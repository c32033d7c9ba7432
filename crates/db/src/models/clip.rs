//! Clip job record, transition kinds and DTOs.

use std::fmt;
use std::str::FromStr;

use clipchain_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};

use crate::models::status::JobStatus;

/// Transition from a clip to the one after it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransitionKind {
    #[default]
    None,
    Fade,
    Interpolate,
    Redirect,
}

impl TransitionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransitionKind::None => "None",
            TransitionKind::Fade => "Fade",
            TransitionKind::Interpolate => "Interpolate",
            TransitionKind::Redirect => "Redirect",
        }
    }
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransitionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            TransitionKind::None,
            TransitionKind::Fade,
            TransitionKind::Interpolate,
            TransitionKind::Redirect,
        ]
        .into_iter()
        .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
        .ok_or_else(|| format!("Unknown transition: '{s}'"))
    }
}

/// A LoRA reference filled into one of the workflow's LoRA slots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoraSlot {
    pub name: String,
    pub strength: f64,
}

/// One generated segment of a video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipJob {
    pub id: DbId,
    pub video_id: DbId,
    /// Dense, 0-based playback position within the video.
    pub order_index: u32,
    pub prompt: String,
    pub start_image: Option<String>,
    /// Set when `start_image` was taken from the previous clip's last frame.
    pub start_image_derived: bool,
    pub video_path: Option<String>,
    /// Filled workflow submitted for this clip, kept for provenance.
    pub workflow_json: Option<String>,
    pub status: JobStatus,
    /// Transition into the next clip.
    pub transition: TransitionKind,
    /// Fade length in seconds.
    pub transition_secs: f64,
    /// Interpolation granularity for `Interpolate`/`Redirect`.
    pub add_frames: u32,
    pub drop_first: u32,
    pub drop_last: u32,
    pub speed: f64,
    pub seed: Option<i64>,
    pub loras: Vec<LoraSlot>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl ClipJob {
    /// `true` when the clip has a start image to generate from.
    pub fn has_start_image(&self) -> bool {
        self.start_image.as_deref().is_some_and(|s| !s.is_empty())
    }

    /// `true` when the generated file is recorded and present on disk.
    pub fn has_output(&self) -> bool {
        self.video_path
            .as_deref()
            .is_some_and(|p| !p.is_empty() && std::path::Path::new(p).exists())
    }
}

/// DTO for creating a clip. Unset numeric fields take neutral defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CreateClipJob {
    pub prompt: String,
    pub start_image: Option<String>,
    pub transition: TransitionKind,
    pub transition_secs: f64,
    pub add_frames: u32,
    pub drop_first: u32,
    pub drop_last: u32,
    pub speed: f64,
    pub seed: Option<i64>,
    pub loras: Vec<LoraSlot>,
}

impl Default for CreateClipJob {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            start_image: None,
            transition: TransitionKind::None,
            transition_secs: 0.0,
            add_frames: 0,
            drop_first: 0,
            drop_last: 0,
            speed: 1.0,
            seed: None,
            loras: Vec::new(),
        }
    }
}
