//! The clip generation seam.
//!
//! The scheduler hands one clip at a time to a [`ClipGenerator`]. The
//! production implementation fills the image-to-video workflow template
//! and runs it through the ComfyUI [`JobExecutionClient`].

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use clipchain_comfyui::template::{self, Substitutions};
use clipchain_comfyui::{JobExecutionClient, JobRequest};
use clipchain_core::naming::clip_stem;
use clipchain_db::models::clip::ClipJob;
use clipchain_db::models::video::VideoJob;

use crate::error::GenerateError;

/// Output of one successful generation.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedClip {
    pub path: PathBuf,
    /// Filled workflow as submitted, kept for provenance.
    pub workflow_json: Option<String>,
}

#[async_trait]
pub trait ClipGenerator: Send + Sync {
    /// Generate `clip` into `output_dir`.
    ///
    /// `Ok(None)` means the backend ran the job and reported failure.
    /// `video` carries resolved (non-zero) output dimensions.
    async fn generate(
        &self,
        video: &VideoJob,
        clip: &ClipJob,
        output_dir: &Path,
    ) -> Result<Option<GeneratedClip>, GenerateError>;
}

// ---------------------------------------------------------------------------
// ComfyUI implementation
// ---------------------------------------------------------------------------

/// Sampler settings applied to every clip.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationDefaults {
    pub negative_prompt: String,
    pub steps: u32,
    pub cfg: f64,
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        Self {
            negative_prompt: String::new(),
            steps: 20,
            cfg: 6.0,
        }
    }
}

pub struct ComfyClipGenerator {
    client: JobExecutionClient,
    template: PathBuf,
    defaults: GenerationDefaults,
}

impl ComfyClipGenerator {
    pub fn new(client: JobExecutionClient, template: PathBuf, defaults: GenerationDefaults) -> Self {
        Self {
            client,
            template,
            defaults,
        }
    }

    /// Build the job request for one clip.
    pub fn request(
        &self,
        video: &VideoJob,
        clip: &ClipJob,
        output_dir: &Path,
    ) -> Result<JobRequest, GenerateError> {
        let start_image = start_image(video, clip)
            .ok_or(GenerateError::MissingStartImage { clip_id: clip.id })?;
        let seed = clip.seed.unwrap_or_else(random_seed);

        let substitutions = Substitutions::new()
            .text(template::PROMPT, clip.prompt.as_str())
            .text(template::NEGATIVE_PROMPT, self.defaults.negative_prompt.as_str())
            .int(template::WIDTH, i64::from(video.width))
            .int(template::HEIGHT, i64::from(video.height))
            .int(template::SEED, seed)
            .int(template::STEPS, i64::from(self.defaults.steps))
            .float(template::CFG, self.defaults.cfg)
            .loras(clip.loras.iter().map(|l| (l.name.as_str(), l.strength)))?;

        Ok(JobRequest {
            template: self.template.clone(),
            substitutions,
            assets: vec![(template::START_IMAGE.to_string(), start_image)],
            output_dir: output_dir.to_path_buf(),
            output_stem: clip_stem(clip.order_index),
        })
    }
}

#[async_trait]
impl ClipGenerator for ComfyClipGenerator {
    async fn generate(
        &self,
        video: &VideoJob,
        clip: &ClipJob,
        output_dir: &Path,
    ) -> Result<Option<GeneratedClip>, GenerateError> {
        let request = self.request(video, clip, output_dir)?;
        let Some(result) = self.client.execute(&request).await? else {
            return Ok(None);
        };
        Ok(Some(GeneratedClip {
            path: result.output,
            workflow_json: serde_json::to_string(&result.workflow).ok(),
        }))
    }
}

/// The clip's own start image. The first clip falls back to the video's
/// source image; later clips wait for their predecessor's last frame.
pub fn start_image(video: &VideoJob, clip: &ClipJob) -> Option<PathBuf> {
    let fallback = (clip.order_index == 0).then_some(video.source_image.as_str());
    clip.start_image
        .as_deref()
        .filter(|s| !s.is_empty())
        .or(fallback.filter(|s| !s.is_empty()))
        .map(PathBuf::from)
}

/// A seed in the range samplers accept as a JSON integer.
fn random_seed() -> i64 {
    let bits = uuid::Uuid::new_v4().as_u128() as u64;
    (bits >> 16) as i64
}
