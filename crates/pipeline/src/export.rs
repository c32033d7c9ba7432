//! On-demand export of a finished video.
//!
//! One export per video at a time: a second request while the first holds
//! the video's lock fails fast with [`ExportError::AlreadyExporting`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clipchain_core::naming::{ensure_video_work_dir, export_filename, sidecar_path};
use clipchain_core::provenance::{clip_provenance, ExportMetadata, EXPORT_SCHEMA_VERSION};
use clipchain_core::types::DbId;
use clipchain_db::models::clip::ClipJob;
use clipchain_db::models::status::JobStatus;
use clipchain_db::models::video::VideoJob;
use clipchain_db::GenerationStore;
use clipchain_events::EventBus;
use tokio::sync::Mutex;

use crate::error::ExportError;
use crate::status::{refresh_video_status, set_video_status};
use crate::stitcher::{StitchClip, StitchOptions, VideoStitcher};

pub struct Exporter {
    store: Arc<dyn GenerationStore>,
    stitcher: Arc<VideoStitcher>,
    events: Arc<EventBus>,
    data_dir: PathBuf,
    wrap_around: bool,
    locks: Mutex<HashMap<DbId, Arc<Mutex<()>>>>,
}

impl Exporter {
    pub fn new(
        store: Arc<dyn GenerationStore>,
        stitcher: Arc<VideoStitcher>,
        events: Arc<EventBus>,
        data_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            stitcher,
            events,
            data_dir: data_dir.into(),
            wrap_around: false,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_wrap_around(mut self, wrap_around: bool) -> Self {
        self.wrap_around = wrap_around;
        self
    }

    /// Stitch every clip of `video_id` into `video_{id}.mp4` (or
    /// `video_{id}_hq.mp4`) in its working directory and write the
    /// provenance sidecar next to it.
    pub async fn export(&self, video_id: DbId, high_quality: bool) -> Result<PathBuf, ExportError> {
        let lock = self.lock_for(video_id).await;
        let Ok(_guard) = lock.try_lock_owned() else {
            return Err(ExportError::AlreadyExporting(video_id));
        };

        let mut video = self
            .store
            .get_video(video_id)
            .await?
            .ok_or(ExportError::VideoNotFound(video_id))?;
        let clips = self.store.list_clips(video_id).await?;
        let parts = stitch_inputs(video_id, &clips)?;

        let store = self.store.as_ref();
        let events = self.events.as_ref();
        set_video_status(store, events, &mut video, JobStatus::Exporting).await?;
        tracing::info!(video_id, clips = clips.len(), high_quality, "Export started");

        let result = self.run(&video, &clips, &parts, high_quality).await;
        match result {
            Ok(path) => {
                video.output_path = Some(path.to_string_lossy().into_owned());
                set_video_status(store, events, &mut video, JobStatus::Exported).await?;
                tracing::info!(video_id, output = %path.display(), "Export finished");
                Ok(path)
            }
            Err(e) => {
                refresh_video_status(store, events, video_id).await?;
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        video: &VideoJob,
        clips: &[ClipJob],
        parts: &[StitchClip],
        high_quality: bool,
    ) -> Result<PathBuf, ExportError> {
        let work_dir = ensure_video_work_dir(&self.data_dir, video.id).await?;
        let output = work_dir.join(export_filename(video.id, high_quality));
        let options = StitchOptions {
            high_quality,
            wrap_around: self.wrap_around,
        };

        let path = self
            .stitcher
            .stitch(parts, &output, options)
            .await
            .ok_or(ExportError::StitchFailed(video.id))?;
        write_metadata(video.id, clips, &path, high_quality).await?;
        Ok(path)
    }

    async fn lock_for(&self, video_id: DbId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(video_id).or_default())
    }
}

/// Check every clip is generated and convert it for the stitcher.
fn stitch_inputs(video_id: DbId, clips: &[ClipJob]) -> Result<Vec<StitchClip>, ExportError> {
    if clips.is_empty() {
        return Err(ExportError::NotReady {
            video_id,
            reason: "video has no clips".into(),
        });
    }
    if let Some(clip) = clips.iter().find(|c| c.status != JobStatus::Generated) {
        return Err(ExportError::NotReady {
            video_id,
            reason: format!("clip {} is {}", clip.order_index, clip.status),
        });
    }
    if let Some(clip) = clips.iter().find(|c| !c.has_output()) {
        return Err(ExportError::NotReady {
            video_id,
            reason: format!("clip {} has no video file", clip.order_index),
        });
    }
    clips
        .iter()
        .map(StitchClip::from_job)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ExportError::NotReady {
            video_id,
            reason: e.to_string(),
        })
}

/// Write `<output>.json` describing how every clip was generated.
pub async fn write_metadata(
    video_id: DbId,
    clips: &[ClipJob],
    output: &Path,
    high_quality: bool,
) -> Result<PathBuf, ExportError> {
    let metadata = ExportMetadata {
        schema_version: EXPORT_SCHEMA_VERSION.to_string(),
        video_id,
        output: output.to_string_lossy().into_owned(),
        high_quality,
        exported_at: chrono::Utc::now().to_rfc3339(),
        clips: clips
            .iter()
            .map(|c| clip_provenance(c.order_index, &c.prompt, c.workflow_json.as_deref()))
            .collect(),
    };
    let path = sidecar_path(output);
    let json = serde_json::to_vec_pretty(&metadata)?;
    tokio::fs::write(&path, json).await?;
    tracing::debug!(video_id, path = %path.display(), "Export metadata written");
    Ok(path)
}
