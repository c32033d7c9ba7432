//! File naming conventions for generated clips, extracted frames and
//! stitch intermediates.
//!
//! Every video job owns one working directory under the data root; all
//! per-job artifacts are named deterministically inside it.

use std::path::{Path, PathBuf};

use crate::types::DbId;

/// Working directory for a video job: `{root}/video_{id}`.
pub fn video_work_dir(root: &Path, video_id: DbId) -> PathBuf {
    root.join(format!("video_{video_id}"))
}

/// Create (if needed) and return the working directory for a video job.
pub async fn ensure_video_work_dir(root: &Path, video_id: DbId) -> std::io::Result<PathBuf> {
    let dir = video_work_dir(root, video_id);
    tokio::fs::create_dir_all(&dir).await?;
    Ok(dir)
}

/// Base name of a generated clip: `clip_{order:03}`.
///
/// # Examples
///
/// ```
/// use clipchain_core::naming::clip_stem;
///
/// assert_eq!(clip_stem(0), "clip_000");
/// assert_eq!(clip_stem(12), "clip_012");
/// ```
pub fn clip_stem(order_index: u32) -> String {
    format!("clip_{order_index:03}")
}

/// Start-image path derived from the last frame of the clip at `order_index`.
pub fn last_frame_path(work_dir: &Path, order_index: u32) -> PathBuf {
    work_dir.join(format!("{}_last.png", clip_stem(order_index)))
}

/// Default export file for a video job.
pub fn export_filename(video_id: DbId, high_quality: bool) -> String {
    if high_quality {
        format!("video_{video_id}_hq.mp4")
    } else {
        format!("video_{video_id}.mp4")
    }
}

/// Provenance sidecar path: the output path with `.json` appended.
pub fn sidecar_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_owned();
    name.push(".json");
    PathBuf::from(name)
}

/// First non-existent path among `{stem}.{ext}`, `{stem}_1.{ext}`, `{stem}_2.{ext}`, ...
pub fn unique_path(dir: &Path, stem: &str, ext: &str) -> PathBuf {
    let file = |suffix: Option<u32>| match (suffix, ext.is_empty()) {
        (None, true) => stem.to_string(),
        (None, false) => format!("{stem}.{ext}"),
        (Some(n), true) => format!("{stem}_{n}"),
        (Some(n), false) => format!("{stem}_{n}.{ext}"),
    };

    let candidate = dir.join(file(None));
    if !candidate.exists() {
        return candidate;
    }
    let mut n = 1u32;
    loop {
        let candidate = dir.join(file(Some(n)));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}
