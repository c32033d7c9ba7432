//! In-process [`GenerationStore`] with an optional JSON snapshot file.
//!
//! All state lives behind one lock. When a snapshot path is configured,
//! every mutation rewrites the snapshot (write to a temp file, then rename)
//! before the lock is released, and every access first reloads the snapshot
//! if another process has replaced it since this store last touched it.
//! Concurrent writers from different processes are last-writer-wins.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use chrono::Utc;
use clipchain_core::types::DbId;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};

use crate::models::clip::{ClipJob, CreateClipJob};
use crate::models::status::JobStatus;
use crate::models::video::{CreateVideoJob, VideoJob};
use crate::store::{GenerationStore, StoreError};

#[derive(Debug, Default, Serialize, Deserialize)]
struct State {
    next_video_id: DbId,
    next_clip_id: DbId,
    videos: BTreeMap<DbId, VideoJob>,
    clips: BTreeMap<DbId, ClipJob>,
}

impl State {
    fn clips_of(&self, video_id: DbId) -> Vec<&ClipJob> {
        let mut clips: Vec<&ClipJob> = self
            .clips
            .values()
            .filter(|c| c.video_id == video_id)
            .collect();
        clips.sort_by_key(|c| c.order_index);
        clips
    }

    /// Renumber a video's clips 0..n in their current order.
    fn reindex(&mut self, video_id: DbId) {
        let ids: Vec<DbId> = self.clips_of(video_id).iter().map(|c| c.id).collect();
        for (index, id) in ids.into_iter().enumerate() {
            if let Some(clip) = self.clips.get_mut(&id) {
                clip.order_index = index as u32;
            }
        }
    }
}

/// Modification time and length of the snapshot file.
type Stamp = (SystemTime, u64);

#[derive(Debug, Default)]
struct Inner {
    state: State,
    /// Snapshot stamp as of the last load or write by this store.
    stamp: Option<Stamp>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    snapshot: Option<PathBuf>,
}

impl MemoryStore {
    /// A store that keeps nothing on disk.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a store backed by `path`, loading it when it exists.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let stamp = stamp_of(&path).await?;
        let state = match stamp {
            Some(_) => read_snapshot(&path).await?,
            None => State::default(),
        };
        tracing::info!(
            path = %path.display(),
            videos = state.videos.len(),
            clips = state.clips.len(),
            "Generation store opened",
        );
        Ok(Self {
            inner: Mutex::new(Inner { state, stamp }),
            snapshot: Some(path),
        })
    }

    /// Lock the state, reloading the snapshot first if it changed on disk.
    async fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        let mut inner = self.inner.lock().await;
        let Some(path) = &self.snapshot else {
            return Ok(inner);
        };
        let stamp = stamp_of(path).await?;
        if stamp.is_some() && stamp != inner.stamp {
            inner.state = read_snapshot(path).await?;
            inner.stamp = stamp;
            tracing::debug!(
                path = %path.display(),
                videos = inner.state.videos.len(),
                clips = inner.state.clips.len(),
                "Generation store reloaded",
            );
        }
        Ok(inner)
    }

    async fn persist(&self, inner: &mut Inner) -> Result<(), StoreError> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };
        write_snapshot(path, &inner.state).await?;
        inner.stamp = stamp_of(path).await?;
        Ok(())
    }
}

async fn stamp_of(path: &Path) -> Result<Option<Stamp>, StoreError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(Some((meta.modified()?, meta.len()))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn read_snapshot(path: &Path) -> Result<State, StoreError> {
    let text = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&text)?)
}

async fn write_snapshot(path: &Path, state: &State) -> Result<(), StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_string_pretty(state)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl GenerationStore for MemoryStore {
    async fn create_video(&self, input: &CreateVideoJob) -> Result<VideoJob, StoreError> {
        let mut inner = self.lock().await?;
        let state = &mut inner.state;
        state.next_video_id += 1;
        let now = Utc::now();
        let video = VideoJob {
            id: state.next_video_id,
            source_image: input.source_image.clone(),
            width: input.width,
            height: input.height,
            status: JobStatus::Queue,
            output_path: None,
            created_at: now,
            updated_at: now,
        };
        state.videos.insert(video.id, video.clone());
        self.persist(&mut inner).await?;
        Ok(video)
    }

    async fn get_video(&self, id: DbId) -> Result<Option<VideoJob>, StoreError> {
        Ok(self.lock().await?.state.videos.get(&id).cloned())
    }

    async fn list_videos(&self) -> Result<Vec<VideoJob>, StoreError> {
        let inner = self.lock().await?;
        let state = &inner.state;
        let mut videos: Vec<VideoJob> = state.videos.values().cloned().collect();
        videos.sort_by_key(|v| (v.created_at, v.id));
        Ok(videos)
    }

    async fn save_video(&self, video: &VideoJob) -> Result<bool, StoreError> {
        let mut inner = self.lock().await?;
        let state = &mut inner.state;
        let stored = state.videos.get_mut(&video.id).ok_or(StoreError::NotFound {
            entity: "video",
            id: video.id,
        })?;
        // Timestamps are store-owned; a stale copy is not a change.
        let mut incoming = video.clone();
        incoming.created_at = stored.created_at;
        incoming.updated_at = stored.updated_at;
        if *stored == incoming {
            return Ok(false);
        }
        incoming.updated_at = Utc::now();
        *stored = incoming;
        self.persist(&mut inner).await?;
        Ok(true)
    }

    async fn delete_video(&self, id: DbId) -> Result<bool, StoreError> {
        let mut inner = self.lock().await?;
        let state = &mut inner.state;
        if state.videos.remove(&id).is_none() {
            return Ok(false);
        }
        state.clips.retain(|_, c| c.video_id != id);
        self.persist(&mut inner).await?;
        Ok(true)
    }

    async fn create_clip(
        &self,
        video_id: DbId,
        position: Option<u32>,
        input: &CreateClipJob,
    ) -> Result<ClipJob, StoreError> {
        let mut inner = self.lock().await?;
        let state = &mut inner.state;
        if !state.videos.contains_key(&video_id) {
            return Err(StoreError::NotFound {
                entity: "video",
                id: video_id,
            });
        }

        let count = state.clips_of(video_id).len() as u32;
        let order_index = position.map_or(count, |p| p.min(count));
        for clip in state.clips.values_mut() {
            if clip.video_id == video_id && clip.order_index >= order_index {
                clip.order_index += 1;
            }
        }

        state.next_clip_id += 1;
        let now = Utc::now();
        let clip = ClipJob {
            id: state.next_clip_id,
            video_id,
            order_index,
            prompt: input.prompt.clone(),
            start_image: input.start_image.clone().filter(|s| !s.is_empty()),
            start_image_derived: false,
            video_path: None,
            workflow_json: None,
            status: JobStatus::Queue,
            transition: input.transition,
            transition_secs: input.transition_secs,
            add_frames: input.add_frames,
            drop_first: input.drop_first,
            drop_last: input.drop_last,
            speed: input.speed,
            seed: input.seed,
            loras: input.loras.clone(),
            created_at: now,
            updated_at: now,
        };
        state.clips.insert(clip.id, clip.clone());
        self.persist(&mut inner).await?;
        Ok(clip)
    }

    async fn get_clip(&self, id: DbId) -> Result<Option<ClipJob>, StoreError> {
        Ok(self.lock().await?.state.clips.get(&id).cloned())
    }

    async fn list_clips(&self, video_id: DbId) -> Result<Vec<ClipJob>, StoreError> {
        let inner = self.lock().await?;
        let state = &inner.state;
        Ok(state.clips_of(video_id).into_iter().cloned().collect())
    }

    async fn save_clip(&self, clip: &ClipJob) -> Result<bool, StoreError> {
        let mut inner = self.lock().await?;
        let state = &mut inner.state;
        let stored = state.clips.get_mut(&clip.id).ok_or(StoreError::NotFound {
            entity: "clip",
            id: clip.id,
        })?;
        if stored.video_id != clip.video_id {
            return Err(StoreError::Invalid(format!(
                "clip {} cannot move between videos",
                clip.id
            )));
        }

        let mut incoming = clip.clone();
        incoming.order_index = stored.order_index;
        incoming.created_at = stored.created_at;
        incoming.updated_at = stored.updated_at;
        if *stored == incoming {
            return Ok(false);
        }
        incoming.updated_at = Utc::now();
        *stored = incoming;
        self.persist(&mut inner).await?;
        Ok(true)
    }

    async fn delete_clip(&self, id: DbId) -> Result<Option<ClipJob>, StoreError> {
        let mut inner = self.lock().await?;
        let state = &mut inner.state;
        let Some(removed) = state.clips.remove(&id) else {
            return Ok(None);
        };
        state.reindex(removed.video_id);
        self.persist(&mut inner).await?;
        Ok(Some(removed))
    }

    async fn next_queued_clip(&self) -> Result<Option<ClipJob>, StoreError> {
        let inner = self.lock().await?;
        let state = &inner.state;
        let next = state
            .clips
            .values()
            .filter(|c| c.status == JobStatus::Queued)
            .filter_map(|c| state.videos.get(&c.video_id).map(|v| (v, c)))
            .min_by_key(|(v, c)| (v.created_at, v.id, c.order_index))
            .map(|(_, c)| c.clone());
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn clip(prompt: &str) -> CreateClipJob {
        CreateClipJob {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    async fn video(store: &MemoryStore) -> VideoJob {
        store
            .create_video(&CreateVideoJob {
                source_image: "/img/src.png".into(),
                ..Default::default()
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn append_and_insert_keep_indices_dense() {
        let store = MemoryStore::new();
        let v = video(&store).await;
        store.create_clip(v.id, None, &clip("a")).await.unwrap();
        store.create_clip(v.id, None, &clip("c")).await.unwrap();
        store.create_clip(v.id, Some(1), &clip("b")).await.unwrap();
        store.create_clip(v.id, Some(99), &clip("d")).await.unwrap();

        let clips = store.list_clips(v.id).await.unwrap();
        let prompts: Vec<&str> = clips.iter().map(|c| c.prompt.as_str()).collect();
        let indices: Vec<u32> = clips.iter().map(|c| c.order_index).collect();
        assert_eq!(prompts, ["a", "b", "c", "d"]);
        assert_eq!(indices, [0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn delete_closes_gap() {
        let store = MemoryStore::new();
        let v = video(&store).await;
        let a = store.create_clip(v.id, None, &clip("a")).await.unwrap();
        let b = store.create_clip(v.id, None, &clip("b")).await.unwrap();
        store.create_clip(v.id, None, &clip("c")).await.unwrap();

        let removed = store.delete_clip(b.id).await.unwrap().unwrap();
        assert_eq!(removed.prompt, "b");
        let clips = store.list_clips(v.id).await.unwrap();
        assert_eq!(clips.iter().map(|c| c.order_index).collect::<Vec<_>>(), [0, 1]);
        assert_eq!(clips[0].id, a.id);
        assert!(store.delete_clip(b.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_is_diff_based() {
        let store = MemoryStore::new();
        let v = video(&store).await;
        let mut c = store.create_clip(v.id, None, &clip("a")).await.unwrap();

        assert!(!store.save_clip(&c).await.unwrap());
        c.status = JobStatus::Queuing;
        assert!(store.save_clip(&c).await.unwrap());
        let stored = store.get_clip(c.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Queuing);

        let mut v2 = store.get_video(v.id).await.unwrap().unwrap();
        assert!(!store.save_video(&v2).await.unwrap());
        v2.status = JobStatus::Queued;
        assert!(store.save_video(&v2).await.unwrap());
    }

    #[tokio::test]
    async fn stale_timestamps_are_not_a_change() {
        let store = MemoryStore::new();
        let v = video(&store).await;
        let mut c = store.create_clip(v.id, None, &clip("a")).await.unwrap();
        c.status = JobStatus::Queuing;
        assert!(store.save_clip(&c).await.unwrap());
        // `c` still carries the pre-save updated_at.
        assert!(!store.save_clip(&c).await.unwrap());
    }

    #[tokio::test]
    async fn save_does_not_move_clips() {
        let store = MemoryStore::new();
        let v = video(&store).await;
        let mut a = store.create_clip(v.id, None, &clip("a")).await.unwrap();
        store.create_clip(v.id, None, &clip("b")).await.unwrap();
        a.order_index = 5;
        assert!(!store.save_clip(&a).await.unwrap());
        assert_eq!(store.get_clip(a.id).await.unwrap().unwrap().order_index, 0);
    }

    #[tokio::test]
    async fn next_queued_orders_by_video_then_index() {
        let store = MemoryStore::new();
        let older = video(&store).await;
        let newer = video(&store).await;

        let mut n0 = store.create_clip(newer.id, None, &clip("n0")).await.unwrap();
        let mut o0 = store.create_clip(older.id, None, &clip("o0")).await.unwrap();
        let mut o1 = store.create_clip(older.id, None, &clip("o1")).await.unwrap();
        assert!(store.next_queued_clip().await.unwrap().is_none());

        for c in [&mut n0, &mut o1] {
            c.status = JobStatus::Queued;
            store.save_clip(c).await.unwrap();
        }
        assert_eq!(store.next_queued_clip().await.unwrap().unwrap().id, o1.id);

        o0.status = JobStatus::Queued;
        store.save_clip(&o0).await.unwrap();
        assert_eq!(store.next_queued_clip().await.unwrap().unwrap().id, o0.id);
    }

    #[tokio::test]
    async fn delete_video_cascades() {
        let store = MemoryStore::new();
        let v = video(&store).await;
        let c = store.create_clip(v.id, None, &clip("a")).await.unwrap();
        assert!(store.delete_video(v.id).await.unwrap());
        assert!(store.get_clip(c.id).await.unwrap().is_none());
        assert!(!store.delete_video(v.id).await.unwrap());
    }

    #[tokio::test]
    async fn clip_for_missing_video_is_not_found() {
        let store = MemoryStore::new();
        let err = store.create_clip(42, None, &clip("a")).await.unwrap_err();
        assert_matches!(err, StoreError::NotFound { entity: "video", id: 42 });
    }
}
