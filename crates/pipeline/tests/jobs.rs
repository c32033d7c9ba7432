use std::sync::Arc;

use assert_matches::assert_matches;
use clipchain_core::types::DbId;
use clipchain_db::models::clip::{ClipJob, CreateClipJob};
use clipchain_db::models::status::JobStatus;
use clipchain_db::models::video::CreateVideoJob;
use clipchain_db::{GenerationStore, MemoryStore};
use clipchain_events::{EventBus, StatusEvent};
use clipchain_pipeline::{JobError, JobService};
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    store: Arc<MemoryStore>,
    events: Arc<EventBus>,
    jobs: JobService,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    let events = Arc::new(EventBus::default());
    let jobs = JobService::new(store.clone(), Arc::clone(&events), dir.path());
    Fixture {
        _dir: dir,
        store,
        events,
        jobs,
    }
}

fn clip(prompt: &str) -> CreateClipJob {
    CreateClipJob {
        prompt: prompt.into(),
        ..Default::default()
    }
}

async fn video(f: &Fixture, prompts: &[&str]) -> (DbId, Vec<ClipJob>) {
    let video = f
        .jobs
        .create_video(&CreateVideoJob {
            source_image: "/in/source.png".into(),
            width: 832,
            height: 464,
        })
        .await
        .unwrap();
    let mut clips = Vec::new();
    for prompt in prompts {
        clips.push(f.jobs.add_clip(video.id, &clip(prompt)).await.unwrap());
    }
    (video.id, clips)
}

async fn prompts(f: &Fixture, video_id: DbId) -> Vec<(u32, String)> {
    f.store
        .list_clips(video_id)
        .await
        .unwrap()
        .into_iter()
        .map(|c| (c.order_index, c.prompt))
        .collect()
}

/// Mark a clip generated, optionally with a chained start image.
async fn generated(f: &Fixture, clip_id: DbId, derived: bool) {
    let mut clip = f.store.get_clip(clip_id).await.unwrap().unwrap();
    clip.status = JobStatus::Generated;
    clip.video_path = Some(format!("/w/clip_{:03}.mp4", clip.order_index));
    if derived {
        clip.start_image = Some(format!("/w/clip_{:03}_last.png", clip.order_index - 1));
        clip.start_image_derived = true;
    }
    f.store.save_clip(&clip).await.unwrap();
}

#[tokio::test]
async fn add_insert_delete_keep_indices_dense() {
    let f = fixture();
    let (video_id, clips) = video(&f, &["a", "c"]).await;

    let inserted = f.jobs.insert_clip(video_id, 1, &clip("b")).await.unwrap();
    assert_eq!(inserted.order_index, 1);
    assert_eq!(
        prompts(&f, video_id).await,
        [(0, "a".into()), (1, "b".into()), (2, "c".into())]
    );

    f.jobs.delete_clip(clips[0].id).await.unwrap();
    assert_eq!(prompts(&f, video_id).await, [(0, "b".into()), (1, "c".into())]);
}

#[tokio::test]
async fn deleting_last_clip_deletes_video() {
    let f = fixture();
    let (video_id, clips) = video(&f, &["a"]).await;
    let mut rx = f.events.subscribe();

    f.jobs.delete_clip(clips[0].id).await.unwrap();

    assert!(f.store.get_video(video_id).await.unwrap().is_none());
    assert_matches!(rx.try_recv().unwrap(), StatusEvent::ClipDeleted { clip_id, .. } if clip_id == clips[0].id);
    assert_matches!(rx.try_recv().unwrap(), StatusEvent::VideoDeleted { video_id: id, .. } if id == video_id);
}

#[tokio::test]
async fn delete_unknown_clip_is_not_found() {
    let f = fixture();
    assert_matches!(
        f.jobs.delete_clip(404).await,
        Err(JobError::NotFound { entity: "clip", id: 404 })
    );
}

#[tokio::test]
async fn add_clip_to_unknown_video_is_not_found() {
    let f = fixture();
    assert_matches!(
        f.jobs.add_clip(7, &clip("a")).await,
        Err(JobError::NotFound { entity: "video", id: 7 })
    );
}

#[tokio::test]
async fn invalid_clip_settings_are_rejected() {
    let f = fixture();
    let (video_id, _) = video(&f, &[]).await;
    let input = CreateClipJob {
        speed: -1.0,
        ..Default::default()
    };
    assert_matches!(
        f.jobs.add_clip(video_id, &input).await,
        Err(JobError::Validation(_))
    );
}

#[tokio::test]
async fn oversized_video_is_rejected() {
    let f = fixture();
    let input = CreateVideoJob {
        source_image: String::new(),
        width: 10_000,
        height: 480,
    };
    assert_matches!(f.jobs.create_video(&input).await, Err(JobError::Validation(_)));
}

#[tokio::test]
async fn queue_video_walks_the_state_machine() {
    let f = fixture();
    let (video_id, clips) = video(&f, &["a", "b"]).await;
    let mut rx = f.events.subscribe();

    assert_eq!(f.jobs.queue_video(video_id).await.unwrap(), 2);

    let mut steps = Vec::new();
    while let Ok(event) = rx.try_recv() {
        steps.push(event);
    }
    let first_clip: Vec<JobStatus> = steps
        .iter()
        .filter_map(|e| match e {
            StatusEvent::ClipStatusChanged {
                clip_id, status, ..
            } if *clip_id == clips[0].id => Some(*status),
            _ => None,
        })
        .collect();
    assert_eq!(first_clip, [JobStatus::Queuing, JobStatus::Queued]);
    assert_matches!(
        steps.last(),
        Some(StatusEvent::VideoStatusChanged { status: JobStatus::Queued, .. })
    );

    // Nothing left in Queue.
    assert_eq!(f.jobs.queue_video(video_id).await.unwrap(), 0);
}

#[tokio::test]
async fn requeue_requires_terminal_status() {
    let f = fixture();
    let (_, clips) = video(&f, &["a"]).await;
    assert_matches!(
        f.jobs.requeue_clip(clips[0].id, false).await,
        Err(JobError::InvalidTransition {
            from: JobStatus::Queue,
            to: JobStatus::Queuing,
            ..
        })
    );
}

#[tokio::test]
async fn requeue_without_cascade_touches_one_clip() {
    let f = fixture();
    let (video_id, clips) = video(&f, &["a", "b"]).await;
    generated(&f, clips[0].id, false).await;
    generated(&f, clips[1].id, true).await;

    let requeued = f.jobs.requeue_clip(clips[0].id, false).await.unwrap();
    assert_eq!(requeued, [clips[0].id]);

    let first = f.store.get_clip(clips[0].id).await.unwrap().unwrap();
    assert_eq!(first.status, JobStatus::Queued);
    assert!(first.video_path.is_none());
    let second = f.store.get_clip(clips[1].id).await.unwrap().unwrap();
    assert_eq!(second.status, JobStatus::Generated);
    assert!(second.start_image_derived);
    assert_eq!(
        f.store.get_video(video_id).await.unwrap().unwrap().status,
        JobStatus::Queued
    );
}

#[tokio::test]
async fn cascade_requeues_chained_clips_until_an_own_image() {
    let f = fixture();
    let (_, clips) = video(&f, &["a", "b", "c", "d"]).await;
    generated(&f, clips[0].id, false).await;
    generated(&f, clips[1].id, true).await;
    generated(&f, clips[2].id, true).await;
    // Clip 3 has its own start image.
    generated(&f, clips[3].id, false).await;

    let requeued = f.jobs.requeue_clip(clips[0].id, true).await.unwrap();
    assert_eq!(requeued, [clips[0].id, clips[1].id, clips[2].id]);

    for id in [clips[1].id, clips[2].id] {
        let clip = f.store.get_clip(id).await.unwrap().unwrap();
        assert_eq!(clip.status, JobStatus::Queued);
        assert!(clip.start_image.is_none());
        assert!(!clip.start_image_derived);
    }
    let last = f.store.get_clip(clips[3].id).await.unwrap().unwrap();
    assert_eq!(last.status, JobStatus::Generated);
}

#[tokio::test]
async fn cascade_clears_chained_image_of_pending_clip() {
    let f = fixture();
    let (_, clips) = video(&f, &["a", "b"]).await;
    generated(&f, clips[0].id, false).await;
    let mut second = f.store.get_clip(clips[1].id).await.unwrap().unwrap();
    second.status = JobStatus::Queued;
    second.start_image = Some("/w/clip_000_last.png".into());
    second.start_image_derived = true;
    f.store.save_clip(&second).await.unwrap();

    let requeued = f.jobs.requeue_clip(clips[0].id, true).await.unwrap();
    assert_eq!(requeued, [clips[0].id]);
    let second = f.store.get_clip(clips[1].id).await.unwrap().unwrap();
    assert_eq!(second.status, JobStatus::Queued);
    assert!(second.start_image.is_none());
}
