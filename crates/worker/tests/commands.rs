//! Management commands edit the store a running worker reads from.

use std::sync::Arc;

use clap::Parser;
use clipchain_db::models::status::JobStatus;
use clipchain_db::{GenerationStore, MemoryStore};
use clipchain_events::EventBus;
use clipchain_pipeline::JobService;
use clipchain_worker::cli::{self, Cli, Command, ManageCommand};
use tempfile::TempDir;

struct Harness {
    dir: TempDir,
    store: Arc<MemoryStore>,
    jobs: JobService,
}

async fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::open(dir.path().join("store.json")).await.unwrap());
    let jobs = JobService::new(store.clone(), Arc::new(EventBus::default()), dir.path());
    Harness { dir, store, jobs }
}

fn command(args: &[&str]) -> ManageCommand {
    let argv = std::iter::once("clipchain-worker").chain(args.iter().copied());
    match Cli::try_parse_from(argv).unwrap().command {
        Some(Command::Manage(command)) => command,
        _ => panic!("not a management command: {args:?}"),
    }
}

async fn exec(h: &Harness, args: &[&str]) -> anyhow::Result<String> {
    cli::manage(&h.jobs, h.store.as_ref(), command(args)).await
}

#[tokio::test]
async fn new_video_with_clips_reaches_the_worker_queue() {
    let h = harness().await;
    let video_id = exec(&h, &["video", "new", "/img/heron.png", "--width", "832", "--height", "480"])
        .await
        .unwrap();

    exec(&h, &["clip", "add", video_id.as_str(), "--prompt", "a heron wades"])
        .await
        .unwrap();
    exec(&h, &["clip", "add", video_id.as_str(), "--prompt", "it takes off", "--transition", "fade"])
        .await
        .unwrap();
    // Inserted ahead of the second clip.
    let inserted = exec(&h, &["clip", "add", video_id.as_str(), "--prompt", "it looks up", "--at", "1"])
        .await
        .unwrap();
    assert!(inserted.ends_with(" 1"));

    assert_eq!(exec(&h, &["queue", video_id.as_str()]).await.unwrap(), "3");

    // A worker started later on the same snapshot sees the queued clips.
    let worker = MemoryStore::open(h.dir.path().join("store.json")).await.unwrap();
    let next = worker.next_queued_clip().await.unwrap().unwrap();
    assert_eq!(next.prompt, "a heron wades");
    assert_eq!(next.status, JobStatus::Queued);

    let shown = exec(&h, &["video", "show", video_id.as_str()]).await.unwrap();
    assert!(shown.starts_with(&format!("video {video_id} Queued 832x480")));
    assert_eq!(shown.lines().count(), 4);
    assert!(shown.lines().nth(2).unwrap().contains("it looks up"));
}

#[tokio::test]
async fn requeue_only_accepts_finished_clips() {
    let h = harness().await;
    let video_id = exec(&h, &["video", "new", "/img/a.png"]).await.unwrap();
    let added = exec(&h, &["clip", "add", video_id.as_str(), "--prompt", "a"]).await.unwrap();
    let clip_id = added.split(' ').next().unwrap().to_string();
    exec(&h, &["queue", video_id.as_str()]).await.unwrap();

    let err = exec(&h, &["requeue", clip_id.as_str()]).await.unwrap_err();
    assert!(err.to_string().contains("cannot move from Queued"));

    let mut clip = h.store.get_clip(clip_id.parse().unwrap()).await.unwrap().unwrap();
    clip.status = JobStatus::Failed;
    h.store.save_clip(&clip).await.unwrap();
    assert_eq!(exec(&h, &["requeue", clip_id.as_str(), "--cascade"]).await.unwrap(), clip_id);
}

#[tokio::test]
async fn invalid_input_is_reported_not_stored() {
    let h = harness().await;
    let video_id = exec(&h, &["video", "new", "/img/a.png"]).await.unwrap();

    assert!(exec(&h, &["clip", "add", video_id.as_str(), "--prompt", "a", "--speed", "0"])
        .await
        .is_err());
    assert!(exec(&h, &["clip", "add", "999", "--prompt", "a"]).await.is_err());
    assert!(exec(&h, &["video", "show", "999"]).await.is_err());

    let video_id = video_id.parse().unwrap();
    assert!(h.store.list_clips(video_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn deleting_the_last_clip_removes_the_video() {
    let h = harness().await;
    let video_id = exec(&h, &["video", "new", "/img/a.png"]).await.unwrap();
    let added = exec(&h, &["clip", "add", video_id.as_str(), "--prompt", "a"]).await.unwrap();
    let clip_id = added.split(' ').next().unwrap().to_string();

    assert_eq!(exec(&h, &["clip", "delete", clip_id.as_str()]).await.unwrap(), clip_id);
    assert!(h
        .store
        .get_video(video_id.parse().unwrap())
        .await
        .unwrap()
        .is_none());
}
