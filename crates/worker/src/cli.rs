//! Command-line surface of the worker.
//!
//! `run` and `export` drive the pipeline; the management commands
//! ([`ManageCommand`]) edit videos and clips through [`JobService`] and
//! return the text to print. They write the same store snapshot a running
//! worker reads, so clips queued here are picked up without a restart.

use std::fmt::Write as _;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use clipchain_core::types::DbId;
use clipchain_db::models::clip::{CreateClipJob, LoraSlot, TransitionKind};
use clipchain_db::models::video::CreateVideoJob;
use clipchain_db::GenerationStore;
use clipchain_pipeline::JobService;

#[derive(Parser)]
#[command(name = "clipchain-worker", version, about = "Chained image-to-video generation worker")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Generate queued clips until interrupted.
    Run,
    /// Stitch every clip of a video into one file.
    Export {
        video_id: DbId,
        /// Upscale and smooth every clip before joining.
        #[arg(long)]
        hq: bool,
    },
    #[command(flatten)]
    Manage(ManageCommand),
}

#[derive(Subcommand)]
pub enum ManageCommand {
    /// Create or inspect videos.
    #[command(subcommand)]
    Video(VideoCommand),
    /// Add or remove clips.
    #[command(subcommand)]
    Clip(ClipCommand),
    /// Queue every new clip of a video for generation.
    Queue { video_id: DbId },
    /// Send a generated or failed clip back to the queue.
    Requeue {
        clip_id: DbId,
        /// Also requeue following clips that start from this clip's last frame.
        #[arg(long)]
        cascade: bool,
    },
}

#[derive(Subcommand)]
pub enum VideoCommand {
    /// Create a video from a source image.
    New {
        source_image: String,
        /// Target width; 0 follows the first start image.
        #[arg(long, default_value_t = 0)]
        width: u32,
        /// Target height; 0 follows the first start image.
        #[arg(long, default_value_t = 0)]
        height: u32,
    },
    /// Print a video and its clips.
    Show { video_id: DbId },
}

#[derive(Subcommand)]
pub enum ClipCommand {
    /// Append a clip, or insert it at `--at`.
    Add {
        video_id: DbId,
        /// Order index to insert at; later clips move back by one.
        #[arg(long)]
        at: Option<u32>,
        #[command(flatten)]
        clip: ClipArgs,
    },
    /// Delete a clip. Deleting the last clip deletes its video.
    Delete { clip_id: DbId },
}

#[derive(Args, Debug, Clone)]
pub struct ClipArgs {
    #[arg(long)]
    pub prompt: String,
    /// Start image; without one the previous clip's last frame is used.
    #[arg(long)]
    pub start_image: Option<String>,
    /// Transition into the next clip: none, fade, interpolate or redirect.
    #[arg(long, default_value_t = TransitionKind::None)]
    pub transition: TransitionKind,
    /// Fade length in seconds.
    #[arg(long, default_value_t = 0.0)]
    pub transition_secs: f64,
    #[arg(long, default_value_t = 0)]
    pub add_frames: u32,
    #[arg(long, default_value_t = 0)]
    pub drop_first: u32,
    #[arg(long, default_value_t = 0)]
    pub drop_last: u32,
    #[arg(long, default_value_t = 1.0)]
    pub speed: f64,
    #[arg(long)]
    pub seed: Option<i64>,
    /// LoRA as `name` or `name:strength`; repeat for more slots.
    #[arg(long = "lora", value_parser = parse_lora)]
    pub loras: Vec<LoraSlot>,
}

impl From<ClipArgs> for CreateClipJob {
    fn from(args: ClipArgs) -> Self {
        Self {
            prompt: args.prompt,
            start_image: args.start_image,
            transition: args.transition,
            transition_secs: args.transition_secs,
            add_frames: args.add_frames,
            drop_first: args.drop_first,
            drop_last: args.drop_last,
            speed: args.speed,
            seed: args.seed,
            loras: args.loras,
        }
    }
}

fn parse_lora(value: &str) -> Result<LoraSlot, String> {
    let (name, strength) = match value.rsplit_once(':') {
        Some((name, strength)) => {
            let strength = strength
                .trim()
                .parse::<f64>()
                .map_err(|_| format!("invalid LoRA strength in '{value}'"))?;
            (name, strength)
        }
        None => (value, 1.0),
    };
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing LoRA name in '{value}'"));
    }
    Ok(LoraSlot {
        name: name.to_string(),
        strength,
    })
}

/// Apply one management command and return what to print.
pub async fn manage(
    jobs: &JobService,
    store: &dyn GenerationStore,
    command: ManageCommand,
) -> anyhow::Result<String> {
    match command {
        ManageCommand::Video(VideoCommand::New {
            source_image,
            width,
            height,
        }) => {
            let video = jobs
                .create_video(&CreateVideoJob {
                    source_image,
                    width,
                    height,
                })
                .await?;
            Ok(video.id.to_string())
        }
        ManageCommand::Video(VideoCommand::Show { video_id }) => show(store, video_id).await,
        ManageCommand::Clip(ClipCommand::Add { video_id, at, clip }) => {
            let input = CreateClipJob::from(clip);
            let clip = match at {
                Some(index) => jobs.insert_clip(video_id, index, &input).await?,
                None => jobs.add_clip(video_id, &input).await?,
            };
            Ok(format!("{} {}", clip.id, clip.order_index))
        }
        ManageCommand::Clip(ClipCommand::Delete { clip_id }) => {
            let removed = jobs.delete_clip(clip_id).await?;
            Ok(removed.id.to_string())
        }
        ManageCommand::Queue { video_id } => {
            let queued = jobs.queue_video(video_id).await?;
            Ok(queued.to_string())
        }
        ManageCommand::Requeue { clip_id, cascade } => {
            let ids = jobs.requeue_clip(clip_id, cascade).await?;
            Ok(ids
                .iter()
                .map(DbId::to_string)
                .collect::<Vec<_>>()
                .join(" "))
        }
    }
}

async fn show(store: &dyn GenerationStore, video_id: DbId) -> anyhow::Result<String> {
    let video = store
        .get_video(video_id)
        .await?
        .with_context(|| format!("Video {video_id} not found"))?;
    let clips = store.list_clips(video_id).await?;

    let mut out = format!(
        "video {} {} {}x{} {}",
        video.id, video.status, video.width, video.height, video.source_image
    );
    if let Some(output) = &video.output_path {
        let _ = write!(out, " -> {output}");
    }
    for clip in &clips {
        let _ = write!(
            out,
            "\n  [{}] clip {} {} {} {:?}",
            clip.order_index, clip.id, clip.status, clip.transition, clip.prompt
        );
    }
    Ok(out)
}
