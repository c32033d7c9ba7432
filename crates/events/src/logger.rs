//! Background status subscriber.
//!
//! [`StatusLogger`] logs every [`StatusEvent`] and, when a journal path is
//! given, appends it as one JSON line. It shuts down when the bus is dropped.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;

use crate::bus::StatusEvent;

pub struct StatusLogger;

impl StatusLogger {
    /// Run the logging loop until the channel closes.
    pub async fn run(mut receiver: broadcast::Receiver<StatusEvent>, journal: Option<PathBuf>) {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    log_event(&event);
                    if let Some(path) = &journal {
                        if let Err(e) = append(path, &event).await {
                            tracing::error!(
                                error = %e,
                                path = %path.display(),
                                "Failed to append status event to journal"
                            );
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Status logger lagged, some events were not logged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("Event bus closed, status logger shutting down");
                    break;
                }
            }
        }
    }
}

fn log_event(event: &StatusEvent) {
    match event {
        StatusEvent::ClipStatusChanged {
            clip_id,
            video_id,
            status,
            ..
        } => tracing::info!(clip_id, video_id, status = %status, "Clip status changed"),
        StatusEvent::VideoStatusChanged {
            video_id, status, ..
        } => tracing::info!(video_id, status = %status, "Video status changed"),
        StatusEvent::ClipDeleted {
            clip_id, video_id, ..
        } => tracing::info!(clip_id, video_id, "Clip deleted"),
        StatusEvent::VideoDeleted { video_id, .. } => tracing::info!(video_id, "Video deleted"),
    }
}

async fn append(path: &Path, event: &StatusEvent) -> std::io::Result<()> {
    let mut line = serde_json::to_string(event).map_err(std::io::Error::other)?;
    line.push('\n');
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await
}
