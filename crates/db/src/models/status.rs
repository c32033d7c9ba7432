//! Job status shared by video and clip records.
//!
//! A clip moves `Queue -> Queuing -> Queued -> Generating -> {Generated | Failed}`
//! and may be re-queued from either terminal state. A video's status is the
//! aggregate of its clips, except while it is being exported.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    /// Created, not yet submitted for generation.
    Queue,
    /// Being prepared for the queue.
    Queuing,
    /// Eligible for the scheduler.
    Queued,
    Generating,
    Generated,
    Failed,
    Exporting,
    Exported,
    Unknown,
}

impl JobStatus {
    pub const ALL: [JobStatus; 9] = [
        JobStatus::Queue,
        JobStatus::Queuing,
        JobStatus::Queued,
        JobStatus::Generating,
        JobStatus::Generated,
        JobStatus::Failed,
        JobStatus::Exporting,
        JobStatus::Exported,
        JobStatus::Unknown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queue => "Queue",
            JobStatus::Queuing => "Queuing",
            JobStatus::Queued => "Queued",
            JobStatus::Generating => "Generating",
            JobStatus::Generated => "Generated",
            JobStatus::Failed => "Failed",
            JobStatus::Exporting => "Exporting",
            JobStatus::Exported => "Exported",
            JobStatus::Unknown => "Unknown",
        }
    }

    /// Whether a clip may move from `self` to `next`.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queue, Queuing)
                | (Queuing, Queued)
                | (Queued, Generating)
                | (Generating, Generated)
                | (Generating, Failed)
                | (Generated, Queuing)
                | (Failed, Queuing)
        )
    }

    /// `true` for states the scheduler will not touch again on its own.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Generated | JobStatus::Failed)
    }

    /// Aggregation priority; higher wins. `None` for unranked states.
    fn rank(self) -> Option<u8> {
        match self {
            JobStatus::Failed => Some(4),
            JobStatus::Generating => Some(3),
            JobStatus::Queued | JobStatus::Queuing => Some(2),
            JobStatus::Generated => Some(1),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("Unknown job status: '{s}'"))
    }
}

/// Aggregate clip statuses into a video status.
///
/// Priority is `Failed > Generating > Queued > Generated`, with `Queuing`
/// ranked as `Queued`. When no clip holds a ranked status the result is
/// `Queue` if every clip is `Queue`, otherwise `Unknown`.
pub fn aggregate_status<I>(statuses: I) -> JobStatus
where
    I: IntoIterator<Item = JobStatus>,
{
    let mut best: Option<(u8, JobStatus)> = None;
    let mut all_queue = true;
    let mut any = false;

    for status in statuses {
        any = true;
        all_queue &= status == JobStatus::Queue;
        if let Some(rank) = status.rank() {
            if best.map_or(true, |(r, _)| rank > r) {
                // Queuing reports as Queued.
                let shown = if status == JobStatus::Queuing {
                    JobStatus::Queued
                } else {
                    status
                };
                best = Some((rank, shown));
            }
        }
    }

    match best {
        Some((_, status)) => status,
        None if any && all_queue => JobStatus::Queue,
        None => JobStatus::Unknown,
    }
}
