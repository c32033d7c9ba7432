//! One-job execution against the workflow backend.
//!
//! [`JobExecutionClient::execute`] uploads the job's input assets, fills the
//! workflow template, submits it, polls `/history` until the prompt reaches
//! a terminal state and moves the produced artifact into the caller's
//! output directory. Whatever the outcome, the backend's staging directory
//! is swept afterwards.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use clipchain_core::naming::unique_path;

use crate::api::{ComfyUIApi, ComfyUIApiError};
use crate::history::{parse_history, JobState, OutputFile};
use crate::template::{Substitutions, TemplateError, WorkflowTemplate};

/// Default `/history` poll interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Video extensions accepted as a job's produced artifact.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm", "mov", "mkv", "gif"];

/// Image extensions accepted when a job produced no video.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp"];

// ---------------------------------------------------------------------------
// Configuration and request types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    pub poll_interval: Duration,
    /// `None` polls until the backend reports a terminal state.
    pub poll_timeout: Option<Duration>,
    /// Backend output directory, when it shares this filesystem. Without
    /// it the artifact is downloaded through `/view`.
    pub backend_output_dir: Option<PathBuf>,
    /// Backend staging (input) directory to sweep after every job.
    pub backend_input_dir: Option<PathBuf>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            poll_timeout: None,
            backend_output_dir: None,
            backend_input_dir: None,
        }
    }
}

/// Everything needed to run one job.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub template: PathBuf,
    pub substitutions: Substitutions,
    /// Placeholder key -> local file; each is uploaded and the key is
    /// substituted with the backend handle.
    pub assets: Vec<(String, PathBuf)>,
    /// Directory the artifact is moved into.
    pub output_dir: PathBuf,
    /// Preferred file stem for the artifact; a numeric suffix is added on
    /// collision.
    pub output_stem: String,
}

#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub output: PathBuf,
    pub prompt_id: String,
    /// The filled workflow as submitted.
    pub workflow: serde_json::Value,
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Api(#[from] ComfyUIApiError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("Backend accepted the workflow but returned no prompt_id")]
    MissingPromptId,

    #[error("Prompt {prompt_id} still running after {waited:?}")]
    PollTimeout { prompt_id: String, waited: Duration },

    #[error("Prompt {prompt_id} completed but produced no output: {reason}")]
    NoOutput { prompt_id: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct JobExecutionClient {
    api: ComfyUIApi,
    config: ExecutionConfig,
    client_id: String,
}

impl JobExecutionClient {
    pub fn new(api: ComfyUIApi, config: ExecutionConfig) -> Self {
        Self {
            api,
            config,
            client_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Run one job.
    ///
    /// Returns `Ok(None)` when the backend reports an execution error.
    /// Upload, template, submission and output-resolution problems are
    /// errors. Polling is bounded only by `poll_timeout`.
    pub async fn execute(&self, request: &JobRequest) -> Result<Option<ExecutionResult>, ExecutionError> {
        let started = SystemTime::now();
        let result = self.run(request, started).await;
        self.sweep_staging(started).await;
        result
    }

    async fn run(
        &self,
        request: &JobRequest,
        started: SystemTime,
    ) -> Result<Option<ExecutionResult>, ExecutionError> {
        let template = WorkflowTemplate::load(&request.template).await?;

        let mut substitutions = request.substitutions.clone();
        for (key, path) in &request.assets {
            let uploaded = self.api.upload_image(path).await?;
            tracing::debug!(key = %key, path = %path.display(), handle = %uploaded.name, "Asset uploaded");
            substitutions.set_text(key, uploaded.name);
        }

        let workflow = template.fill(&substitutions)?;

        let submitted = self.api.submit_workflow(&workflow, &self.client_id).await?;
        let prompt_id = submitted
            .prompt_id
            .filter(|id| !id.is_empty())
            .ok_or(ExecutionError::MissingPromptId)?;
        tracing::info!(
            prompt_id = %prompt_id,
            api_url = self.api.api_url(),
            queue_position = ?submitted.number,
            "Workflow submitted",
        );

        let outputs = match self.wait_for_completion(&prompt_id).await? {
            Ok(outputs) => outputs,
            Err(message) => {
                tracing::warn!(prompt_id = %prompt_id, error = %message, "Backend reported execution error");
                return Ok(None);
            }
        };

        tokio::fs::create_dir_all(&request.output_dir).await?;
        let output = match &self.config.backend_output_dir {
            Some(dir) => harvest_from_dir(dir, request, &prompt_id, started).await?,
            None => self.download_output(&outputs, request, &prompt_id).await?,
        };
        tracing::info!(prompt_id = %prompt_id, output = %output.display(), "Job output resolved");

        Ok(Some(ExecutionResult {
            output,
            prompt_id,
            workflow,
        }))
    }

    /// Poll until the prompt completes (`Ok(outputs)`) or fails
    /// (`Err(message)`).
    async fn wait_for_completion(
        &self,
        prompt_id: &str,
    ) -> Result<Result<Vec<OutputFile>, String>, ExecutionError> {
        let begin = tokio::time::Instant::now();
        loop {
            let history = self.api.get_history(prompt_id).await?;
            match parse_history(&history, prompt_id) {
                JobState::Pending => {}
                JobState::Completed { outputs } => return Ok(Ok(outputs)),
                JobState::Failed { message } => return Ok(Err(message)),
            }

            if let Some(timeout) = self.config.poll_timeout {
                let waited = begin.elapsed();
                if waited >= timeout {
                    return Err(ExecutionError::PollTimeout {
                        prompt_id: prompt_id.to_string(),
                        waited,
                    });
                }
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Fetch the preferred output through `/view`.
    async fn download_output(
        &self,
        outputs: &[OutputFile],
        request: &JobRequest,
        prompt_id: &str,
    ) -> Result<PathBuf, ExecutionError> {
        let file = outputs
            .iter()
            .find(|f| f.kind == "output" && is_video(Path::new(&f.filename)))
            .or_else(|| outputs.iter().find(|f| f.kind == "output" && has_output_extension(Path::new(&f.filename))))
            .or_else(|| outputs.iter().find(|f| has_output_extension(Path::new(&f.filename))))
            .ok_or_else(|| ExecutionError::NoOutput {
                prompt_id: prompt_id.to_string(),
                reason: "history lists no output files".into(),
            })?;

        let bytes = self.api.view(&file.filename, &file.subfolder, &file.kind).await?;
        let target = unique_path(&request.output_dir, &request.output_stem, extension_of(&file.filename));
        tokio::fs::write(&target, bytes).await?;
        Ok(target)
    }

    /// Delete staging entries created at or before `started`.
    ///
    /// Best-effort: errors are logged and swallowed. Files written into the
    /// staging directory by another client before this job started are
    /// removed too.
    async fn sweep_staging(&self, started: SystemTime) {
        let Some(dir) = &self.config.backend_input_dir else {
            return;
        };
        match sweep_dir(dir, started).await {
            Ok(0) => {}
            Ok(removed) => tracing::debug!(dir = %dir.display(), removed, "Staging directory swept"),
            Err(e) => tracing::warn!(dir = %dir.display(), error = %e, "Staging sweep failed"),
        }
    }
}

// ---------------------------------------------------------------------------
// Filesystem helpers
// ---------------------------------------------------------------------------

fn lowercase_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}

fn is_video(path: &Path) -> bool {
    lowercase_extension(path).is_some_and(|e| VIDEO_EXTENSIONS.contains(&e.as_str()))
}

fn has_output_extension(path: &Path) -> bool {
    is_video(path)
        || lowercase_extension(path).is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.as_str()))
}

fn extension_of(filename: &str) -> &str {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
}

fn created_time(meta: &std::fs::Metadata) -> Option<SystemTime> {
    meta.created().or_else(|_| meta.modified()).ok()
}

/// Pick the newest artifact in the backend output directory (videos before
/// images), move it into the request's output directory and delete
/// same-stem sidecars.
async fn harvest_from_dir(
    dir: &Path,
    request: &JobRequest,
    prompt_id: &str,
    started: SystemTime,
) -> Result<PathBuf, ExecutionError> {
    let mut newest: Option<((bool, SystemTime), PathBuf)> = None;
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let meta = entry.metadata().await?;
        if !meta.is_file() || !has_output_extension(&path) {
            continue;
        }
        let Some(created) = created_time(&meta) else {
            continue;
        };
        let rank = (is_video(&path), created);
        if newest.as_ref().map_or(true, |(best, _)| rank > *best) {
            newest = Some((rank, path));
        }
    }

    let ((_, created), source) = newest.ok_or_else(|| ExecutionError::NoOutput {
        prompt_id: prompt_id.to_string(),
        reason: format!("no artifact in {}", dir.display()),
    })?;
    if created < started {
        tracing::warn!(
            prompt_id = %prompt_id,
            path = %source.display(),
            "Newest artifact predates the job; backend may have served a cached result",
        );
    }

    let ext = extension_of(&source.to_string_lossy()).to_string();
    let target = unique_path(&request.output_dir, &request.output_stem, &ext);
    move_file(&source, &target).await?;
    remove_sidecars(&source).await;
    Ok(target)
}

/// Rename, falling back to copy + delete across filesystems.
async fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    tokio::fs::copy(from, to).await?;
    tokio::fs::remove_file(from).await
}

/// Delete files next to `original` that share its stem (previews, metadata).
async fn remove_sidecars(original: &Path) {
    let (Some(dir), Some(stem)) = (original.parent(), original.file_stem()) else {
        return;
    };
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if path != original && path.file_stem() == Some(stem) {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                tracing::debug!(path = %path.display(), error = %e, "Failed to remove sidecar");
            }
        }
    }
}

/// Remove every entry of `dir` created at or before `cutoff`.
async fn sweep_dir(dir: &Path, cutoff: SystemTime) -> std::io::Result<usize> {
    let mut removed = 0;
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let Ok(meta) = entry.metadata().await else {
            continue;
        };
        if !created_time(&meta).is_some_and(|t| t <= cutoff) {
            continue;
        }
        let result = if meta.is_dir() {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        match result {
            Ok(()) => removed += 1,
            Err(e) => tracing::debug!(path = %path.display(), error = %e, "Failed to sweep entry"),
        }
    }
    Ok(removed)
}
