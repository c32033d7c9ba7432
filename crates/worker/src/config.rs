use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clipchain_comfyui::ExecutionConfig;
use clipchain_core::error::CoreError;
use clipchain_pipeline::GenerationDefaults;

/// Worker configuration loaded from environment variables.
///
/// Every field has a default suitable for a local backend on the same host.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    /// Workflow backend base URL.
    pub api_url: String,
    /// Backend output directory when it is shared with this host.
    pub backend_output_dir: Option<PathBuf>,
    /// Backend input directory swept after every job.
    pub backend_input_dir: Option<PathBuf>,
    pub poll_interval: Duration,
    /// `None` polls until the backend reports a terminal state.
    pub poll_timeout: Option<Duration>,
    pub workflow_template: PathBuf,
    /// Root of the per-video working directories.
    pub data_dir: PathBuf,
    /// JSON snapshot backing the record store.
    pub store_file: PathBuf,
    /// JSON-lines journal of status events, if any.
    pub event_journal: Option<PathBuf>,
    pub negative_prompt: String,
    pub steps: u32,
    pub cfg: f64,
    pub wrap_around: bool,
    pub ffmpeg_bin: String,
    pub ffprobe_bin: String,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                     | Default                          |
    /// |-----------------------------|----------------------------------|
    /// | `COMFYUI_API_URL`           | `http://127.0.0.1:8188`          |
    /// | `COMFYUI_OUTPUT_DIR`        | unset (download via `/view`)     |
    /// | `COMFYUI_INPUT_DIR`         | unset (no sweep)                 |
    /// | `COMFYUI_POLL_INTERVAL_MS`  | `1000`                           |
    /// | `COMFYUI_POLL_TIMEOUT_SECS` | unset (poll indefinitely)        |
    /// | `WORKFLOW_TEMPLATE`         | `workflows/image_to_video.json`  |
    /// | `CLIPCHAIN_DATA_DIR`        | `./data`                         |
    /// | `CLIPCHAIN_STORE_FILE`      | `<data dir>/store.json`          |
    /// | `CLIPCHAIN_EVENT_JOURNAL`   | unset                            |
    /// | `NEGATIVE_PROMPT`           | [`DEFAULT_NEGATIVE_PROMPT`]      |
    /// | `SAMPLER_STEPS`             | `20`                             |
    /// | `CFG_SCALE`                 | `6.0`                            |
    /// | `STITCH_WRAP_AROUND`        | `false`                          |
    /// | `FFMPEG_BIN`                | `ffmpeg`                         |
    /// | `FFPROBE_BIN`               | `ffprobe`                        |
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let path = |key: &str| var(key).map(PathBuf::from);

        let data_dir = path("CLIPCHAIN_DATA_DIR").unwrap_or_else(|| PathBuf::from("./data"));
        let store_file = path("CLIPCHAIN_STORE_FILE").unwrap_or_else(|| data_dir.join("store.json"));

        let poll_interval_ms: u64 = parse(var("COMFYUI_POLL_INTERVAL_MS"), "COMFYUI_POLL_INTERVAL_MS")?
            .unwrap_or(1000);
        let poll_timeout_secs: Option<u64> =
            parse(var("COMFYUI_POLL_TIMEOUT_SECS"), "COMFYUI_POLL_TIMEOUT_SECS")?;

        let steps: u32 = parse(var("SAMPLER_STEPS"), "SAMPLER_STEPS")?.unwrap_or(20);
        let cfg: f64 = parse(var("CFG_SCALE"), "CFG_SCALE")?.unwrap_or(6.0);
        if steps == 0 {
            return Err(CoreError::Config("SAMPLER_STEPS must be at least 1".into()));
        }
        if !cfg.is_finite() || cfg <= 0.0 {
            return Err(CoreError::Config(format!("CFG_SCALE must be positive, got {cfg}")));
        }

        Ok(Self {
            api_url: var("COMFYUI_API_URL").unwrap_or_else(|| "http://127.0.0.1:8188".into()),
            backend_output_dir: path("COMFYUI_OUTPUT_DIR"),
            backend_input_dir: path("COMFYUI_INPUT_DIR"),
            poll_interval: Duration::from_millis(poll_interval_ms.max(1)),
            poll_timeout: poll_timeout_secs.map(Duration::from_secs),
            workflow_template: path("WORKFLOW_TEMPLATE")
                .unwrap_or_else(|| PathBuf::from("workflows/image_to_video.json")),
            data_dir,
            store_file,
            event_journal: path("CLIPCHAIN_EVENT_JOURNAL"),
            negative_prompt: var("NEGATIVE_PROMPT").unwrap_or_else(|| DEFAULT_NEGATIVE_PROMPT.into()),
            steps,
            cfg,
            wrap_around: parse_flag(var("STITCH_WRAP_AROUND"), "STITCH_WRAP_AROUND")?.unwrap_or(false),
            ffmpeg_bin: var("FFMPEG_BIN").unwrap_or_else(|| "ffmpeg".into()),
            ffprobe_bin: var("FFPROBE_BIN").unwrap_or_else(|| "ffprobe".into()),
        })
    }

    pub fn execution(&self) -> ExecutionConfig {
        ExecutionConfig {
            poll_interval: self.poll_interval,
            poll_timeout: self.poll_timeout,
            backend_output_dir: self.backend_output_dir.clone(),
            backend_input_dir: self.backend_input_dir.clone(),
        }
    }

    pub fn generation_defaults(&self) -> GenerationDefaults {
        GenerationDefaults {
            negative_prompt: self.negative_prompt.clone(),
            steps: self.steps,
            cfg: self.cfg,
        }
    }
}

pub const DEFAULT_NEGATIVE_PROMPT: &str =
    "blurry, low quality, distorted, deformed, watermark, text, static frame";

fn parse<T: FromStr>(value: Option<String>, key: &str) -> Result<Option<T>, CoreError> {
    value
        .map(|v| {
            v.trim()
                .parse::<T>()
                .map_err(|_| CoreError::Config(format!("{key} has an invalid value: '{v}'")))
        })
        .transpose()
}

fn parse_flag(value: Option<String>, key: &str) -> Result<Option<bool>, CoreError> {
    value
        .map(|v| match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(CoreError::Config(format!("{key} must be a boolean, got '{v}'"))),
        })
        .transpose()
}
