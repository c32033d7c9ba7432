//! FFmpeg/FFprobe command utilities and the production [`VideoTools`].
//!
//! Every operation shells out to the configured binaries through
//! [`tokio::process::Command`]. All encodes share [`ENCODE_ARGS`] so the
//! units produced for one stitch can be concatenated without re-encoding.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use crate::media::{BridgeSpec, CrossfadeSpec, RetimeSpec, VideoInfo, VideoTools};

/// Output encoding shared by every intermediate and final file.
pub const ENCODE_ARGS: &[&str] = &[
    "-c:v", "libx264", "-preset", "medium", "-crf", "17", "-pix_fmt", "yuv420p", "-an",
];

/// Upscale factor applied by the quality pass.
pub const ENHANCE_SCALE: u32 = 2;

/// Error type for FFmpeg/FFprobe operations.
#[derive(Debug, thiserror::Error)]
pub enum FfmpegError {
    #[error("ffprobe/ffmpeg binary not found: {0}")]
    NotFound(std::io::Error),

    #[error("ffprobe/ffmpeg execution failed (exit code {exit_code:?}): {stderr}")]
    ExecutionFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("failed to parse ffprobe output: {0}")]
    ParseError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("video file not found: {0}")]
    VideoNotFound(String),

    #[error("ffmpeg produced no output at {0}")]
    NoOutput(String),

    #[error("invalid media operation: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// ffprobe JSON output structures
// ---------------------------------------------------------------------------

/// Top-level ffprobe JSON output (`-print_format json -show_format -show_streams`).
#[derive(Debug, Deserialize)]
pub struct FfprobeOutput {
    pub streams: Vec<FfprobeStream>,
    pub format: FfprobeFormat,
}

/// A single stream from ffprobe output.
#[derive(Debug, Deserialize)]
pub struct FfprobeStream {
    pub codec_type: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// e.g. "16/1" or "24000/1001"
    pub r_frame_rate: Option<String>,
    pub duration: Option<String>,
    pub nb_frames: Option<String>,
}

/// Format-level metadata from ffprobe.
#[derive(Debug, Deserialize)]
pub struct FfprobeFormat {
    pub duration: Option<String>,
}

// ---------------------------------------------------------------------------
// FfmpegTools
// ---------------------------------------------------------------------------

/// [`VideoTools`] backed by the `ffmpeg` and `ffprobe` executables.
#[derive(Debug, Clone)]
pub struct FfmpegTools {
    ffmpeg: String,
    ffprobe: String,
}

impl Default for FfmpegTools {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

impl FfmpegTools {
    /// Use explicit binary names or paths.
    pub fn new(ffmpeg: impl Into<String>, ffprobe: impl Into<String>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    fn ffmpeg(&self) -> Command {
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.args(["-hide_banner", "-loglevel", "error", "-y"]);
        cmd
    }

    /// Run an ffmpeg command and require `output` to exist afterwards.
    async fn run(&self, mut cmd: Command, output: &Path) -> Result<(), FfmpegError> {
        let result = cmd.output().await.map_err(FfmpegError::NotFound)?;
        if !result.status.success() {
            return Err(FfmpegError::ExecutionFailed {
                exit_code: result.status.code(),
                stderr: String::from_utf8_lossy(&result.stderr).to_string(),
            });
        }
        if !output.exists() {
            return Err(FfmpegError::NoOutput(output.to_string_lossy().to_string()));
        }
        Ok(())
    }

    /// Run `ffprobe` on a video file and return the parsed JSON output.
    pub async fn probe_raw(&self, path: &Path) -> Result<FfprobeOutput, FfmpegError> {
        ensure_exists(path)?;

        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path)
            .output()
            .await
            .map_err(FfmpegError::NotFound)?;

        if !output.status.success() {
            return Err(FfmpegError::ExecutionFailed {
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        serde_json::from_str::<FfprobeOutput>(&stdout)
            .map_err(|e| FfmpegError::ParseError(format!("{e}: {stdout}")))
    }
}

#[async_trait]
impl VideoTools for FfmpegTools {
    async fn probe(&self, video: &Path) -> Result<VideoInfo, FfmpegError> {
        let probe = self.probe_raw(video).await?;
        let (width, height) = parse_resolution(&probe);
        let fps = parse_framerate(&probe);
        let frame_count = parse_total_frames(&probe);
        let mut duration_secs = parse_duration(&probe);
        if duration_secs <= 0.0 && fps > 0.0 {
            duration_secs = frame_count as f64 / fps;
        }
        Ok(VideoInfo {
            width,
            height,
            fps,
            frame_count,
            duration_secs,
        })
    }

    async fn extract_last_frame(&self, video: &Path, output: &Path) -> Result<(), FfmpegError> {
        ensure_exists(video)?;
        let mut cmd = self.ffmpeg();
        cmd.args(["-sseof", "-1", "-i"])
            .arg(video)
            .args(["-update", "1", "-q:v", "1"])
            .arg(output);
        self.run(cmd, output).await
    }

    async fn extract_frames(
        &self,
        video: &Path,
        indices: &[u64],
        output_dir: &Path,
        prefix: &str,
    ) -> Result<Vec<PathBuf>, FfmpegError> {
        ensure_exists(video)?;
        tokio::fs::create_dir_all(output_dir).await?;

        let mut paths = Vec::with_capacity(indices.len());
        for (position, index) in indices.iter().enumerate() {
            let output = output_dir.join(format!("{prefix}_{position:03}.png"));
            let mut cmd = self.ffmpeg();
            cmd.arg("-i")
                .arg(video)
                .args(["-vf", &select_frame_filter(*index), "-vsync", "0", "-frames:v", "1"])
                .arg(&output);
            self.run(cmd, &output).await?;
            paths.push(output);
        }
        Ok(paths)
    }

    async fn trim(
        &self,
        video: &Path,
        drop_first: u64,
        drop_last: u64,
        output: &Path,
    ) -> Result<(), FfmpegError> {
        let info = self.probe(video).await?;
        let end = info
            .frame_count
            .checked_sub(drop_last)
            .filter(|end| *end > drop_first)
            .ok_or_else(|| {
                FfmpegError::Invalid(format!(
                    "cannot drop {drop_first}+{drop_last} frames from {} frames",
                    info.frame_count
                ))
            })?;

        let mut cmd = self.ffmpeg();
        cmd.arg("-i")
            .arg(video)
            .args(["-vf", &trim_filter(drop_first, end)])
            .args(ENCODE_ARGS)
            .arg(output);
        self.run(cmd, output).await
    }

    async fn crossfade(
        &self,
        prev: &Path,
        next: &Path,
        spec: &CrossfadeSpec,
        output: &Path,
    ) -> Result<(), FfmpegError> {
        ensure_exists(prev)?;
        ensure_exists(next)?;
        let mut cmd = self.ffmpeg();
        cmd.arg("-i")
            .arg(prev)
            .arg("-i")
            .arg(next)
            .args(["-filter_complex", &crossfade_filter(spec), "-map", "[v]"])
            .args(["-r", &spec.fps.to_string()])
            .args(ENCODE_ARGS)
            .arg(output);
        self.run(cmd, output).await
    }

    async fn interpolate_frames(
        &self,
        frames: &[PathBuf],
        spec: &BridgeSpec,
        output: &Path,
    ) -> Result<(), FfmpegError> {
        if frames.len() < 2 {
            return Err(FfmpegError::Invalid(format!(
                "interpolation needs at least 2 frames, got {}",
                frames.len()
            )));
        }
        for frame in frames {
            ensure_exists(frame)?;
        }

        let list_path = output.with_extension("frames.txt");
        tokio::fs::write(&list_path, image_sequence_list(frames, spec.input_fps)).await?;

        let mut cmd = self.ffmpeg();
        cmd.args(["-f", "concat", "-safe", "0", "-i"])
            .arg(&list_path)
            .args(["-vf", &bridge_filter(spec)])
            .args(["-r", &spec.output_fps.to_string()])
            .args(ENCODE_ARGS)
            .arg(output);
        let result = self.run(cmd, output).await;

        let _ = tokio::fs::remove_file(&list_path).await;
        result
    }

    async fn enhance(
        &self,
        video: &Path,
        target_fps: f64,
        output: &Path,
    ) -> Result<(), FfmpegError> {
        ensure_exists(video)?;
        let mut cmd = self.ffmpeg();
        cmd.arg("-i")
            .arg(video)
            .args(["-vf", &enhance_filter(target_fps)])
            .args(["-r", &target_fps.to_string()])
            .args(ENCODE_ARGS)
            .arg(output);
        self.run(cmd, output).await
    }

    async fn retime(
        &self,
        video: &Path,
        spec: &RetimeSpec,
        output: &Path,
    ) -> Result<(), FfmpegError> {
        ensure_exists(video)?;
        let mut cmd = self.ffmpeg();
        cmd.arg("-i")
            .arg(video)
            .args(["-vf", &retime_filter(spec)])
            .args(["-r", &spec.target_fps.to_string()])
            .args(ENCODE_ARGS)
            .arg(output);
        self.run(cmd, output).await
    }

    async fn concat(&self, inputs: &[PathBuf], output: &Path) -> Result<(), FfmpegError> {
        if inputs.is_empty() {
            return Err(FfmpegError::Invalid("nothing to concatenate".into()));
        }
        for input in inputs {
            ensure_exists(input)?;
        }

        let list_path = output.with_extension("concat.txt");
        tokio::fs::write(&list_path, concat_list(inputs)).await?;

        let mut cmd = self.ffmpeg();
        cmd.args(["-f", "concat", "-safe", "0", "-i"])
            .arg(&list_path)
            .args(["-c", "copy"])
            .arg(output);
        let result = self.run(cmd, output).await;

        let _ = tokio::fs::remove_file(&list_path).await;
        result
    }
}

fn ensure_exists(path: &Path) -> Result<(), FfmpegError> {
    if !path.exists() {
        return Err(FfmpegError::VideoNotFound(
            path.to_string_lossy().to_string(),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Filter and list builders
// ---------------------------------------------------------------------------

const MINTERPOLATE_OPTS: &str = "mi_mode=mci:mc_mode=aobmc:vsbmc=1";
const NORMALIZE_TAIL: &str = "setsar=1,format=yuv420p";

/// Select exactly one frame by index.
pub fn select_frame_filter(index: u64) -> String {
    format!("select=eq(n\\,{index})")
}

/// Keep frames `[start, end)` and restart timestamps at zero.
pub fn trim_filter(start: u64, end: u64) -> String {
    format!("trim=start_frame={start}:end_frame={end},setpts=PTS-STARTPTS")
}

/// Two-input cross-fade graph producing `[v]`.
pub fn crossfade_filter(spec: &CrossfadeSpec) -> String {
    let prepare = |input: usize, start: f64, label: &str| {
        format!(
            "[{input}:v]trim=start={start:.6}:duration={d:.6},setpts=PTS-STARTPTS,\
             fps={fps},scale={w}:{h},{NORMALIZE_TAIL}[{label}]",
            d = spec.duration_secs,
            fps = spec.fps,
            w = spec.width,
            h = spec.height,
        )
    };
    format!(
        "{};{};[a][b]xfade=transition=fade:duration={:.6}:offset=0,format=yuv420p[v]",
        prepare(0, spec.prev_start_secs, "a"),
        prepare(1, spec.next_start_secs, "b"),
        spec.duration_secs,
    )
}

/// Constant-rate layout, motion interpolation, then the kept window.
pub fn bridge_filter(spec: &BridgeSpec) -> String {
    format!(
        "fps={},minterpolate=fps={}:{MINTERPOLATE_OPTS},{},scale={}:{},{NORMALIZE_TAIL}",
        spec.input_fps,
        spec.output_fps,
        trim_filter(spec.keep_start, spec.keep_start + spec.keep_frames),
        spec.width,
        spec.height,
    )
}

/// Upscale by [`ENHANCE_SCALE`] and interpolate to `target_fps`.
pub fn enhance_filter(target_fps: f64) -> String {
    format!(
        "scale=iw*{ENHANCE_SCALE}:ih*{ENHANCE_SCALE}:flags=lanczos,\
         minterpolate=fps={target_fps}:{MINTERPOLATE_OPTS},{NORMALIZE_TAIL}"
    )
}

/// Speed change by timestamp scaling, then interpolation or down-sampling
/// to the target rate, then size normalization.
pub fn retime_filter(spec: &RetimeSpec) -> String {
    let rate = if spec.needs_interpolation() {
        format!("minterpolate=fps={}:{MINTERPOLATE_OPTS}", spec.target_fps)
    } else {
        format!("fps={}", spec.target_fps)
    };
    format!(
        "setpts=PTS/{},{rate},scale={}:{}:flags=lanczos,{NORMALIZE_TAIL}",
        spec.speed, spec.width, spec.height
    )
}

/// Quote a path for an ffconcat `file` directive.
fn concat_entry(path: &Path) -> String {
    format!("file '{}'", path.to_string_lossy().replace('\'', "'\\''"))
}

/// Concat-demuxer manifest joining `inputs` in order.
pub fn concat_list(inputs: &[PathBuf]) -> String {
    let mut list = String::from("ffconcat version 1.0\n");
    for input in inputs {
        list.push_str(&concat_entry(input));
        list.push('\n');
    }
    list
}

/// Concat-demuxer manifest showing each still for one frame at `fps`.
///
/// The last image is listed twice so its duration is honoured.
pub fn image_sequence_list(frames: &[PathBuf], fps: f64) -> String {
    let duration = if fps > 0.0 { 1.0 / fps } else { 1.0 };
    let mut list = String::from("ffconcat version 1.0\n");
    for frame in frames {
        list.push_str(&concat_entry(frame));
        list.push_str(&format!("\nduration {duration:.6}\n"));
    }
    if let Some(last) = frames.last() {
        list.push_str(&concat_entry(last));
        list.push('\n');
    }
    list
}

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

/// Find the first video stream in the ffprobe output.
fn first_video_stream(probe: &FfprobeOutput) -> Option<&FfprobeStream> {
    probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
}

/// Parse the video duration in seconds from ffprobe output.
pub fn parse_duration(probe: &FfprobeOutput) -> f64 {
    // Try format-level duration first.
    if let Some(secs) = probe
        .format
        .duration
        .as_deref()
        .and_then(|d| d.parse::<f64>().ok())
    {
        return secs;
    }
    first_video_stream(probe)
        .and_then(|s| s.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0)
}

/// Parse the video framerate from ffprobe output.
///
/// The `r_frame_rate` field is a fraction like `"16/1"` or `"24000/1001"`.
pub fn parse_framerate(probe: &FfprobeOutput) -> f64 {
    first_video_stream(probe)
        .and_then(|s| s.r_frame_rate.as_deref())
        .map(parse_fraction)
        .unwrap_or(0.0)
}

/// Parse a fraction string like `"30/1"` into a float.
fn parse_fraction(s: &str) -> f64 {
    match s.split_once('/') {
        Some((num, den)) => {
            let num = num.parse::<f64>().unwrap_or(0.0);
            let den = den.parse::<f64>().unwrap_or(1.0);
            if den > 0.0 {
                num / den
            } else {
                0.0
            }
        }
        None => s.parse::<f64>().unwrap_or(0.0),
    }
}

/// Count total frames from ffprobe output, estimating from
/// `round(duration * fps)` when the container does not record it.
pub fn parse_total_frames(probe: &FfprobeOutput) -> u64 {
    if let Some(n) = first_video_stream(probe)
        .and_then(|s| s.nb_frames.as_deref())
        .and_then(|nb| nb.parse::<u64>().ok())
    {
        return n;
    }
    crate::frames::frame_count(parse_duration(probe), parse_framerate(probe))
}

/// Find the first video stream's resolution.
pub fn parse_resolution(probe: &FfprobeOutput) -> (u32, u32) {
    first_video_stream(probe)
        .map(|s| (s.width.unwrap_or(0), s.height.unwrap_or(0)))
        .unwrap_or((0, 0))
}
