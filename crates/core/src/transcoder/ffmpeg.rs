//! FFmpeg-based transcoder implementation.

use async_trait::async_trait;
use regex_lite::Regex;
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::capabilities::EncoderCapabilities;
use super::config::FfmpegConfig;
use super::error::{classify_stderr, TranscodeError};
use super::traits::Transcoder;
use super::types::{MediaInfo, Stage, StageProgress, TranscodeJob, TranscodeOutput};
use crate::profile::{fit_within, RateControl, VideoCodec};

/// Lines of ffmpeg stderr kept for diagnostics.
const STDERR_TAIL_LINES: usize = 40;

/// FFmpeg-based transcoder implementation.
pub struct FfmpegTranscoder {
    config: FfmpegConfig,
    capabilities: EncoderCapabilities,
}

impl FfmpegTranscoder {
    /// Creates a new transcoder with the given configuration.
    ///
    /// Encoder capabilities start undetected; use [`FfmpegTranscoder::detect`]
    /// to probe the local ffmpeg build.
    pub fn new(config: FfmpegConfig) -> Self {
        Self {
            config,
            capabilities: EncoderCapabilities::default(),
        }
    }

    /// Creates a transcoder with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(FfmpegConfig::default())
    }

    /// Creates a transcoder and detects the encoders ffmpeg was built with.
    pub async fn detect(config: FfmpegConfig) -> Self {
        let capabilities = EncoderCapabilities::detect(&config).await;
        info!(
            detected = capabilities.detected,
            codecs = ?capabilities.available_codecs(),
            "ffmpeg encoder capabilities"
        );
        Self {
            config,
            capabilities,
        }
    }

    /// Replaces the encoder capability set.
    pub fn with_capabilities(mut self, capabilities: EncoderCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Returns the detected encoder capabilities.
    pub fn capabilities(&self) -> &EncoderCapabilities {
        &self.capabilities
    }

    /// Returns the configuration.
    pub fn config(&self) -> &FfmpegConfig {
        &self.config
    }

    /// Output frame size for a job: the source fitted inside the profile box.
    fn output_size(job: &TranscodeJob) -> (u32, u32) {
        let source = job
            .source
            .as_ref()
            .and_then(|s| Some((s.video_width?, s.video_height?)));
        fit_within(source, job.profile.resolution.bounds())
    }

    /// Builds ffmpeg arguments for a transcode attempt.
    fn build_args(&self, job: &TranscodeJob, width: u32, height: u32) -> Vec<String> {
        let profile = &job.profile;

        // Display matrix side data is carried to the output, so frames are
        // scaled in coded orientation.
        let mut args = vec![
            "-hide_banner".to_string(),
            "-nostdin".to_string(),
            "-y".to_string(),
            "-loglevel".to_string(),
            self.config.log_level.clone(),
            "-noautorotate".to_string(),
            "-i".to_string(),
            job.input_path.to_string_lossy().to_string(),
            "-map".to_string(),
            "0:v:0".to_string(),
        ];

        if profile.audio_bitrate_kbps.is_some() {
            args.extend(["-map".to_string(), "0:a:0?".to_string()]);
        }

        args.extend([
            "-c:v".to_string(),
            profile.codec.ffmpeg_encoder().to_string(),
        ]);

        // Encoder tuning
        let tuning: &[&str] = match profile.codec {
            VideoCodec::H264 => &[
                "-preset", "medium", "-profile:v", "main", "-tune", "film", "-g", "60", "-bf", "2",
            ],
            VideoCodec::H265 => &["-preset", "medium", "-g", "60", "-bf", "2"],
            VideoCodec::Vp9 => &["-row-mt", "1", "-g", "60"],
            VideoCodec::Av1 => &["-cpu-used", "6", "-row-mt", "1", "-g", "60"],
            VideoCodec::Mpeg4 => &["-g", "12", "-bf", "0", "-qmin", "3", "-qmax", "31"],
        };
        args.extend(tuning.iter().map(|s| s.to_string()));

        if profile.codec == VideoCodec::H265 && profile.container.wants_faststart() {
            args.extend(["-tag:v".to_string(), "hvc1".to_string()]);
        }

        // Rate control
        match profile.rate_control() {
            RateControl::Crf(crf) => {
                args.extend(["-crf".to_string(), crf.to_string()]);
                if matches!(profile.codec, VideoCodec::Vp9 | VideoCodec::Av1) {
                    // Constant quality mode for libvpx/libaom
                    args.extend(["-b:v".to_string(), "0".to_string()]);
                }
            }
            RateControl::Bitrate(kbps) => {
                args.extend(["-b:v".to_string(), format!("{}k", kbps)]);
            }
        }

        args.extend([
            "-vf".to_string(),
            format!("scale={}:{}", width, height),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
        ]);

        if let Some(threads) = self.config.threads {
            args.extend(["-threads".to_string(), threads.to_string()]);
        }

        // Audio
        match profile.audio_bitrate_kbps {
            Some(kbps) => args.extend([
                "-c:a".to_string(),
                profile.container.audio_encoder().to_string(),
                "-b:a".to_string(),
                format!("{}k", kbps),
            ]),
            None => args.push("-an".to_string()),
        }
        args.extend(["-sn".to_string(), "-dn".to_string()]);

        if profile.container.wants_faststart() {
            args.extend(["-movflags".to_string(), "+faststart".to_string()]);
        }

        // Progress blocks on stdout
        args.extend([
            "-progress".to_string(),
            "pipe:1".to_string(),
            "-nostats".to_string(),
            "-stats_period".to_string(),
            format!("{:.3}", self.config.progress_interval_ms as f64 / 1000.0),
        ]);

        args.extend(self.config.extra_args.iter().cloned());

        // The output path has no meaningful extension, so the muxer is explicit.
        args.extend([
            "-f".to_string(),
            profile.container.ffmpeg_muxer().to_string(),
            job.output_path.to_string_lossy().to_string(),
        ]);

        args
    }

    /// Parses ffprobe JSON output into MediaInfo.
    fn parse_probe_output(
        path: &Path,
        output: &str,
        file_size: u64,
    ) -> Result<MediaInfo, TranscodeError> {
        #[derive(Deserialize)]
        struct ProbeOutput {
            format: ProbeFormat,
            #[serde(default)]
            streams: Vec<ProbeStream>,
        }

        #[derive(Deserialize)]
        struct ProbeFormat {
            format_name: String,
            duration: Option<String>,
            bit_rate: Option<String>,
            nb_streams: Option<u32>,
        }

        #[derive(Deserialize)]
        struct ProbeStream {
            codec_type: String,
            codec_name: Option<String>,
            width: Option<u32>,
            height: Option<u32>,
            avg_frame_rate: Option<String>,
            r_frame_rate: Option<String>,
            channels: Option<u8>,
            #[serde(default)]
            tags: HashMap<String, String>,
            #[serde(default)]
            side_data_list: Vec<SideData>,
        }

        #[derive(Deserialize)]
        struct SideData {
            rotation: Option<f64>,
        }

        let probe: ProbeOutput = serde_json::from_str(output).map_err(|e| {
            TranscodeError::codec(format!("Failed to parse ffprobe output: {}", e), None)
        })?;

        let video = probe.streams.iter().find(|s| s.codec_type == "video");
        let audio = probe.streams.iter().find(|s| s.codec_type == "audio");

        // Display matrix rotation is counter-clockwise, the legacy tag clockwise.
        let rotation = video
            .and_then(|s| {
                s.side_data_list
                    .iter()
                    .find_map(|d| d.rotation)
                    .map(|r| -(r.round() as i32))
                    .or_else(|| s.tags.get("rotate").and_then(|r| r.trim().parse::<i32>().ok()))
            })
            .unwrap_or(0)
            .rem_euclid(360);

        let format_name = probe
            .format
            .format_name
            .split(',')
            .next()
            .unwrap_or("unknown");

        Ok(MediaInfo {
            path: path.to_path_buf(),
            size_bytes: file_size,
            duration_secs: probe
                .format
                .duration
                .as_deref()
                .and_then(|d| d.parse::<f64>().ok())
                .unwrap_or(0.0),
            format: format_name.to_string(),
            bitrate_kbps: probe
                .format
                .bit_rate
                .as_deref()
                .and_then(|b| b.parse::<u64>().ok())
                .map(|b| (b / 1000) as u32),
            stream_count: probe
                .format
                .nb_streams
                .unwrap_or(probe.streams.len() as u32),
            video_codec: video.and_then(|s| s.codec_name.clone()),
            video_width: video.and_then(|s| s.width),
            video_height: video.and_then(|s| s.height),
            video_fps: video.and_then(|s| {
                s.avg_frame_rate
                    .as_deref()
                    .and_then(parse_frame_rate)
                    .or_else(|| s.r_frame_rate.as_deref().and_then(parse_frame_rate))
            }),
            rotation,
            audio_codec: audio.and_then(|s| s.codec_name.clone()),
            audio_channels: audio.and_then(|s| s.channels),
        })
    }

    async fn check_tool(path: &Path) -> Result<(), TranscodeError> {
        let output = Command::new(path)
            .arg("-version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| spawn_error(e, path))?;

        if !output.status.success() {
            return Err(TranscodeError::resource(format!(
                "{} -version exited with {:?}",
                path.display(),
                output.status.code()
            )));
        }
        Ok(())
    }
}

/// Parses a frame rate like "24000/1001" or "30".
fn parse_frame_rate(rate: &str) -> Option<f32> {
    match rate.split_once('/') {
        Some((num, den)) => {
            let num = num.parse::<f32>().ok()?;
            let den = den.parse::<f32>().ok()?;
            if den > 0.0 && num > 0.0 {
                Some(num / den)
            } else {
                None
            }
        }
        None => rate.parse::<f32>().ok().filter(|r| *r > 0.0),
    }
}

fn spawn_error(err: std::io::Error, tool: &Path) -> TranscodeError {
    if err.kind() == std::io::ErrorKind::NotFound {
        TranscodeError::ToolNotFound {
            path: tool.to_path_buf(),
        }
    } else {
        TranscodeError::resource(format!("failed to run {}: {}", tool.display(), err))
    }
}

/// Keeps the last lines written to a stream.
async fn collect_tail<R: AsyncRead + Unpin>(reader: R) -> String {
    let mut lines = BufReader::new(reader).lines();
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
    while let Ok(Some(line)) = lines.next_line().await {
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    Vec::from(tail).join("\n")
}

async fn terminate(child: &mut Child, job_id: &str) {
    if let Err(e) = child.kill().await {
        warn!(job_id = %job_id, error = %e, "Failed to kill ffmpeg");
    }
}

/// Accumulates `-progress` key/value lines into per-block updates.
pub(crate) struct ProgressParser {
    duration_us: Option<f64>,
    out_time_us: u64,
    frame: Option<u64>,
    speed: Option<f32>,
    speed_re: Option<Regex>,
}

impl ProgressParser {
    pub(crate) fn new(duration_secs: Option<f64>) -> Self {
        Self {
            duration_us: duration_secs.filter(|d| *d > 0.0).map(|d| d * 1_000_000.0),
            out_time_us: 0,
            frame: None,
            speed: None,
            speed_re: Regex::new(r"^\s*(\d+(?:\.\d+)?)x\s*$").ok(),
        }
    }

    /// Feeds one line; returns an update when a block closes.
    pub(crate) fn feed(&mut self, line: &str) -> Option<StageProgress> {
        let (key, value) = line.trim().split_once('=')?;
        let value = value.trim();

        match key {
            "frame" => self.frame = value.parse().ok(),
            // out_time_ms is also in microseconds
            "out_time_us" | "out_time_ms" => {
                if let Ok(us) = value.parse::<i64>() {
                    self.out_time_us = us.max(0) as u64;
                }
            }
            "speed" => {
                self.speed = self
                    .speed_re
                    .as_ref()
                    .and_then(|re| re.captures(value))
                    .and_then(|caps| caps.get(1))
                    .and_then(|m| m.as_str().parse::<f32>().ok());
            }
            "progress" => return Some(self.block(value == "end")),
            _ => {}
        }
        None
    }

    fn block(&self, finished: bool) -> StageProgress {
        let stage = if finished {
            Stage::Mux
        } else if self.frame.unwrap_or(0) == 0 {
            Stage::Decode
        } else {
            Stage::Encode
        };

        let percent = match (finished, self.duration_us) {
            (true, _) => 100.0,
            (false, Some(duration)) => ((self.out_time_us as f64 / duration) * 100.0).min(99.9) as f32,
            (false, None) => 0.0,
        };

        StageProgress {
            stage,
            percent,
            frame: self.frame,
            speed: self.speed,
        }
    }
}

enum Exit {
    Finished,
    Cancelled,
    TimedOut,
    ReadFailed(std::io::Error),
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    fn supports_codec(&self, codec: VideoCodec) -> bool {
        self.capabilities.supports(codec)
    }

    async fn probe(&self, path: &Path) -> Result<MediaInfo, TranscodeError> {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| TranscodeError::from_io(e, path))?;
        if !meta.is_file() {
            return Err(TranscodeError::resource(format!(
                "{} is not a regular file",
                path.display()
            )));
        }

        let output = Command::new(&self.config.ffprobe_path)
            .args([
                "-v",
                "error",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| spawn_error(e, &self.config.ffprobe_path))?;

        if !output.status.success() {
            return Err(classify_stderr(
                "ffprobe",
                &String::from_utf8_lossy(&output.stderr),
                output.status.code(),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Self::parse_probe_output(path, &stdout, meta.len())
    }

    async fn transcode(
        &self,
        job: TranscodeJob,
        progress_tx: mpsc::Sender<StageProgress>,
        cancel: CancellationToken,
    ) -> Result<TranscodeOutput, TranscodeError> {
        let codec = job.profile.codec;
        if !self.capabilities.supports(codec) {
            return Err(TranscodeError::codec(
                format!("encoder {} not available", codec.ffmpeg_encoder()),
                None,
            ));
        }

        let (width, height) = Self::output_size(&job);
        let args = self.build_args(&job, width, height);
        debug!(job_id = %job.job_id, args = ?args, "Starting ffmpeg");

        let mut child = Command::new(&self.config.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(e, &self.config.ffmpeg_path))?;

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            terminate(&mut child, &job.job_id).await;
            return Err(TranscodeError::resource("ffmpeg pipes not captured"));
        };
        let stderr_task = tokio::spawn(collect_tail(stderr));

        let mut lines = BufReader::new(stdout).lines();
        let mut parser = ProgressParser::new(job.source.as_ref().map(|s| s.duration_secs));

        let deadline = tokio::time::sleep(Duration::from_secs(self.config.timeout_secs));
        tokio::pin!(deadline);

        let exit = loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if let Some(update) = parser.feed(&line) {
                            // Non-blocking send
                            let _ = progress_tx.try_send(update);
                            if cancel.is_cancelled() {
                                break Exit::Cancelled;
                            }
                        }
                    }
                    Ok(None) => break Exit::Finished,
                    Err(e) => break Exit::ReadFailed(e),
                },
                _ = &mut deadline => break Exit::TimedOut,
            }
        };

        match exit {
            Exit::Finished => {}
            Exit::Cancelled => {
                terminate(&mut child, &job.job_id).await;
                info!(job_id = %job.job_id, "ffmpeg stopped on cancellation");
                return Err(TranscodeError::Cancelled);
            }
            Exit::TimedOut => {
                terminate(&mut child, &job.job_id).await;
                return Err(TranscodeError::Timeout {
                    timeout_secs: self.config.timeout_secs,
                });
            }
            Exit::ReadFailed(e) => {
                terminate(&mut child, &job.job_id).await;
                return Err(TranscodeError::transient(format!(
                    "reading ffmpeg progress: {}",
                    e
                )));
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| TranscodeError::resource(format!("waiting for ffmpeg: {}", e)))?;
        let stderr_tail = stderr_task.await.unwrap_or_default();

        if cancel.is_cancelled() {
            return Err(TranscodeError::Cancelled);
        }

        if !status.success() {
            return Err(classify_stderr("ffmpeg", &stderr_tail, status.code()));
        }

        let meta = tokio::fs::metadata(&job.output_path).await.map_err(|_| {
            TranscodeError::codec("Output file not created", Some(stderr_tail.clone()))
        })?;

        // Best effort: report what was actually written.
        let written = self.probe(&job.output_path).await.ok();
        let duration_secs = written
            .as_ref()
            .map(|w| w.duration_secs)
            .filter(|d| *d > 0.0)
            .or_else(|| job.source.as_ref().map(|s| s.duration_secs));

        Ok(TranscodeOutput {
            size_bytes: meta.len(),
            duration_secs,
            codec,
            width: written.as_ref().and_then(|w| w.video_width).unwrap_or(width),
            height: written.as_ref().and_then(|w| w.video_height).unwrap_or(height),
        })
    }

    async fn validate(&self) -> Result<(), TranscodeError> {
        Self::check_tool(&self.config.ffmpeg_path).await?;
        Self::check_tool(&self.config.ffprobe_path).await?;
        Ok(())
    }
}
