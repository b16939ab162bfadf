use crate::encoder::{CodecEncoder, EncodeFuture, EncodeRequest, ProbeFuture};
use audiofix_core::error::{FixtureError, Result};
use audiofix_core::format::{CodecParams, ContainerFormat};
use audiofix_core::signal::PcmBuffer;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Upper bound on `ffmpeg -encoders`
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Encoder backed by an external `ffmpeg` binary
///
/// Raw little-endian PCM is streamed over stdin and the encoded file is
/// written to a scratch directory, then read back into memory. Container
/// metadata is stripped and bitexact flags are set so that identical input
/// and params produce identical output for a given FFmpeg build.
pub struct FfmpegEncoder {
    format: ContainerFormat,
    program: PathBuf,
    probe_timeout: Duration,
}

impl FfmpegEncoder {
    pub fn new(format: ContainerFormat, program: impl Into<PathBuf>) -> Self {
        Self {
            format,
            program: program.into(),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    fn codec_for(&self, pcm: &PcmBuffer) -> &'static str {
        match (self.format, pcm.bit_depth) {
            (ContainerFormat::Wav, 24) => "pcm_s24le",
            (format, _) => format.codec(),
        }
    }

    /// Arguments up to (not including) the output path
    pub fn build_args(&self, pcm: &PcmBuffer, params: &CodecParams) -> Vec<String> {
        let raw_format = if pcm.bit_depth == 24 { "s24le" } else { "s16le" };

        let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error", "-y", "-f", raw_format]
            .map(String::from)
            .to_vec();
        args.extend([
            "-ar".to_string(),
            pcm.sample_rate.to_string(),
            "-ac".to_string(),
            pcm.channels.to_string(),
        ]);
        args.extend(
            [
                "-i",
                "pipe:0",
                "-map_metadata",
                "-1",
                "-fflags",
                "+bitexact",
                "-flags:a",
                "+bitexact",
                "-codec:a",
                self.codec_for(pcm),
            ]
            .map(String::from),
        );

        if self.format == ContainerFormat::Flac {
            if pcm.bit_depth == 24 {
                args.extend(["-sample_fmt", "s32", "-bits_per_raw_sample", "24"].map(String::from));
            } else {
                args.extend(["-sample_fmt", "s16"].map(String::from));
            }
        }

        for (key, value) in params {
            args.push(format!("-{key}"));
            args.push(value.clone());
        }

        args
    }

    async fn run(&self, pcm: &PcmBuffer, params: &CodecParams) -> Result<Vec<u8>> {
        let scratch = tempfile::Builder::new().prefix("audiofix-ffmpeg").tempdir()?;
        let output_path = scratch.path().join(format!("out.{}", self.format.extension()));
        let args = self.build_args(pcm, params);

        debug!("Running {} {}", self.program.display(), args.join(" "));

        let mut child = Command::new(&self.program)
            .args(&args)
            .arg(&output_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| FixtureError::EncodingFailed("ffmpeg stdin unavailable".to_string()))?;
        let input = pcm.to_le_bytes();

        let feed = async move {
            let result = stdin.write_all(&input).await;
            drop(stdin);
            result
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());

        let output = output.map_err(|e| {
            FixtureError::EncodingFailed(format!("failed to wait for ffmpeg: {e}"))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FixtureError::EncodingFailed(format!(
                "ffmpeg {} exited with {}: {}",
                self.codec_for(pcm),
                output.status,
                stderr.trim()
            )));
        }

        if let Err(e) = fed {
            // ffmpeg exited cleanly but did not consume all input
            warn!("ffmpeg closed stdin early: {}", e);
            return Err(FixtureError::EncodingFailed(format!(
                "ffmpeg did not read all PCM input: {e}"
            )));
        }

        let bytes = tokio::fs::read(&output_path).await.map_err(|e| {
            FixtureError::EncodingFailed(format!("ffmpeg produced no readable output: {e}"))
        })?;

        Ok(bytes)
    }

    async fn list_encoders(&self) -> Result<()> {
        let listing = Command::new(&self.program)
            .args(["-hide_banner", "-encoders"])
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.probe_timeout, listing)
            .await
            .map_err(|_| {
                FixtureError::missing_tool(
                    self.format.family(),
                    format!(
                        "{} -encoders timed out after {:.1}s",
                        self.program.display(),
                        self.probe_timeout.as_secs_f64()
                    ),
                )
            })?
            .map_err(|e| self.spawn_error(e))?;

        if !output.status.success() {
            return Err(FixtureError::missing_tool(
                self.format.family(),
                format!("{} -encoders exited with {}", self.program.display(), output.status),
            ));
        }

        let listing = String::from_utf8_lossy(&output.stdout);
        if lists_encoder(&listing, self.format.codec()) {
            Ok(())
        } else {
            Err(FixtureError::missing_tool(
                self.format.family(),
                format!("ffmpeg build lacks the {} encoder", self.format.codec()),
            ))
        }
    }

    fn spawn_error(&self, e: std::io::Error) -> FixtureError {
        if e.kind() == std::io::ErrorKind::NotFound {
            FixtureError::missing_tool(
                self.format.family(),
                format!("{} not found", self.program.display()),
            )
        } else {
            FixtureError::EncodingFailed(format!(
                "failed to start {}: {e}",
                self.program.display()
            ))
        }
    }
}

impl CodecEncoder for FfmpegEncoder {
    fn format(&self) -> ContainerFormat {
        self.format
    }

    fn name(&self) -> &str {
        self.format.codec()
    }

    fn probe(&self) -> ProbeFuture<'_> {
        Box::pin(self.list_encoders())
    }

    fn encode<'a>(&'a self, request: EncodeRequest<'a>) -> EncodeFuture<'a> {
        Box::pin(self.run(request.pcm, request.params))
    }
}

/// Whether `ffmpeg -encoders` output lists an encoder by name
///
/// Lines look like ` A....D libmp3lame  libmp3lame MP3 (MPEG audio layer 3)`.
fn lists_encoder(listing: &str, codec: &str) -> bool {
    listing
        .lines()
        .any(|line| line.split_whitespace().nth(1) == Some(codec))
}
