use crate::ffmpeg::FfmpegEncoder;
use crate::wav::WavEncoder;
use audiofix_core::error::{FixtureError, Result};
use audiofix_core::format::{CodecParams, ContainerFormat};
use audiofix_core::signal::PcmBuffer;
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub type EncodeFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<u8>>> + Send + 'a>>;
pub type ProbeFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Input to a single encode: reference PCM plus opaque codec options
#[derive(Debug, Clone, Copy)]
pub struct EncodeRequest<'a> {
    pub pcm: &'a PcmBuffer,
    pub params: &'a CodecParams,
}

/// Capability interface for one container/codec family
///
/// Implementations hold no per-fixture state; every `encode` call is
/// independent, so fixtures can be encoded concurrently and in any order.
pub trait CodecEncoder: Send + Sync {
    fn format(&self) -> ContainerFormat;

    /// Backend name for logs
    fn name(&self) -> &str;

    /// Check the backend is usable in this environment
    ///
    /// Resolves to `MissingTool` when the capability is absent. Must finish
    /// in bounded time.
    fn probe(&self) -> ProbeFuture<'_>;

    /// Encode PCM into container bytes
    fn encode<'a>(&'a self, request: EncodeRequest<'a>) -> EncodeFuture<'a>;
}

/// Run an encode bounded by a timeout
///
/// A hung backend surfaces as `EncodingFailed`; dropping the backend future
/// is expected to release its resources (process backends kill the child).
pub async fn encode_with_timeout(
    encoder: &dyn CodecEncoder,
    request: EncodeRequest<'_>,
    timeout: Duration,
) -> Result<Vec<u8>> {
    let bytes = tokio::time::timeout(timeout, encoder.encode(request))
        .await
        .map_err(|_| {
            FixtureError::EncodingFailed(format!(
                "{} encoder timed out after {:.1}s",
                encoder.name(),
                timeout.as_secs_f64()
            ))
        })??;

    if bytes.is_empty() {
        return Err(FixtureError::EncodingFailed(format!(
            "{} encoder produced zero-byte output",
            encoder.name()
        )));
    }

    debug!("{} produced {} bytes", encoder.name(), bytes.len());
    Ok(bytes)
}

/// Encoders keyed by container format
#[derive(Clone, Default)]
pub struct EncoderRegistry {
    encoders: HashMap<ContainerFormat, Arc<dyn CodecEncoder>>,
}

impl EncoderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Native WAV plus FFmpeg for every other format
    pub fn with_defaults(ffmpeg_program: impl Into<PathBuf>) -> Self {
        let program = ffmpeg_program.into();
        let mut registry = Self::new();

        for format in ContainerFormat::ALL {
            match format {
                ContainerFormat::Wav => registry.register(Arc::new(WavEncoder)),
                _ => registry.register(Arc::new(FfmpegEncoder::new(format, program.clone()))),
            };
        }

        registry
    }

    /// Register an encoder, replacing any previous one for the same format
    pub fn register(&mut self, encoder: Arc<dyn CodecEncoder>) -> Option<Arc<dyn CodecEncoder>> {
        self.encoders.insert(encoder.format(), encoder)
    }

    pub fn get(&self, format: ContainerFormat) -> Result<Arc<dyn CodecEncoder>> {
        self.encoders
            .get(&format)
            .cloned()
            .ok_or_else(|| FixtureError::missing_tool(format.extension(), "no encoder registered"))
    }

    /// Look up and probe the encoder for a format
    pub async fn probe(&self, format: ContainerFormat) -> Result<()> {
        self.get(format)?.probe().await
    }
}
