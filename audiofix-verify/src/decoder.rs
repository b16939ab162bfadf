use audiofix_core::error::{FixtureError, Result};
use std::io::Cursor;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

/// Fully decoded stream as interleaved full-scale `i32` samples
///
/// Integer sources are left-justified into 32 bits, so a 16-bit sample `s`
/// appears as `s << 16`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedAudio {
    pub sample_rate: u32,
    pub channels: u16,
    /// Bit depth declared by the container, when it states one
    pub bits_per_sample: Option<u32>,
    pub samples: Vec<i32>,
    /// Packets the decoder rejected and skipped
    pub decode_errors: usize,
}

impl DecodedAudio {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }

    /// Samples normalized to [-1.0, 1.0]
    pub fn normalized(&self) -> Vec<f32> {
        self.samples
            .iter()
            .map(|&s| (s as f64 / i32::MAX as f64) as f32)
            .collect()
    }
}

/// The decoder under test
///
/// Verification only needs whole-stream PCM, so implementations decode
/// everything up front.
pub trait PcmDecoder: Send + Sync {
    fn decode_file(&self, path: &Path) -> Result<DecodedAudio>;

    /// Decode an in-memory image; `extension` is a format hint
    fn decode_bytes(&self, bytes: Vec<u8>, extension: Option<&str>) -> Result<DecodedAudio>;
}

/// Symphonia-based decoder
#[derive(Debug, Clone, Copy, Default)]
pub struct SymphoniaDecoder;

impl PcmDecoder for SymphoniaDecoder {
    fn decode_file(&self, path: &Path) -> Result<DecodedAudio> {
        let file = std::fs::File::open(path)
            .map_err(|e| FixtureError::Decode(format!("Failed to open file: {}", e)))?;

        let extension = path.extension().and_then(|e| e.to_str());
        decode_source(Box::new(file), extension)
    }

    fn decode_bytes(&self, bytes: Vec<u8>, extension: Option<&str>) -> Result<DecodedAudio> {
        decode_source(Box::new(Cursor::new(bytes)), extension)
    }
}

fn decode_source(source: Box<dyn MediaSource>, extension: Option<&str>) -> Result<DecodedAudio> {
    let mss = MediaSourceStream::new(source, Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = extension {
        hint.with_extension(ext);
    }

    let format_options = FormatOptions {
        enable_gapless: true,
        ..Default::default()
    };

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &format_options, &MetadataOptions::default())
        .map_err(|e| FixtureError::Decode(format!("Failed to probe format: {}", e)))?;

    let mut reader = probed.format;

    let track = reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| FixtureError::Decode("No audio tracks found".to_string()))?;

    let track_id = track.id;
    let codec_params = track.codec_params.clone();

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| symphonia_error("create decoder", e))?;

    let mut sample_rate = codec_params.sample_rate;
    let mut channels = codec_params.channels.map(|ch| ch.count() as u16);
    let mut samples = Vec::new();
    let mut decode_errors = 0;

    loop {
        let packet = match reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => {
                decoder.reset();
                continue;
            }
            Err(e) => return Err(symphonia_error("read packet", e)),
        };

        // Skip packets from other tracks
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                warn!("Skipping undecodable packet: {}", e);
                decode_errors += 1;
                continue;
            }
            Err(e) => return Err(symphonia_error("decode packet", e)),
        };

        let spec = *decoded.spec();
        sample_rate = sample_rate.or(Some(spec.rate));
        channels = channels.or(Some(spec.channels.count() as u16));

        if decoded.frames() == 0 {
            continue;
        }

        let mut buffer = SampleBuffer::<i32>::new(decoded.capacity() as u64, spec);
        buffer.copy_interleaved_ref(decoded);
        samples.extend_from_slice(buffer.samples());
    }

    let sample_rate =
        sample_rate.ok_or_else(|| FixtureError::Decode("Sample rate not available".to_string()))?;
    let channels =
        channels.ok_or_else(|| FixtureError::Decode("Channel count not available".to_string()))?;

    debug!(
        "Decoded {} samples ({} Hz, {} ch, {:?} bits)",
        samples.len(),
        sample_rate,
        channels,
        codec_params.bits_per_sample
    );

    Ok(DecodedAudio {
        sample_rate,
        channels,
        bits_per_sample: codec_params.bits_per_sample,
        samples,
        decode_errors,
    })
}

/// A recognised stream with no available codec is an environment limitation,
/// not a decode bug
fn symphonia_error(action: &str, e: SymphoniaError) -> FixtureError {
    match e {
        SymphoniaError::Unsupported(what) => {
            FixtureError::missing_tool("decoder", format!("symphonia cannot {action}: {what}"))
        }
        other => FixtureError::Decode(format!("Failed to {action}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_garbage_fails_to_decode() {
        let result = SymphoniaDecoder.decode_bytes(vec![0u8; 64], Some("wav"));
        assert!(result.is_err());
    }

    #[test]
    fn test_frames() {
        let audio = DecodedAudio {
            sample_rate: 44100,
            channels: 2,
            bits_per_sample: Some(16),
            samples: vec![0; 10],
            decode_errors: 0,
        };
        assert_eq!(audio.frames(), 5);
    }
}
