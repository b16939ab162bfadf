use crate::encoder::{CodecEncoder, EncodeFuture, EncodeRequest, ProbeFuture};
use audiofix_core::error::{FixtureError, Result};
use audiofix_core::format::ContainerFormat;
use audiofix_core::signal::PcmBuffer;
use hound::{SampleFormat, WavSpec, WavWriter};
use std::io::Cursor;

/// In-process RIFF/WAVE writer; needs no external tooling
pub struct WavEncoder;

impl WavEncoder {
    /// Write integer PCM as a WAV image in memory
    pub fn encode_pcm(pcm: &PcmBuffer) -> Result<Vec<u8>> {
        let spec = WavSpec {
            channels: pcm.channels,
            sample_rate: pcm.sample_rate,
            bits_per_sample: pcm.bit_depth,
            sample_format: SampleFormat::Int,
        };

        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = WavWriter::new(&mut cursor, spec).map_err(wav_error)?;
            for &sample in &pcm.samples {
                writer.write_sample(sample).map_err(wav_error)?;
            }
            writer.finalize().map_err(wav_error)?;
        }

        Ok(cursor.into_inner())
    }
}

fn wav_error(e: hound::Error) -> FixtureError {
    FixtureError::EncodingFailed(format!("WAV writer: {e}"))
}

impl CodecEncoder for WavEncoder {
    fn format(&self) -> ContainerFormat {
        ContainerFormat::Wav
    }

    fn name(&self) -> &str {
        "native-wav"
    }

    fn probe(&self) -> ProbeFuture<'_> {
        Box::pin(async { Ok(()) })
    }

    fn encode<'a>(&'a self, request: EncodeRequest<'a>) -> EncodeFuture<'a> {
        Box::pin(async move {
            if !request.params.is_empty() {
                let keys: Vec<_> = request.params.keys().map(String::as_str).collect();
                return Err(FixtureError::EncodingFailed(format!(
                    "native WAV encoder takes no codec params, got {}",
                    keys.join(", ")
                )));
            }
            Self::encode_pcm(request.pcm)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audiofix_core::format::CodecParams;
    use audiofix_core::signal::{ReferenceSignal, synthesize};

    #[test]
    fn test_header_and_payload() {
        let pcm = synthesize(&ReferenceSignal::sine(1000.0, 44100, 2, 0.1)).unwrap();
        let bytes = WavEncoder::encode_pcm(&pcm).unwrap();

        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");

        let reader = hound::WavReader::new(Cursor::new(&bytes)).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.spec().sample_rate, 44100);
        let decoded: Vec<i32> = reader.into_samples::<i32>().map(|s| s.unwrap()).collect();
        assert_eq!(decoded, pcm.samples);
    }

    #[test]
    fn test_deterministic_output() {
        let signal = ReferenceSignal::sine(440.0, 96000, 1, 0.05).with_bit_depth(24);
        let pcm = synthesize(&signal).unwrap();
        assert_eq!(
            WavEncoder::encode_pcm(&pcm).unwrap(),
            WavEncoder::encode_pcm(&pcm).unwrap()
        );
    }

    #[tokio::test]
    async fn test_rejects_codec_params() {
        let pcm = synthesize(&ReferenceSignal::silence(44100, 1, 0.01)).unwrap();
        let params = CodecParams::from([("b:a".to_string(), "128k".to_string())]);
        let err = WavEncoder
            .encode(EncodeRequest { pcm: &pcm, params: &params })
            .await
            .unwrap_err();
        assert!(matches!(err, FixtureError::EncodingFailed(_)));
    }
}
