use crate::error::{FixtureError, Result};
use crate::signal::ReferenceSignal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Opaque encoder options, forwarded verbatim to the encoding backend
pub type CodecParams = BTreeMap<String, String>;

const MP3_SAMPLE_RATES: [u32; 9] = [8000, 11025, 12000, 16000, 22050, 24000, 32000, 44100, 48000];
const AAC_SAMPLE_RATES: [u32; 12] = [
    8000, 11025, 12000, 16000, 22050, 24000, 32000, 44100, 48000, 64000, 88200, 96000,
];

/// Container/codec family a fixture is rendered into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerFormat {
    Flac,
    Wav,
    Mp3,
    Ogg,
    Opus,
    M4a,
}

impl ContainerFormat {
    pub const ALL: [ContainerFormat; 6] = [
        ContainerFormat::Flac,
        ContainerFormat::Wav,
        ContainerFormat::Mp3,
        ContainerFormat::Ogg,
        ContainerFormat::Opus,
        ContainerFormat::M4a,
    ];

    pub fn extension(&self) -> &'static str {
        match self {
            ContainerFormat::Flac => "flac",
            ContainerFormat::Wav => "wav",
            ContainerFormat::Mp3 => "mp3",
            ContainerFormat::Ogg => "ogg",
            ContainerFormat::Opus => "opus",
            ContainerFormat::M4a => "m4a",
        }
    }

    /// FFmpeg encoder name
    pub fn codec(&self) -> &'static str {
        match self {
            ContainerFormat::Flac => "flac",
            ContainerFormat::Wav => "pcm_s16le",
            ContainerFormat::Mp3 => "libmp3lame",
            ContainerFormat::Ogg => "libvorbis",
            ContainerFormat::Opus => "libopus",
            ContainerFormat::M4a => "aac",
        }
    }

    /// Codec family name, used when reporting missing capabilities
    pub fn family(&self) -> &'static str {
        match self {
            ContainerFormat::Flac => "flac",
            ContainerFormat::Wav => "pcm",
            ContainerFormat::Mp3 => "mp3",
            ContainerFormat::Ogg => "vorbis",
            ContainerFormat::Opus => "opus",
            ContainerFormat::M4a => "aac",
        }
    }

    pub fn is_lossless(&self) -> bool {
        matches!(self, ContainerFormat::Flac | ContainerFormat::Wav)
    }

    fn max_channels(&self) -> u16 {
        if self.is_lossless() { 8 } else { 2 }
    }

    /// Encoder options used when the matrix does not override them
    pub fn default_codec_params(&self) -> CodecParams {
        let pairs: &[(&str, &str)] = match self {
            ContainerFormat::Flac => &[("compression_level", "5")],
            ContainerFormat::Wav => &[],
            ContainerFormat::Mp3 => &[("q:a", "2")],
            ContainerFormat::Ogg => &[("q:a", "5")],
            ContainerFormat::Opus => &[("b:a", "128k")],
            ContainerFormat::M4a => &[("b:a", "192k")],
        };
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    /// Check a reference signal against this format's hard constraints
    pub fn check_signal(&self, signal: &ReferenceSignal) -> Result<()> {
        signal
            .validate()
            .map_err(|e| match e {
                FixtureError::UnsupportedParameterCombination { reason, .. } => {
                    FixtureError::unsupported(self.extension(), reason)
                }
                other => other,
            })?;

        let reject = |reason: String| Err(FixtureError::unsupported(self.extension(), reason));
        let rate = signal.sample_rate_hz;

        if signal.channels > self.max_channels() {
            return reject(format!(
                "{} channels, at most {} supported",
                signal.channels,
                self.max_channels()
            ));
        }

        match self {
            ContainerFormat::Opus if rate != 48000 => {
                reject(format!("sample rate {rate} Hz, requires 48000 Hz"))
            }
            ContainerFormat::Mp3 if !MP3_SAMPLE_RATES.contains(&rate) => {
                reject(format!("sample rate {rate} Hz not an MPEG audio rate"))
            }
            ContainerFormat::M4a if !AAC_SAMPLE_RATES.contains(&rate) => {
                reject(format!("sample rate {rate} Hz not an AAC rate"))
            }
            ContainerFormat::Ogg if !(8000..=192_000).contains(&rate) => {
                reject(format!("sample rate {rate} Hz outside 8000..=192000"))
            }
            ContainerFormat::Flac if rate > 655_350 => {
                reject(format!("sample rate {rate} Hz above FLAC limit"))
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for ContainerFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ContainerFormat {
    type Err = FixtureError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "flac" => Ok(ContainerFormat::Flac),
            "wav" => Ok(ContainerFormat::Wav),
            "mp3" => Ok(ContainerFormat::Mp3),
            "ogg" | "vorbis" => Ok(ContainerFormat::Ogg),
            "opus" => Ok(ContainerFormat::Opus),
            "m4a" | "aac" => Ok(ContainerFormat::M4a),
            other => Err(FixtureError::Config(format!("Unknown container format: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_extensions() {
        assert_eq!(ContainerFormat::Flac.extension(), "flac");
        assert_eq!(ContainerFormat::Mp3.extension(), "mp3");
        assert_eq!(ContainerFormat::Opus.extension(), "opus");
    }

    #[test]
    fn test_parse_aliases() {
        assert_eq!("vorbis".parse::<ContainerFormat>().unwrap(), ContainerFormat::Ogg);
        assert_eq!("AAC".parse::<ContainerFormat>().unwrap(), ContainerFormat::M4a);
        assert!("wma".parse::<ContainerFormat>().is_err());
    }

    #[test]
    fn test_opus_requires_48k() {
        let signal = ReferenceSignal::sine(1000.0, 44100, 2, 1.0);
        let err = ContainerFormat::Opus.check_signal(&signal).unwrap_err();
        assert!(matches!(err, FixtureError::UnsupportedParameterCombination { .. }));

        let signal = ReferenceSignal::sine(1000.0, 48000, 2, 1.0);
        assert!(ContainerFormat::Opus.check_signal(&signal).is_ok());
    }

    #[test]
    fn test_mp3_rejects_high_res() {
        let signal = ReferenceSignal::sine(1000.0, 96000, 2, 1.0);
        assert!(ContainerFormat::Mp3.check_signal(&signal).is_err());
        assert!(ContainerFormat::Flac.check_signal(&signal).is_ok());
    }

    #[test]
    fn test_lossy_channel_limit() {
        let signal = ReferenceSignal::sine(1000.0, 44100, 6, 1.0);
        assert!(ContainerFormat::Mp3.check_signal(&signal).is_err());
        assert!(ContainerFormat::Wav.check_signal(&signal).is_ok());
    }
}
