/// Reference signal synthesis
///
/// Produces mathematically known PCM buffers:
/// - Pure sine waves at a fixed peak amplitude
/// - Silence (all zero samples)
///
/// Output is a pure function of the `ReferenceSignal` fields, so two calls with
/// equal inputs are byte-identical.
use crate::error::{FixtureError, Result};
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

/// Peak amplitude of synthesized sines, as a fraction of full scale.
pub const TARGET_PEAK: f64 = 0.8;

/// Bit depths the synthesizer can quantize to.
pub const SUPPORTED_BIT_DEPTHS: [u16; 2] = [16, 24];

/// Waveform of a reference signal
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Waveform {
    Sine { frequency_hz: f64 },
    Silence,
}

impl Waveform {
    pub fn frequency_hz(&self) -> Option<f64> {
        match self {
            Waveform::Sine { frequency_hz } => Some(*frequency_hz),
            Waveform::Silence => None,
        }
    }

    pub fn is_silence(&self) -> bool {
        matches!(self, Waveform::Silence)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferenceSignal {
    pub waveform: Waveform,
    pub sample_rate_hz: u32,
    pub channels: u16,
    pub duration_seconds: f64,
    pub bit_depth: u16,
}

impl ReferenceSignal {
    pub fn sine(frequency_hz: f64, sample_rate_hz: u32, channels: u16, duration_seconds: f64) -> Self {
        Self {
            waveform: Waveform::Sine { frequency_hz },
            sample_rate_hz,
            channels,
            duration_seconds,
            bit_depth: 16,
        }
    }

    pub fn silence(sample_rate_hz: u32, channels: u16, duration_seconds: f64) -> Self {
        Self {
            waveform: Waveform::Silence,
            sample_rate_hz,
            channels,
            duration_seconds,
            bit_depth: 16,
        }
    }

    pub fn with_bit_depth(mut self, bit_depth: u16) -> Self {
        self.bit_depth = bit_depth;
        self
    }

    /// Number of frames (samples per channel) this signal spans
    pub fn frame_count(&self) -> usize {
        (self.sample_rate_hz as f64 * self.duration_seconds).round() as usize
    }

    /// RMS level of the synthesized signal, normalized to full scale
    pub fn target_rms(&self) -> f64 {
        match self.waveform {
            Waveform::Sine { .. } => TARGET_PEAK / std::f64::consts::SQRT_2,
            Waveform::Silence => 0.0,
        }
    }

    /// Human-readable description for logs and test labels
    ///
    /// e.g. `sine_1000hz_44100hz_2ch_1.0s_16bit`
    pub fn describe(&self) -> String {
        let pattern = match self.waveform {
            Waveform::Sine { frequency_hz } => format!("sine_{}hz", frequency_hz),
            Waveform::Silence => "silence".to_string(),
        };
        format!(
            "{}_{}hz_{}ch_{:.1}s_{}bit",
            pattern, self.sample_rate_hz, self.channels, self.duration_seconds, self.bit_depth
        )
    }

    /// Format-independent sanity checks
    pub fn validate(&self) -> Result<()> {
        let reject = |reason: String| Err(FixtureError::unsupported("signal", reason));

        if self.sample_rate_hz == 0 {
            return reject("sample rate must be non-zero".to_string());
        }
        if self.channels == 0 {
            return reject("channel count must be at least 1".to_string());
        }
        if !self.duration_seconds.is_finite() || self.duration_seconds < 0.0 {
            return reject(format!("invalid duration {}", self.duration_seconds));
        }
        if !SUPPORTED_BIT_DEPTHS.contains(&self.bit_depth) {
            return reject(format!("unsupported bit depth {}", self.bit_depth));
        }
        if let Waveform::Sine { frequency_hz } = self.waveform {
            let nyquist = self.sample_rate_hz as f64 / 2.0;
            if !frequency_hz.is_finite() || frequency_hz <= 0.0 || frequency_hz >= nyquist {
                return reject(format!(
                    "sine frequency {} Hz outside (0, {}) Hz",
                    frequency_hz, nyquist
                ));
            }
        }
        Ok(())
    }
}

/// Interleaved integer PCM at a stated bit depth
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmBuffer {
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_depth: u16,
    pub samples: Vec<i32>,
}

impl PcmBuffer {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Samples of a single channel
    pub fn channel(&self, index: usize) -> impl Iterator<Item = i32> + '_ {
        self.samples
            .iter()
            .skip(index)
            .step_by(self.channels.max(1) as usize)
            .copied()
    }

    /// Largest positive sample value at this bit depth
    pub fn full_scale(&self) -> f64 {
        ((1i64 << (self.bit_depth - 1)) - 1) as f64
    }

    /// Samples normalized to [-1.0, 1.0]
    pub fn to_f32(&self) -> Vec<f32> {
        let scale = self.full_scale();
        self.samples.iter().map(|&s| (s as f64 / scale) as f32).collect()
    }

    /// Packed little-endian byte image (2 or 3 bytes per sample)
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let width = (self.bit_depth / 8) as usize;
        let mut bytes = Vec::with_capacity(self.samples.len() * width);
        for &sample in &self.samples {
            bytes.extend_from_slice(&sample.to_le_bytes()[..width]);
        }
        bytes
    }
}

/// Synthesize the PCM for a reference signal
///
/// Sines are generated with a wrapped phase accumulator in f64, so long buffers
/// do not accumulate drift from evaluating `sin(2*pi*f*t)` at large `t`.
/// Every channel carries the same tone.
pub fn synthesize(signal: &ReferenceSignal) -> Result<PcmBuffer> {
    signal.validate()?;

    let frames = signal.frame_count();
    let channels = signal.channels as usize;
    let mut samples = vec![0i32; frames * channels];

    if let Waveform::Sine { frequency_hz } = signal.waveform {
        let full_scale = ((1i64 << (signal.bit_depth - 1)) - 1) as f64;
        let amplitude = TARGET_PEAK * full_scale;
        let increment = TAU * frequency_hz / signal.sample_rate_hz as f64;
        let mut phase = 0.0f64;

        for frame in samples.chunks_exact_mut(channels) {
            let value = (phase.sin() * amplitude).round() as i32;
            frame.fill(value);

            phase += increment;
            if phase >= TAU {
                phase -= TAU;
            }
        }
    }

    Ok(PcmBuffer {
        sample_rate: signal.sample_rate_hz,
        channels: signal.channels,
        bit_depth: signal.bit_depth,
        samples,
    })
}

/// Calculate RMS (Root Mean Square) of normalized samples
pub fn calculate_rms(samples: &[f32]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum / samples.len() as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe() {
        let signal = ReferenceSignal::sine(1000.0, 44100, 2, 1.0);
        assert_eq!(signal.describe(), "sine_1000hz_44100hz_2ch_1.0s_16bit");

        let silence = ReferenceSignal::silence(44100, 2, 0.5);
        assert_eq!(silence.describe(), "silence_44100hz_2ch_0.5s_16bit");
    }

    #[test]
    fn test_le_bytes_width() {
        let pcm = PcmBuffer {
            sample_rate: 48000,
            channels: 1,
            bit_depth: 24,
            samples: vec![-1, 0x123456],
        };
        assert_eq!(pcm.to_le_bytes(), vec![0xff, 0xff, 0xff, 0x56, 0x34, 0x12]);
    }

    #[test]
    fn test_frequency_above_nyquist_rejected() {
        let signal = ReferenceSignal::sine(30000.0, 44100, 2, 1.0);
        assert!(signal.validate().is_err());
    }
}
