use crate::format::ContainerFormat;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToleranceKind {
    /// Every decoded sample must equal the reference
    Exact,
    /// Dominant frequency and RMS level must fall within bounds
    AmplitudeAndFrequency,
}

/// Comparison policy for a decoded fixture
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ToleranceProfile {
    pub kind: ToleranceKind,
    #[serde(default)]
    pub max_freq_error_hz: f64,
    #[serde(default)]
    pub max_rms_error: f64,
}

impl ToleranceProfile {
    pub const fn exact() -> Self {
        Self {
            kind: ToleranceKind::Exact,
            max_freq_error_hz: 0.0,
            max_rms_error: 0.0,
        }
    }

    pub const fn amplitude_and_frequency(max_freq_error_hz: f64, max_rms_error: f64) -> Self {
        Self {
            kind: ToleranceKind::AmplitudeAndFrequency,
            max_freq_error_hz,
            max_rms_error,
        }
    }

    /// Default policy for a container format
    ///
    /// Lossless formats are always exact. Lossy bounds assume the default codec
    /// params; Opus at 128k gets a slightly wider RMS band.
    pub const fn default_for(format: ContainerFormat) -> Self {
        match format {
            ContainerFormat::Flac | ContainerFormat::Wav => Self::exact(),
            ContainerFormat::Mp3 => Self::amplitude_and_frequency(2.0, 0.05),
            ContainerFormat::Ogg => Self::amplitude_and_frequency(2.0, 0.05),
            ContainerFormat::Opus => Self::amplitude_and_frequency(2.0, 0.06),
            ContainerFormat::M4a => Self::amplitude_and_frequency(2.0, 0.05),
        }
    }

    pub fn is_exact(&self) -> bool {
        self.kind == ToleranceKind::Exact
    }
}
