use crate::decoder::{DecodedAudio, PcmDecoder, SymphoniaDecoder};
use crate::spectral;
use audiofix_core::error::{FailureKind, FixtureError};
use audiofix_core::event::{Event, EventBus};
use audiofix_core::signal::{ReferenceSignal, calculate_rms, synthesize};
use audiofix_core::state::VerificationState;
use audiofix_core::tolerance::{ToleranceKind, ToleranceProfile};
use serde::Serialize;
use std::path::Path;
use tracing::{debug, warn};

/// Why a fixture did not pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureDetail {
    pub kind: FailureKind,
    pub message: String,
}

impl FailureDetail {
    pub fn from_error(error: &FixtureError) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
        }
    }

    fn mismatch(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::VerificationMismatch,
            message: message.into(),
        }
    }
}

/// First sample that differed in an exact comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SampleMismatch {
    pub index: usize,
    pub expected: i32,
    pub actual: i32,
}

/// Everything measured while comparing a fixture
///
/// Fields stay `None` when the comparison stopped before measuring them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Metrics {
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    pub bits_per_sample: Option<u32>,
    pub frames: Option<usize>,
    pub expected_frames: usize,
    pub decode_errors: usize,

    // Exact
    pub mismatched_samples: Option<usize>,
    pub first_mismatch: Option<SampleMismatch>,
    pub max_abs_error: Option<i64>,

    // Amplitude and frequency
    pub dominant_frequency_hz: Option<f64>,
    pub freq_error_hz: Option<f64>,
    pub rms: Option<f64>,
    pub target_rms: Option<f64>,
    pub rms_error: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationResult {
    pub fixture_id: String,
    pub passed: bool,
    pub state: VerificationState,
    pub metrics: Metrics,
    pub tolerance: ToleranceProfile,
    pub failure: Option<FailureDetail>,
}

impl VerificationResult {
    /// A result that failed before any comparison ran
    pub fn failed(
        fixture_id: impl Into<String>,
        tolerance: ToleranceProfile,
        error: &FixtureError,
    ) -> Self {
        Self {
            fixture_id: fixture_id.into(),
            passed: false,
            state: VerificationState::Failed,
            metrics: Metrics::default(),
            tolerance,
            failure: Some(FailureDetail::from_error(error)),
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.failure.as_ref().map(|f| f.kind)
    }
}

/// Decodes candidate files and compares them against their reference signal
pub struct VerificationEngine<D = SymphoniaDecoder> {
    decoder: D,
    events: Option<EventBus>,
}

impl VerificationEngine<SymphoniaDecoder> {
    pub fn symphonia() -> Self {
        Self::new(SymphoniaDecoder)
    }
}

impl<D: PcmDecoder> VerificationEngine<D> {
    pub fn new(decoder: D) -> Self {
        Self {
            decoder,
            events: None,
        }
    }

    /// Publish per-fixture state transitions on an event bus
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    fn advance(&self, fixture_id: &str, state: VerificationState) {
        debug!("{}: {}", fixture_id, state);
        if let Some(events) = &self.events {
            events.emit(Event::VerificationStateChanged {
                id: fixture_id.to_string(),
                state,
            });
        }
    }

    /// Decode a fixture file and compare it
    pub fn verify(
        &self,
        fixture_id: &str,
        path: &Path,
        reference: &ReferenceSignal,
        tolerance: &ToleranceProfile,
    ) -> VerificationResult {
        self.advance(fixture_id, VerificationState::Loaded);
        match self.decoder.decode_file(path) {
            Ok(decoded) => self.compare(fixture_id, &decoded, reference, tolerance),
            Err(e) => self.fail_early(fixture_id, tolerance, &e),
        }
    }

    /// Decode an in-memory image and compare it
    pub fn verify_bytes(
        &self,
        fixture_id: &str,
        bytes: Vec<u8>,
        extension: Option<&str>,
        reference: &ReferenceSignal,
        tolerance: &ToleranceProfile,
    ) -> VerificationResult {
        self.advance(fixture_id, VerificationState::Loaded);
        match self.decoder.decode_bytes(bytes, extension) {
            Ok(decoded) => self.compare(fixture_id, &decoded, reference, tolerance),
            Err(e) => self.fail_early(fixture_id, tolerance, &e),
        }
    }

    fn fail_early(
        &self,
        fixture_id: &str,
        tolerance: &ToleranceProfile,
        error: &FixtureError,
    ) -> VerificationResult {
        warn!("{}: could not decode: {}", fixture_id, error);
        self.advance(fixture_id, VerificationState::Failed);
        VerificationResult::failed(fixture_id, *tolerance, error)
    }

    /// Compare already-decoded audio against the reference
    pub fn compare(
        &self,
        fixture_id: &str,
        decoded: &DecodedAudio,
        reference: &ReferenceSignal,
        tolerance: &ToleranceProfile,
    ) -> VerificationResult {
        self.advance(fixture_id, VerificationState::Decoded);

        let mut metrics = Metrics {
            sample_rate: Some(decoded.sample_rate),
            channels: Some(decoded.channels),
            bits_per_sample: decoded.bits_per_sample,
            frames: Some(decoded.frames()),
            expected_frames: reference.frame_count(),
            decode_errors: decoded.decode_errors,
            ..Default::default()
        };

        let failure = match tolerance.kind {
            ToleranceKind::Exact => compare_exact(decoded, reference, &mut metrics),
            ToleranceKind::AmplitudeAndFrequency => {
                compare_lossy(decoded, reference, tolerance, &mut metrics)
            }
        };
        self.advance(fixture_id, VerificationState::Compared);

        let state = if failure.is_none() {
            VerificationState::Passed
        } else {
            VerificationState::Failed
        };
        self.advance(fixture_id, state);

        VerificationResult {
            fixture_id: fixture_id.to_string(),
            passed: failure.is_none(),
            state,
            metrics,
            tolerance: *tolerance,
            failure,
        }
    }
}

fn check_geometry(decoded: &DecodedAudio, reference: &ReferenceSignal) -> Option<FailureDetail> {
    if decoded.sample_rate != reference.sample_rate_hz {
        return Some(FailureDetail::mismatch(format!(
            "sample rate {} Hz, expected {} Hz",
            decoded.sample_rate, reference.sample_rate_hz
        )));
    }
    if decoded.channels != reference.channels {
        return Some(FailureDetail::mismatch(format!(
            "{} channels, expected {}",
            decoded.channels, reference.channels
        )));
    }
    None
}

/// Sample-for-sample comparison against freshly synthesized PCM
fn compare_exact(
    decoded: &DecodedAudio,
    reference: &ReferenceSignal,
    metrics: &mut Metrics,
) -> Option<FailureDetail> {
    if let Some(failure) = check_geometry(decoded, reference) {
        return Some(failure);
    }

    if let Some(bits) = decoded.bits_per_sample {
        if bits < reference.bit_depth as u32 {
            return Some(FailureDetail::mismatch(format!(
                "stream declares {bits}-bit samples, reference is {}-bit",
                reference.bit_depth
            )));
        }
    }

    if decoded.decode_errors > 0 {
        return Some(FailureDetail::mismatch(format!(
            "{} packets failed to decode",
            decoded.decode_errors
        )));
    }

    let expected = match synthesize(reference) {
        Ok(pcm) => pcm,
        Err(e) => return Some(FailureDetail::from_error(&e)),
    };

    if decoded.frames() != expected.frames() {
        return Some(FailureDetail::mismatch(format!(
            "{} frames, expected {}",
            decoded.frames(),
            expected.frames()
        )));
    }

    let shift = 32 - reference.bit_depth as u32;
    let mut mismatched = 0usize;
    let mut first = None;
    let mut max_abs_error = 0i64;

    for (index, (&actual, &wanted)) in decoded.samples.iter().zip(&expected.samples).enumerate() {
        let aligned = wanted << shift;
        if actual != aligned {
            mismatched += 1;
            if first.is_none() {
                first = Some(SampleMismatch {
                    index,
                    expected: aligned,
                    actual,
                });
            }
            let error = ((actual >> shift) as i64 - wanted as i64).abs().max(1);
            max_abs_error = max_abs_error.max(error);
        }
    }

    metrics.mismatched_samples = Some(mismatched);
    metrics.first_mismatch = first;
    metrics.max_abs_error = Some(max_abs_error);

    first.map(|m| {
        FailureDetail::mismatch(format!(
            "{mismatched} of {} samples differ, first at index {} (expected {}, got {})",
            expected.samples.len(),
            m.index,
            m.expected,
            m.actual
        ))
    })
}

/// Frequency and level comparison for lossy encodes
fn compare_lossy(
    decoded: &DecodedAudio,
    reference: &ReferenceSignal,
    tolerance: &ToleranceProfile,
    metrics: &mut Metrics,
) -> Option<FailureDetail> {
    if let Some(failure) = check_geometry(decoded, reference) {
        return Some(failure);
    }

    let channels = decoded.channels as usize;
    let region = spectral::central_region(decoded.frames());
    if region.is_empty() && reference.frame_count() > 0 {
        return Some(FailureDetail::mismatch("no audio decoded"));
    }

    let normalized = decoded.normalized();
    let window = &normalized[region.start * channels..region.end * channels];

    let rms = calculate_rms(window);
    let target_rms = reference.target_rms();
    let rms_error = (rms - target_rms).abs();
    metrics.rms = Some(rms);
    metrics.target_rms = Some(target_rms);
    metrics.rms_error = Some(rms_error);

    let Some(nominal) = reference.waveform.frequency_hz() else {
        // Silence: only the level matters
        if rms > tolerance.max_rms_error {
            return Some(FailureDetail::mismatch(format!(
                "silence decoded with RMS {rms:.4}, limit {}",
                tolerance.max_rms_error
            )));
        }
        return None;
    };

    let left: Vec<f32> = window.iter().step_by(channels).copied().collect();
    let Some(measured) = spectral::dominant_frequency(&left, decoded.sample_rate) else {
        return Some(FailureDetail::mismatch("no dominant frequency found"));
    };
    let freq_error = (measured - nominal).abs();
    metrics.dominant_frequency_hz = Some(measured);
    metrics.freq_error_hz = Some(freq_error);

    if freq_error > tolerance.max_freq_error_hz {
        return Some(FailureDetail::mismatch(format!(
            "dominant frequency {measured:.2} Hz, expected {nominal} Hz ± {}",
            tolerance.max_freq_error_hz
        )));
    }
    if rms_error > tolerance.max_rms_error {
        return Some(FailureDetail::mismatch(format!(
            "RMS {rms:.4}, expected {target_rms:.4} ± {}",
            tolerance.max_rms_error
        )));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoded_from(reference: &ReferenceSignal) -> DecodedAudio {
        let pcm = synthesize(reference).unwrap();
        let shift = 32 - reference.bit_depth as u32;
        DecodedAudio {
            sample_rate: pcm.sample_rate,
            channels: pcm.channels,
            bits_per_sample: Some(reference.bit_depth as u32),
            samples: pcm.samples.iter().map(|&s| s << shift).collect(),
            decode_errors: 0,
        }
    }

    fn engine() -> VerificationEngine {
        VerificationEngine::symphonia()
    }

    #[test]
    fn test_exact_match_passes() {
        let reference = ReferenceSignal::sine(1000.0, 44100, 2, 0.1);
        let result = engine().compare(
            "tone",
            &decoded_from(&reference),
            &reference,
            &ToleranceProfile::exact(),
        );
        assert!(result.passed, "{:?}", result.failure);
        assert_eq!(result.state, VerificationState::Passed);
        assert_eq!(result.metrics.mismatched_samples, Some(0));
    }

    #[test]
    fn test_single_sample_flip_reported() {
        let reference = ReferenceSignal::sine(1000.0, 44100, 2, 0.1);
        let mut decoded = decoded_from(&reference);
        decoded.samples[7] += 1 << 16;

        let result = engine().compare("tone", &decoded, &reference, &ToleranceProfile::exact());
        assert!(!result.passed);
        assert_eq!(result.failure_kind(), Some(FailureKind::VerificationMismatch));
        assert_eq!(result.metrics.mismatched_samples, Some(1));
        assert_eq!(result.metrics.first_mismatch.map(|m| m.index), Some(7));
        assert_eq!(result.metrics.max_abs_error, Some(1));
    }

    #[test]
    fn test_declared_depth_below_reference_fails() {
        let reference = ReferenceSignal::sine(1000.0, 96000, 2, 0.05).with_bit_depth(24);
        let mut decoded = decoded_from(&reference);
        decoded.bits_per_sample = Some(16);

        let result = engine().compare("hires", &decoded, &reference, &ToleranceProfile::exact());
        assert!(!result.passed);
        assert!(result.failure.unwrap().message.contains("16-bit"));
    }

    #[test]
    fn test_frame_count_mismatch_fails() {
        let reference = ReferenceSignal::silence(44100, 2, 0.5);
        let mut decoded = decoded_from(&reference);
        decoded.samples.truncate(100);

        let result = engine().compare("quiet", &decoded, &reference, &ToleranceProfile::exact());
        assert!(!result.passed);
        assert_eq!(result.metrics.frames, Some(50));
        assert_eq!(result.metrics.expected_frames, 22050);
    }

    #[test]
    fn test_lossy_sine_within_tolerance() {
        let reference = ReferenceSignal::sine(1000.0, 44100, 2, 1.0);
        let tolerance = ToleranceProfile::amplitude_and_frequency(2.0, 0.05);
        let result = engine().compare("tone", &decoded_from(&reference), &reference, &tolerance);

        assert!(result.passed, "{:?}", result.failure);
        let freq = result.metrics.dominant_frequency_hz.unwrap();
        assert!((freq - 1000.0).abs() < 0.5, "measured {freq}");
        assert!(result.metrics.rms_error.unwrap() < 0.01);
    }

    #[test]
    fn test_lossy_wrong_frequency_fails() {
        let reference = ReferenceSignal::sine(1000.0, 44100, 2, 1.0);
        let other = ReferenceSignal::sine(1010.0, 44100, 2, 1.0);
        let tolerance = ToleranceProfile::amplitude_and_frequency(2.0, 0.05);

        let result = engine().compare("tone", &decoded_from(&other), &reference, &tolerance);
        assert!(!result.passed);
        assert!(result.metrics.freq_error_hz.unwrap() > 5.0);
    }

    #[test]
    fn test_lossy_attenuated_fails_rms() {
        let reference = ReferenceSignal::sine(1000.0, 44100, 1, 1.0);
        let mut decoded = decoded_from(&reference);
        for s in &mut decoded.samples {
            *s /= 2;
        }
        let tolerance = ToleranceProfile::amplitude_and_frequency(2.0, 0.05);

        let result = engine().compare("tone", &decoded, &reference, &tolerance);
        assert!(!result.passed);
        assert!(result.failure.unwrap().message.starts_with("RMS"));
    }

    #[test]
    fn test_lossy_silence_checks_level_only() {
        let reference = ReferenceSignal::silence(44100, 2, 0.5);
        let tolerance = ToleranceProfile::amplitude_and_frequency(2.0, 0.05);

        let result = engine().compare("quiet", &decoded_from(&reference), &reference, &tolerance);
        assert!(result.passed);
        assert_eq!(result.metrics.dominant_frequency_hz, None);
    }

    #[test]
    fn test_state_events_published() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let engine = engine().with_events(bus);

        let reference = ReferenceSignal::silence(8000, 1, 0.01);
        engine.compare("quiet", &decoded_from(&reference), &reference, &ToleranceProfile::exact());

        let mut states = Vec::new();
        while let Ok(Event::VerificationStateChanged { state, .. }) = rx.try_recv() {
            states.push(state);
        }
        assert_eq!(
            states,
            vec![
                VerificationState::Decoded,
                VerificationState::Compared,
                VerificationState::Passed
            ]
        );
    }
}
