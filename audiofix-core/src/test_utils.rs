//! Shared test utilities for the audiofix workspace
//!
//! Canned signals, tag sets and specs used across multiple test suites.
//! Only available when the "test-utils" feature is enabled.

use crate::format::ContainerFormat;
use crate::signal::ReferenceSignal;
use crate::spec::{FixtureMatrix, FixtureSpec, MatrixGroup, NamedSignal};
use crate::tags::TagSet;
use crate::tolerance::ToleranceProfile;
use std::collections::BTreeMap;

/// 1 kHz, 44.1 kHz, stereo, 1 second, 16-bit
pub fn sine_1khz_stereo() -> ReferenceSignal {
    ReferenceSignal::sine(1000.0, 44100, 2, 1.0)
}

/// 0.5 s of silence at 44.1 kHz stereo
pub fn silence_stereo() -> ReferenceSignal {
    ReferenceSignal::silence(44100, 2, 0.5)
}

/// Create a spec with the format's default params and tolerance
///
/// # Examples
///
/// ```
/// # use audiofix_core::test_utils::{create_test_spec, sine_1khz_stereo};
/// # use audiofix_core::format::ContainerFormat;
/// # use audiofix_core::tags::TagSet;
/// let spec = create_test_spec("tone", ContainerFormat::Wav, sine_1khz_stereo(), TagSet::new());
/// assert_eq!(spec.output_path().as_str(), "tone.wav");
/// ```
pub fn create_test_spec(
    id: &str,
    format: ContainerFormat,
    reference: ReferenceSignal,
    tags: TagSet,
) -> FixtureSpec {
    FixtureSpec::new(
        id,
        format,
        format.default_codec_params(),
        tags,
        reference,
        ToleranceProfile::default_for(format),
    )
    .expect("test spec should be valid")
}

/// Single-group matrix over the given formats with one short sine and one silence
pub fn small_matrix(formats: &[ContainerFormat], tag_set: &str) -> FixtureMatrix {
    let mut matrix = FixtureMatrix::default();
    matrix.groups = vec![MatrixGroup {
        formats: formats.to_vec(),
        signals: vec![
            NamedSignal::new("tone", ReferenceSignal::sine(1000.0, 48000, 2, 0.25)),
            NamedSignal::new("quiet", ReferenceSignal::silence(48000, 1, 0.1)),
        ],
        tag_sets: vec![tag_set.to_string()],
        codec_params: BTreeMap::new(),
        tolerance: BTreeMap::new(),
    }];
    matrix
}
