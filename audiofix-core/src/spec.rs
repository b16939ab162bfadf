/// Fixture specifications and the matrix they are expanded from
///
/// A matrix is a list of groups; each group is the cross product of its
/// formats, signals and tag sets. Expansion is deterministic: the same matrix
/// always yields the same specs, in the same order, with the same ids.
use crate::error::{FixtureError, Result};
use crate::format::{CodecParams, ContainerFormat};
use crate::signal::ReferenceSignal;
use crate::tags::{self, TagSet};
use crate::tolerance::ToleranceProfile;
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// One fixture to produce. Immutable once constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct FixtureSpec {
    id: String,
    format: ContainerFormat,
    codec_params: CodecParams,
    tags: TagSet,
    reference: ReferenceSignal,
    tolerance: ToleranceProfile,
    output_path: Utf8PathBuf,
}

impl FixtureSpec {
    /// Build a spec, checking the signal and tags against the format
    pub fn new(
        id: impl Into<String>,
        format: ContainerFormat,
        codec_params: CodecParams,
        tags: TagSet,
        reference: ReferenceSignal,
        tolerance: ToleranceProfile,
    ) -> Result<Self> {
        let id = sanitize_for_filename(&id.into());
        if id.is_empty() {
            return Err(FixtureError::Config("Fixture id must not be empty".to_string()));
        }

        format.check_signal(&reference)?;
        tags.validate().map_err(|e| match e {
            FixtureError::UnsupportedParameterCombination { reason, .. } => {
                FixtureError::unsupported(format.extension(), reason)
            }
            other => other,
        })?;

        if format.is_lossless() && !tolerance.is_exact() {
            return Err(FixtureError::unsupported(
                format.extension(),
                "lossless formats must use exact tolerance",
            ));
        }

        let output_path = Utf8PathBuf::from(format!("{}.{}", id, format.extension()));

        Ok(Self {
            id,
            format,
            codec_params,
            tags,
            reference,
            tolerance,
            output_path,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn format(&self) -> ContainerFormat {
        self.format
    }

    pub fn codec_params(&self) -> &CodecParams {
        &self.codec_params
    }

    pub fn tags(&self) -> &TagSet {
        &self.tags
    }

    pub fn reference(&self) -> &ReferenceSignal {
        &self.reference
    }

    pub fn tolerance(&self) -> &ToleranceProfile {
        &self.tolerance
    }

    /// File name relative to the target directory
    pub fn output_path(&self) -> &Utf8Path {
        &self.output_path
    }
}

/// Replace characters that are unsafe in file names
pub fn sanitize_for_filename(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            ' ' => '_',
            c => c,
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedSignal {
    pub name: String,
    pub signal: ReferenceSignal,
}

impl NamedSignal {
    pub fn new(name: impl Into<String>, signal: ReferenceSignal) -> Self {
        Self {
            name: name.into(),
            signal,
        }
    }
}

/// Cross product of formats x signals x tag sets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixGroup {
    pub formats: Vec<ContainerFormat>,
    pub signals: Vec<NamedSignal>,
    pub tag_sets: Vec<String>,
    /// Per-format codec params, merged over the format defaults
    #[serde(default)]
    pub codec_params: BTreeMap<String, CodecParams>,
    /// Per-format tolerance, replacing the format default
    #[serde(default)]
    pub tolerance: BTreeMap<String, ToleranceProfile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureMatrix {
    #[serde(default = "default_tag_sets")]
    pub tag_sets: BTreeMap<String, TagSet>,
    #[serde(rename = "group", default)]
    pub groups: Vec<MatrixGroup>,
}

impl FixtureMatrix {
    /// Expand every group into concrete specs
    ///
    /// Any invalid format/parameter pairing fails the whole expansion before
    /// any work is scheduled.
    pub fn expand(&self) -> Result<Vec<FixtureSpec>> {
        let mut specs = Vec::new();
        let mut seen = HashSet::new();

        for (index, group) in self.groups.iter().enumerate() {
            let codec_overrides = parse_format_keys(&group.codec_params, index)?;
            let tolerance_overrides = parse_format_keys(&group.tolerance, index)?;

            for &format in &group.formats {
                let mut params = format.default_codec_params();
                if let Some(overrides) = codec_overrides.get(&format) {
                    params.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
                let tolerance = tolerance_overrides
                    .get(&format)
                    .copied()
                    .unwrap_or_else(|| ToleranceProfile::default_for(format));

                for named in &group.signals {
                    if named.name.trim().is_empty() {
                        return Err(FixtureError::Config(format!(
                            "Matrix group {index} has an unnamed signal"
                        )));
                    }

                    for set_name in &group.tag_sets {
                        let tags = self.tag_sets.get(set_name).ok_or_else(|| {
                            FixtureError::Config(format!("Unknown tag set: {set_name}"))
                        })?;

                        let id = format!("{}_{}_{}", format.extension(), named.name, set_name);
                        let spec = FixtureSpec::new(
                            id,
                            format,
                            params.clone(),
                            tags.clone(),
                            named.signal,
                            tolerance,
                        )?;

                        if !seen.insert(spec.id().to_string()) {
                            return Err(FixtureError::Config(format!(
                                "Duplicate fixture id: {}",
                                spec.id()
                            )));
                        }
                        specs.push(spec);
                    }
                }
            }
        }

        Ok(specs)
    }

    /// Formats referenced anywhere in the matrix
    pub fn formats(&self) -> Vec<ContainerFormat> {
        let mut formats: Vec<_> = self
            .groups
            .iter()
            .flat_map(|g| g.formats.iter().copied())
            .collect();
        formats.sort();
        formats.dedup();
        formats
    }
}

fn parse_format_keys<T: Clone>(
    map: &BTreeMap<String, T>,
    group: usize,
) -> Result<BTreeMap<ContainerFormat, T>> {
    map.iter()
        .map(|(key, value)| {
            key.parse::<ContainerFormat>()
                .map(|format| (format, value.clone()))
                .map_err(|e| FixtureError::Config(format!("Matrix group {group}: {e}")))
        })
        .collect()
}

fn default_tag_sets() -> BTreeMap<String, TagSet> {
    BTreeMap::from([
        ("basic".to_string(), tags::basic_tags()),
        ("minimal".to_string(), tags::minimal_tags()),
        ("extended".to_string(), tags::extended_tags()),
        ("unicode".to_string(), tags::unicode_tags()),
        ("artwork".to_string(), tags::artwork_tags()),
    ])
}

impl Default for FixtureMatrix {
    fn default() -> Self {
        use ContainerFormat::*;

        let sine_1khz = NamedSignal::new("sine_1khz", ReferenceSignal::sine(1000.0, 44100, 2, 1.0));
        let sine_440hz = NamedSignal::new("sine_440hz", ReferenceSignal::sine(440.0, 44100, 2, 1.0));
        let sine_1khz_48k =
            NamedSignal::new("sine_1khz_48k", ReferenceSignal::sine(1000.0, 48000, 2, 1.0));
        let silence = NamedSignal::new("silence", ReferenceSignal::silence(44100, 2, 0.5));
        let highres = NamedSignal::new(
            "highres",
            ReferenceSignal::sine(1000.0, 96000, 2, 1.0).with_bit_depth(24),
        );
        let mono = NamedSignal::new("mono", ReferenceSignal::sine(440.0, 44100, 1, 1.0));

        let group = |formats: &[ContainerFormat], signals: Vec<NamedSignal>, tag_sets: &[&str]| {
            MatrixGroup {
                formats: formats.to_vec(),
                signals,
                tag_sets: tag_sets.iter().map(|s| s.to_string()).collect(),
                codec_params: BTreeMap::new(),
                tolerance: BTreeMap::new(),
            }
        };

        Self {
            tag_sets: default_tag_sets(),
            groups: vec![
                group(
                    &[Flac, Wav, Mp3, Ogg, M4a],
                    vec![sine_1khz.clone(), sine_440hz],
                    &["basic"],
                ),
                group(&[Opus], vec![sine_1khz_48k.clone()], &["basic"]),
                group(&[Flac, Wav], vec![silence, highres, mono], &["minimal"]),
                group(
                    &[Flac, Wav, Mp3, Ogg, M4a],
                    vec![sine_1khz],
                    &["unicode", "extended", "artwork"],
                ),
                group(&[Opus], vec![sine_1khz_48k], &["unicode"]),
            ],
        }
    }
}
