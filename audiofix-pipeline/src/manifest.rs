use audiofix_core::error::{FixtureError, Result};
use audiofix_core::format::{CodecParams, ContainerFormat};
use audiofix_core::signal::ReferenceSignal;
use audiofix_core::spec::FixtureSpec;
use audiofix_core::tags::TagSet;
use audiofix_core::tolerance::ToleranceProfile;
use camino::{Utf8Path, Utf8PathBuf};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

pub const MANIFEST_VERSION: u32 = 1;

const CHECKSUM_PREFIX: &str = "sha256:";

/// Durable record of one generation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    #[serde(rename = "fixture", default)]
    pub entries: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub id: String,
    pub container_format: ContainerFormat,
    /// Relative to the manifest's directory
    pub file: Utf8PathBuf,
    pub checksum: String,
    pub size: u64,
    /// Unix seconds
    pub generated_at: u64,
    #[serde(default)]
    pub codec_params: CodecParams,
    #[serde(default)]
    pub tags: TagSet,
    pub reference: ReferenceSignal,
    pub tolerance: ToleranceProfile,
}

impl ManifestEntry {
    pub fn record(spec: &FixtureSpec, bytes: &[u8], generated_at: u64) -> Self {
        Self {
            id: spec.id().to_string(),
            container_format: spec.format(),
            file: spec.output_path().to_path_buf(),
            checksum: checksum_bytes(bytes),
            size: bytes.len() as u64,
            generated_at,
            codec_params: spec.codec_params().clone(),
            tags: spec.tags().clone(),
            reference: *spec.reference(),
            tolerance: *spec.tolerance(),
        }
    }

    /// Compare the recorded checksum with the file under `dir`
    pub fn check(&self, dir: &Utf8Path) -> Option<DriftReport> {
        let path = dir.join(&self.file);
        let drift = match checksum_file(&path) {
            Ok(actual) if actual == self.checksum => return None,
            Ok(actual) => DriftKind::ChecksumMismatch {
                expected: self.checksum.clone(),
                actual,
            },
            Err(_) if !path.exists() => DriftKind::Missing,
            Err(e) => DriftKind::Unreadable(e.to_string()),
        };

        Some(DriftReport {
            fixture_id: self.id.clone(),
            file: path,
            kind: drift,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriftKind {
    Missing,
    Unreadable(String),
    ChecksumMismatch { expected: String, actual: String },
}

impl fmt::Display for DriftKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriftKind::Missing => f.write_str("file missing"),
            DriftKind::Unreadable(e) => write!(f, "file unreadable: {e}"),
            DriftKind::ChecksumMismatch { expected, actual } => {
                write!(f, "checksum {actual}, manifest records {expected}")
            }
        }
    }
}

/// An on-disk fixture that no longer matches its manifest record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriftReport {
    pub fixture_id: String,
    pub file: Utf8PathBuf,
    pub kind: DriftKind,
}

impl DriftReport {
    pub fn to_error(&self) -> FixtureError {
        FixtureError::ManifestDrift {
            fixture_id: self.fixture_id.clone(),
            detail: format!("{}: {}", self.file, self.kind),
        }
    }
}

impl Manifest {
    pub fn new(entries: Vec<ManifestEntry>) -> Self {
        Self {
            version: MANIFEST_VERSION,
            entries,
        }
    }

    /// Load a manifest, or `None` when the file does not exist
    pub fn load(path: &Utf8Path) -> Result<Option<Self>> {
        if !path.exists() {
            debug!("Manifest not found: {}", path);
            return Ok(None);
        }

        let content = fs::read_to_string(path)?;
        let manifest = Self::from_toml_str(&content)
            .map_err(|e| FixtureError::Manifest(format!("{path}: {e}")))?;
        Ok(Some(manifest))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let manifest: Manifest = toml::from_str(content)
            .map_err(|e| FixtureError::Manifest(format!("Failed to parse manifest: {}", e)))?;

        if manifest.version != MANIFEST_VERSION {
            return Err(FixtureError::Manifest(format!(
                "Unsupported manifest version {} (expected {})",
                manifest.version, MANIFEST_VERSION
            )));
        }
        Ok(manifest)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self)
            .map_err(|e| FixtureError::Manifest(format!("Failed to serialize manifest: {}", e)))
    }

    /// Replace the manifest at `path` in one rename
    pub fn commit(&self, path: &Utf8Path) -> Result<()> {
        let staged = self.stage(path)?;
        self.publish(&staged, path)
    }

    /// Write the manifest next to `path` without replacing it
    ///
    /// Returns the staged file, which `publish` renames over `path`.
    pub fn stage(&self, path: &Utf8Path) -> Result<Utf8PathBuf> {
        let content = self.to_toml_string()?;
        let temp_path = staged_path(path);
        fs::write(&temp_path, content)?;
        Ok(temp_path)
    }

    pub fn publish(&self, staged: &Utf8Path, path: &Utf8Path) -> Result<()> {
        fs::rename(staged, path)?;
        info!("Manifest with {} fixtures saved to {}", self.entries.len(), path);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&ManifestEntry> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    /// Check every entry against the files under `dir`
    pub fn check_drift(&self, dir: &Utf8Path) -> Vec<DriftReport> {
        self.check_drift_where(dir, |_| true)
    }

    /// Check the entries accepted by `filter`, in manifest order
    pub fn check_drift_where<F>(&self, dir: &Utf8Path, filter: F) -> Vec<DriftReport>
    where
        F: Fn(&ManifestEntry) -> bool + Sync,
    {
        let reports: Vec<DriftReport> = self
            .entries
            .par_iter()
            .filter(|entry| filter(entry))
            .filter_map(|entry| entry.check(dir))
            .collect();

        for report in &reports {
            warn!("Drift in {}: {}", report.fixture_id, report.kind);
        }
        reports
    }
}

pub fn staged_path(path: &Utf8Path) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{path}.tmp"))
}

pub fn checksum_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{}{:x}", CHECKSUM_PREFIX, hasher.finalize())
}

pub fn checksum_file(path: &Utf8Path) -> Result<String> {
    let bytes = fs::read(path)?;
    Ok(checksum_bytes(&bytes))
}

/// Seconds since the Unix epoch
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_else(|_| {
            warn!("System time before UNIX_EPOCH, using 0");
            0
        })
}
