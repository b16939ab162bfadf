use crate::manifest::{Manifest, ManifestEntry};
use audiofix_core::config::RunOptions;
use audiofix_core::error::{FailureKind, FixtureError, Result};
use audiofix_core::event::{Event, EventBus};
use audiofix_verify::{PcmDecoder, VerificationEngine, VerificationResult};
use camino::Utf8Path;
use rayon::prelude::*;
use tracing::{error, info};

#[derive(Debug, Clone, Default)]
pub struct VerifyReport {
    pub results: Vec<VerificationResult>,
}

impl VerifyReport {
    pub fn passed(&self) -> usize {
        self.results.iter().filter(|r| r.passed).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.passed()
    }

    pub fn failure_kinds(&self) -> Vec<FailureKind> {
        self.results.iter().filter_map(|r| r.failure_kind()).collect()
    }
}

/// Verify every manifest entry accepted by the run's format filter
///
/// Drifted entries are reported as `ManifestDrift` without decoding, so a
/// stale fixture is never mistaken for a decoder bug.
pub fn verify_manifest<D: PcmDecoder>(
    engine: &VerificationEngine<D>,
    manifest: &Manifest,
    options: &RunOptions,
    events: &EventBus,
) -> VerifyReport {
    let selected: Vec<&ManifestEntry> = manifest
        .entries
        .iter()
        .filter(|entry| options.includes(entry.container_format))
        .collect();

    let results: Vec<VerificationResult> = selected
        .par_iter()
        .map(|entry| verify_entry(engine, entry, &options.target_dir))
        .collect();

    for result in &results {
        if result.passed {
            info!("PASS {} {:?}", result.fixture_id, result.metrics);
        } else if let Some(failure) = &result.failure {
            error!(
                "FAIL {} [{}] {} {:?}",
                result.fixture_id, failure.kind, failure.message, result.metrics
            );
        }
    }

    let report = VerifyReport { results };
    info!(
        "Verified {} fixtures: {} passed, {} failed",
        report.results.len(),
        report.passed(),
        report.failed()
    );
    events.emit(Event::VerificationFinished {
        passed: report.passed(),
        failed: report.failed(),
    });
    report
}

fn verify_entry<D: PcmDecoder>(
    engine: &VerificationEngine<D>,
    entry: &ManifestEntry,
    target_dir: &Utf8Path,
) -> VerificationResult {
    if let Some(drift) = entry.check(target_dir) {
        return VerificationResult::failed(&entry.id, entry.tolerance, &drift.to_error());
    }

    let path = target_dir.join(&entry.file);
    engine.verify(&entry.id, path.as_std_path(), &entry.reference, &entry.tolerance)
}

/// Load the manifest named by `options` and verify it
pub fn run_verification<D: PcmDecoder>(
    engine: &VerificationEngine<D>,
    options: &RunOptions,
    events: &EventBus,
) -> Result<VerifyReport> {
    let manifest_path = options.manifest_path();
    let manifest = Manifest::load(&manifest_path)?.ok_or_else(|| {
        FixtureError::Manifest(format!("No manifest at {}; run generate first", manifest_path))
    })?;

    Ok(verify_manifest(engine, &manifest, options, events))
}
