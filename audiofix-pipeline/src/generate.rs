use crate::manifest::{DriftReport, Manifest, ManifestEntry, unix_now};
use audiofix_codec::{CodecEncoder, EncodeRequest, EncoderRegistry, MetadataInjector, encode_with_timeout};
use audiofix_core::config::{OverwritePolicy, RunOptions};
use audiofix_core::error::{FailureKind, FixtureError, Result};
use audiofix_core::event::{Event, EventBus};
use audiofix_core::format::ContainerFormat;
use audiofix_core::signal::synthesize;
use audiofix_core::spec::FixtureSpec;
use audiofix_core::state::GenerationState;
use audiofix_verify::{PcmDecoder, SymphoniaDecoder};
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// A fixture that did not make it into the manifest
#[derive(Debug, Clone, PartialEq)]
pub struct FixtureFailure {
    pub fixture_id: String,
    pub kind: FailureKind,
    pub message: String,
}

/// A format family left out because its encoder is unavailable
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedFamily {
    pub format: ContainerFormat,
    pub reason: String,
    pub fixtures: usize,
}

#[derive(Debug, Clone, Default)]
pub struct GenerationReport {
    /// Ids scheduled for generation (or that would be, on a dry run)
    pub planned: Vec<String>,
    pub generated: Vec<String>,
    pub failures: Vec<FixtureFailure>,
    pub skipped: Vec<SkippedFamily>,
    /// Drift found in fixtures this run replaces
    pub drift: Vec<DriftReport>,
    pub manifest_committed: bool,
    pub dry_run: bool,
    pub cancelled: bool,
}

impl GenerationReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && !self.cancelled
    }

    /// Failure kinds present in this report, for exit-code selection
    pub fn failure_kinds(&self) -> Vec<FailureKind> {
        let mut kinds: Vec<FailureKind> = self.failures.iter().map(|f| f.kind).collect();
        kinds.extend(self.skipped.iter().map(|_| FailureKind::MissingTool));
        if self.cancelled {
            kinds.push(FailureKind::Cancelled);
        }
        kinds
    }
}

/// A fixture staged on disk, waiting for the batch to finish
struct StagedFixture {
    index: usize,
    entry: ManifestEntry,
}

/// Drives a generation run: synthesize, encode, tag, stage, then commit
pub struct Generator {
    registry: EncoderRegistry,
    events: EventBus,
}

impl Generator {
    pub fn new(registry: EncoderRegistry, events: EventBus) -> Self {
        Self { registry, events }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Run generation for an expanded matrix
    ///
    /// `specs` is the full matrix; the format filter in `options` selects what
    /// is regenerated. Errors returned before the commit phase leave the
    /// fixture directory untouched. Per-fixture failures are collected in the
    /// report instead.
    ///
    /// `shutdown` cancels the run once it holds `true`, including when it was
    /// set before the call.
    pub async fn run(
        &self,
        specs: Vec<FixtureSpec>,
        options: &RunOptions,
        shutdown: watch::Receiver<bool>,
    ) -> Result<GenerationReport> {
        let mut report = GenerationReport {
            dry_run: options.dry_run,
            ..Default::default()
        };

        let targeted: Vec<usize> = (0..specs.len())
            .filter(|&i| options.includes(specs[i].format()))
            .collect();

        // Probe each family once
        let mut encoders: HashMap<ContainerFormat, Arc<dyn CodecEncoder>> = HashMap::new();
        let formats: Vec<ContainerFormat> = {
            let mut formats: Vec<_> = targeted.iter().map(|&i| specs[i].format()).collect();
            formats.sort();
            formats.dedup();
            formats
        };

        for format in formats {
            let probed = match self.registry.get(format) {
                Ok(encoder) => encoder.probe().await.map(|()| encoder),
                Err(e) => Err(e),
            };

            match probed {
                Ok(encoder) => {
                    debug!("{} encoder available: {}", format, encoder.name());
                    encoders.insert(format, encoder);
                }
                Err(e) => {
                    let fixtures = targeted.iter().filter(|&&i| specs[i].format() == format).count();
                    warn!("Skipping {} fixtures ({}): {}", fixtures, format.family(), e);
                    self.events.emit(Event::FamilySkipped {
                        format,
                        reason: e.to_string(),
                    });
                    report.skipped.push(SkippedFamily {
                        format,
                        reason: e.to_string(),
                        fixtures,
                    });
                }
            }
        }

        let runnable: Vec<usize> = targeted
            .into_iter()
            .filter(|&i| encoders.contains_key(&specs[i].format()))
            .collect();
        report.planned = runnable.iter().map(|&i| specs[i].id().to_string()).collect();
        let runnable_ids: HashSet<&str> = runnable.iter().map(|&i| specs[i].id()).collect();

        // Drift in anything this run would overwrite
        let manifest_path = options.manifest_path();
        let previous = Manifest::load(&manifest_path)?;
        if let Some(previous) = &previous {
            let target_dir = options.target_dir.clone();
            let ids: HashSet<String> = runnable_ids.iter().map(|s| s.to_string()).collect();
            let previous = previous.clone();
            report.drift = tokio::task::spawn_blocking(move || {
                previous.check_drift_where(&target_dir, |entry| ids.contains(&entry.id))
            })
            .await
            .map_err(|e| FixtureError::Manifest(format!("drift check failed: {e}")))?;

            if let Some(first) = report.drift.first() {
                match options.overwrite {
                    OverwritePolicy::Refuse => {
                        return Err(FixtureError::ManifestDrift {
                            fixture_id: first.fixture_id.clone(),
                            detail: format!(
                                "{} fixture(s) differ from {}; rerun with --force to overwrite",
                                report.drift.len(),
                                manifest_path
                            ),
                        });
                    }
                    OverwritePolicy::Force => {
                        warn!("Overwriting {} drifted fixture(s)", report.drift.len());
                    }
                }
            }
        }

        if options.dry_run {
            info!(
                "Dry run: {} fixtures would be generated into {}",
                report.planned.len(),
                options.target_dir
            );
            return Ok(report);
        }

        if *shutdown.borrow() {
            warn!("Cancelled before generation started; nothing written");
            report.cancelled = true;
            return Ok(report);
        }

        self.events.emit(Event::GenerationStarted {
            total: runnable.len(),
        });

        std::fs::create_dir_all(&options.target_dir)?;
        let staging = tempfile::Builder::new()
            .prefix(".audiofix-staging")
            .tempdir_in(&options.target_dir)?;
        let staging_dir = Utf8PathBuf::try_from(staging.path().to_path_buf())
            .map_err(|e| FixtureError::Config(format!("Non UTF-8 staging path: {e}")))?;

        let generated_at = unix_now();
        let semaphore = Arc::new(Semaphore::new(options.workers.max(1)));
        let mut tasks = JoinSet::new();

        for &index in &runnable {
            let spec = specs[index].clone();
            let Some(encoder) = encoders.get(&spec.format()).cloned() else {
                continue;
            };
            let job = FixtureJob {
                index,
                spec,
                encoder,
                staging_dir: staging_dir.clone(),
                timeout: options.encoder_timeout,
                generated_at,
                events: self.events.clone(),
            };
            let semaphore = semaphore.clone();
            let shutdown = shutdown.clone();

            tasks.spawn(async move {
                let id = job.spec.id().to_string();
                let result = tokio::select! {
                    result = async {
                        let _permit = semaphore
                            .acquire_owned()
                            .await
                            .map_err(|_| FixtureError::Cancelled)?;
                        job.run().await
                    } => result,
                    _ = wait_for_shutdown(shutdown) => Err(FixtureError::Cancelled),
                };
                (id, result)
            });
        }

        let mut staged = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(fixture))) => staged.push(fixture),
                Ok((id, Err(e))) => {
                    if matches!(e, FixtureError::Cancelled) {
                        report.cancelled = true;
                    } else {
                        error!("{}: {}", id, e);
                    }
                    self.events.emit(Event::FixtureFailed {
                        id: id.clone(),
                        kind: e.kind(),
                        message: e.to_string(),
                    });
                    report.failures.push(FixtureFailure {
                        fixture_id: id,
                        kind: e.kind(),
                        message: e.to_string(),
                    });
                }
                Err(e) => {
                    error!("Generation task panicked: {}", e);
                    report.failures.push(FixtureFailure {
                        fixture_id: "<unknown>".to_string(),
                        kind: FailureKind::Other,
                        message: format!("task failed: {e}"),
                    });
                }
            }
        }

        staged.sort_by_key(|fixture| fixture.index);
        report.failures.sort_by(|a, b| a.fixture_id.cmp(&b.fixture_id));

        // A cancel that lands after the last worker finished still wins
        if *shutdown.borrow() {
            report.cancelled = true;
        }

        if !report.is_success() {
            warn!(
                "{} fixture(s) failed{}; discarding staged output, manifest unchanged",
                report.failures.len(),
                if report.cancelled { " (cancelled)" } else { "" }
            );
            self.events.emit(Event::GenerationFinished {
                generated: 0,
                failed: report.failures.len(),
            });
            return Ok(report);
        }

        let manifest = build_manifest(
            &specs,
            staged.iter().map(|f| (f.index, f.entry.clone())).collect(),
            previous.as_ref(),
            &runnable_ids,
            &options.target_dir,
        );

        // The old manifest goes before any fixture is replaced, so an
        // interrupted commit never leaves checksums that disagree with disk
        let staged_manifest = manifest.stage(&manifest_path)?;
        let replaced = replace_fixtures(&staged, &staging_dir, &options.target_dir, &manifest_path);
        if let Err(e) = replaced {
            let _ = std::fs::remove_file(&staged_manifest);
            return Err(e);
        }
        drop(staging);
        manifest.publish(&staged_manifest, &manifest_path)?;

        for fixture in &staged {
            debug!("{}: {}", fixture.entry.id, GenerationState::ManifestRecorded);
            self.events.emit(Event::FixtureStateChanged {
                id: fixture.entry.id.clone(),
                state: GenerationState::ManifestRecorded,
            });
        }
        self.events.emit(Event::ManifestCommitted {
            entries: manifest.entries.len(),
        });

        report.generated = staged.into_iter().map(|f| f.entry.id).collect();
        report.manifest_committed = true;

        info!(
            "Generated {} fixtures, {} skipped families, manifest has {} entries",
            report.generated.len(),
            report.skipped.len(),
            manifest.entries.len()
        );
        self.events.emit(Event::GenerationFinished {
            generated: report.generated.len(),
            failed: 0,
        });

        Ok(report)
    }
}

/// New records plus still-intact records of fixtures this run did not touch,
/// in matrix order
fn build_manifest(
    specs: &[FixtureSpec],
    fresh: BTreeMap<usize, ManifestEntry>,
    previous: Option<&Manifest>,
    regenerated: &HashSet<&str>,
    target_dir: &Utf8Path,
) -> Manifest {
    let mut entries = Vec::with_capacity(specs.len());

    for (index, spec) in specs.iter().enumerate() {
        if let Some(entry) = fresh.get(&index) {
            entries.push(entry.clone());
            continue;
        }
        if regenerated.contains(spec.id()) {
            continue;
        }

        let Some(old) = previous.and_then(|m| m.get(spec.id())) else {
            continue;
        };
        match old.check(target_dir) {
            None => {
                debug!("Carrying over {}", old.id);
                entries.push(old.clone());
            }
            Some(drift) => warn!("Dropping {} from manifest: {}", old.id, drift.kind),
        }
    }

    Manifest::new(entries)
}

/// Remove the current manifest, then move staged fixtures into place
fn replace_fixtures(
    staged: &[StagedFixture],
    staging_dir: &Utf8Path,
    target_dir: &Utf8Path,
    manifest_path: &Utf8Path,
) -> Result<()> {
    match std::fs::remove_file(manifest_path) {
        Ok(()) => debug!("Removed {} ahead of commit", manifest_path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    for fixture in staged {
        let from = staging_dir.join(&fixture.entry.file);
        let to = target_dir.join(&fixture.entry.file);
        std::fs::rename(&from, &to)?;
    }
    Ok(())
}

async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    if shutdown.wait_for(|&cancelled| cancelled).await.is_err() {
        // No sender left means nobody can cancel this run
        std::future::pending::<()>().await;
    }
}

/// Everything one worker needs to produce a fixture
struct FixtureJob {
    index: usize,
    spec: FixtureSpec,
    encoder: Arc<dyn CodecEncoder>,
    staging_dir: Utf8PathBuf,
    timeout: Duration,
    generated_at: u64,
    events: EventBus,
}

impl FixtureJob {
    async fn run(self) -> Result<StagedFixture> {
        let mut state = GenerationState::Pending;
        let result = self.produce(&mut state).await;

        if result.is_err() && state.can_transition_to(GenerationState::Failed) {
            self.advance(&mut state, GenerationState::Failed);
        }
        result
    }

    fn advance(&self, state: &mut GenerationState, next: GenerationState) {
        debug_assert!(state.can_transition_to(next), "{} -> {}", state, next);
        debug!("{}: {} -> {}", self.spec.id(), state, next);
        *state = next;
        self.events.emit(Event::FixtureStateChanged {
            id: self.spec.id().to_string(),
            state: next,
        });
    }

    async fn produce(&self, state: &mut GenerationState) -> Result<StagedFixture> {
        self.advance(state, GenerationState::Synthesizing);
        let reference = *self.spec.reference();
        debug!("{}: {}", self.spec.id(), reference.describe());
        let pcm = tokio::task::spawn_blocking(move || synthesize(&reference))
            .await
            .map_err(|e| FixtureError::EncodingFailed(format!("synthesis task failed: {e}")))??;

        self.advance(state, GenerationState::Encoding);
        let request = EncodeRequest {
            pcm: &pcm,
            params: self.spec.codec_params(),
        };
        let encoded = encode_with_timeout(self.encoder.as_ref(), request, self.timeout).await?;

        self.advance(state, GenerationState::Tagging);
        let spec = self.spec.clone();
        let tagged = tokio::task::spawn_blocking(move || tag_and_check(&spec, encoded))
            .await
            .map_err(|e| FixtureError::Tag(format!("tagging task failed: {e}")))??;

        let path = self.staging_dir.join(self.spec.output_path());
        tokio::fs::write(&path, &tagged).await?;

        Ok(StagedFixture {
            index: self.index,
            entry: ManifestEntry::record(&self.spec, &tagged, self.generated_at),
        })
    }
}

/// Apply the spec's tags, then prove they read back identically and, for
/// lossless formats, that the decoded audio is unchanged
fn tag_and_check(spec: &FixtureSpec, encoded: Vec<u8>) -> Result<Vec<u8>> {
    let format = spec.format();
    let untagged = format.is_lossless().then(|| encoded.clone());

    let tagged = MetadataInjector::apply(encoded, format, spec.tags())?;

    let read_back = MetadataInjector::read(&tagged)?;
    if &read_back != spec.tags() {
        return Err(FixtureError::TagRoundTripMismatch(
            spec.tags().diff(&read_back).join("; "),
        ));
    }

    if let Some(untagged) = untagged {
        let decoder = SymphoniaDecoder;
        let before = decoder.decode_bytes(untagged, Some(format.extension()))?;
        let after = decoder.decode_bytes(tagged.clone(), Some(format.extension()))?;
        if before.samples != after.samples {
            return Err(FixtureError::TagRoundTripMismatch(format!(
                "tagging changed decoded audio ({} vs {} samples)",
                before.samples.len(),
                after.samples.len()
            )));
        }
    }

    Ok(tagged)
}
