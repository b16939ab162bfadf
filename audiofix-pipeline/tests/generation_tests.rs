/// Generation and verification pipeline tests
///
/// All tests run against the native WAV encoder, or against stub encoders
/// standing in for failing, hung or missing external tools, so none of them
/// need FFmpeg.
use audiofix_codec::{CodecEncoder, EncodeFuture, EncodeRequest, EncoderRegistry, ProbeFuture, WavEncoder};
use audiofix_core::config::{OverwritePolicy, RunOptions};
use audiofix_core::error::{FailureKind, FixtureError, Result};
use audiofix_core::event::{Event, EventBus};
use audiofix_core::format::ContainerFormat;
use audiofix_core::signal::ReferenceSignal;
use audiofix_core::spec::FixtureSpec;
use audiofix_core::tags::TagSet;
use audiofix_core::test_utils::{create_test_spec, sine_1khz_stereo, small_matrix};
use audiofix_pipeline::manifest::{checksum_file, staged_path};
use audiofix_pipeline::outcome::{EXIT_DRIFT, EXIT_FIXTURE_FAILURE, EXIT_SUCCESS, exit_code};
use audiofix_pipeline::{Generator, Manifest, run_verification};
use audiofix_verify::VerificationEngine;
use camino::{Utf8Path, Utf8PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

struct Workspace {
    _dir: tempfile::TempDir,
    target: Utf8PathBuf,
}

fn workspace() -> Workspace {
    let dir = tempfile::tempdir().unwrap();
    let target = Utf8PathBuf::try_from(dir.path().join("fixtures")).unwrap();
    Workspace { _dir: dir, target }
}

fn options(target: &Utf8Path) -> RunOptions {
    RunOptions {
        target_dir: target.to_path_buf(),
        manifest_name: "manifest.toml".to_string(),
        formats: None,
        overwrite: OverwritePolicy::Refuse,
        dry_run: false,
        workers: 2,
        encoder_timeout: Duration::from_secs(10),
    }
}

fn wav_specs() -> Vec<FixtureSpec> {
    small_matrix(&[ContainerFormat::Wav], "basic").expand().unwrap()
}

fn wav_registry() -> EncoderRegistry {
    let mut registry = EncoderRegistry::new();
    registry.register(Arc::new(WavEncoder));
    registry
}

async fn generate(
    registry: EncoderRegistry,
    specs: Vec<FixtureSpec>,
    options: &RunOptions,
) -> Result<audiofix_pipeline::GenerationReport> {
    let (_tx, rx) = watch::channel(false);
    Generator::new(registry, EventBus::new())
        .run(specs, options, rx)
        .await
}

/// Manifest text with the timestamp lines removed
fn manifest_without_timestamps(path: &Utf8Path) -> String {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .filter(|line| !line.starts_with("generated_at"))
        .collect::<Vec<_>>()
        .join("\n")
}

struct FailingEncoder;

impl CodecEncoder for FailingEncoder {
    fn format(&self) -> ContainerFormat {
        ContainerFormat::Wav
    }

    fn name(&self) -> &str {
        "failing"
    }

    fn probe(&self) -> ProbeFuture<'_> {
        Box::pin(async { Ok(()) })
    }

    fn encode<'a>(&'a self, _request: EncodeRequest<'a>) -> EncodeFuture<'a> {
        Box::pin(async { Err(FixtureError::EncodingFailed("encoder exited with 1".to_string())) })
    }
}

struct HungEncoder;

impl CodecEncoder for HungEncoder {
    fn format(&self) -> ContainerFormat {
        ContainerFormat::Wav
    }

    fn name(&self) -> &str {
        "hung"
    }

    fn probe(&self) -> ProbeFuture<'_> {
        Box::pin(async { Ok(()) })
    }

    fn encode<'a>(&'a self, _request: EncodeRequest<'a>) -> EncodeFuture<'a> {
        Box::pin(async {
            std::future::pending::<()>().await;
            Ok(Vec::new())
        })
    }
}

struct AbsentEncoder(ContainerFormat);

impl CodecEncoder for AbsentEncoder {
    fn format(&self) -> ContainerFormat {
        self.0
    }

    fn name(&self) -> &str {
        "absent"
    }

    fn probe(&self) -> ProbeFuture<'_> {
        Box::pin(async { Err(FixtureError::missing_tool(self.0.family(), "not installed")) })
    }

    fn encode<'a>(&'a self, _request: EncodeRequest<'a>) -> EncodeFuture<'a> {
        Box::pin(async { Err(FixtureError::EncodingFailed("absent encoder was scheduled".to_string())) })
    }
}

#[tokio::test]
async fn test_generates_fixtures_and_manifest() {
    let ws = workspace();
    let options = options(&ws.target);

    let report = generate(wav_registry(), wav_specs(), &options).await.unwrap();

    assert!(report.is_success());
    assert!(report.manifest_committed);
    assert_eq!(report.generated, vec!["wav_tone_basic", "wav_quiet_basic"]);

    let manifest = Manifest::load(&options.manifest_path()).unwrap().unwrap();
    assert_eq!(manifest.entries.len(), 2);
    for entry in &manifest.entries {
        let path = ws.target.join(&entry.file);
        assert_eq!(checksum_file(&path).unwrap(), entry.checksum);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), entry.size);
        assert!(entry.checksum.starts_with("sha256:"));
    }
    assert!(manifest.check_drift(&ws.target).is_empty());

    // Nothing but fixtures and the manifest is left behind
    let mut names: Vec<String> = std::fs::read_dir(&ws.target)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, vec!["manifest.toml", "wav_quiet_basic.wav", "wav_tone_basic.wav"]);
}

#[tokio::test]
async fn test_artwork_recorded_in_manifest() {
    let ws = workspace();
    let options = options(&ws.target);
    let specs = small_matrix(&[ContainerFormat::Wav], "artwork").expand().unwrap();

    let report = generate(wav_registry(), specs, &options).await.unwrap();
    assert!(report.is_success(), "{:?}", report.failures);

    let manifest = Manifest::load(&options.manifest_path()).unwrap().unwrap();
    let entry = manifest.get("wav_tone_artwork").unwrap();
    let cover = entry.tags.cover().unwrap();
    assert_eq!((cover.width, cover.height, cover.color), (100, 100, [255, 0, 0]));

    let read = audiofix_codec::MetadataInjector::read_file(&ws.target.join(&entry.file)).unwrap();
    assert_eq!(read, entry.tags);
}

#[tokio::test]
async fn test_regeneration_is_idempotent() {
    let ws = workspace();
    let options = options(&ws.target);

    generate(wav_registry(), wav_specs(), &options).await.unwrap();
    let first = manifest_without_timestamps(&options.manifest_path());

    let report = generate(wav_registry(), wav_specs(), &options).await.unwrap();
    assert!(report.drift.is_empty());
    let second = manifest_without_timestamps(&options.manifest_path());

    assert_eq!(first, second);
}

#[tokio::test]
async fn test_drift_refused_without_force() {
    let ws = workspace();
    let options = options(&ws.target);
    generate(wav_registry(), wav_specs(), &options).await.unwrap();

    let edited = ws.target.join("wav_tone_basic.wav");
    std::fs::write(&edited, b"hand curated").unwrap();

    let err = generate(wav_registry(), wav_specs(), &options).await.unwrap_err();
    assert!(matches!(err, FixtureError::ManifestDrift { ref fixture_id, .. } if fixture_id == "wav_tone_basic"));

    // The hand edit survives
    assert_eq!(std::fs::read(&edited).unwrap(), b"hand curated");
}

#[tokio::test]
async fn test_drift_overwritten_with_force() {
    let ws = workspace();
    let mut options = options(&ws.target);
    generate(wav_registry(), wav_specs(), &options).await.unwrap();

    std::fs::write(ws.target.join("wav_tone_basic.wav"), b"hand curated").unwrap();
    options.overwrite = OverwritePolicy::Force;

    let report = generate(wav_registry(), wav_specs(), &options).await.unwrap();
    assert_eq!(report.drift.len(), 1);
    assert!(report.manifest_committed);

    let manifest = Manifest::load(&options.manifest_path()).unwrap().unwrap();
    assert!(manifest.check_drift(&ws.target).is_empty());
}

#[tokio::test]
async fn test_dry_run_writes_nothing() {
    let ws = workspace();
    let mut options = options(&ws.target);
    options.dry_run = true;

    let report = generate(wav_registry(), wav_specs(), &options).await.unwrap();

    assert!(report.dry_run);
    assert_eq!(report.planned.len(), 2);
    assert!(report.generated.is_empty());
    assert!(!ws.target.exists());
}

#[tokio::test]
async fn test_failed_encoder_skips_manifest() {
    let ws = workspace();
    let options = options(&ws.target);
    let mut registry = EncoderRegistry::new();
    registry.register(Arc::new(FailingEncoder));

    let report = generate(registry, wav_specs(), &options).await.unwrap();

    assert!(!report.is_success());
    assert!(!report.manifest_committed);
    assert_eq!(report.failures.len(), 2);
    assert!(report.failures.iter().all(|f| f.kind == FailureKind::EncodingFailed));
    assert!(!options.manifest_path().exists());

    // Staging directory is gone too
    assert_eq!(std::fs::read_dir(&ws.target).unwrap().count(), 0);
}

#[tokio::test]
async fn test_hung_encoder_times_out() {
    let ws = workspace();
    let mut options = options(&ws.target);
    options.encoder_timeout = Duration::from_millis(100);
    let mut registry = EncoderRegistry::new();
    registry.register(Arc::new(HungEncoder));

    let report = generate(registry, wav_specs(), &options).await.unwrap();

    assert_eq!(report.failures.len(), 2);
    for failure in &report.failures {
        assert_eq!(failure.kind, FailureKind::EncodingFailed);
        assert!(failure.message.contains("timed out"), "{}", failure.message);
    }
}

#[tokio::test]
async fn test_missing_family_reported_once() {
    let ws = workspace();
    let options = options(&ws.target);
    let mut registry = wav_registry();
    registry.register(Arc::new(AbsentEncoder(ContainerFormat::Flac)));

    let specs = small_matrix(&[ContainerFormat::Flac, ContainerFormat::Wav], "minimal")
        .expand()
        .unwrap();
    let report = generate(registry, specs, &options).await.unwrap();

    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].format, ContainerFormat::Flac);
    assert_eq!(report.skipped[0].fixtures, 2);
    assert!(report.failures.is_empty());
    assert!(report.manifest_committed);
    assert_eq!(report.generated.len(), 2);
    assert_eq!(exit_code(report.failure_kinds()), 2);
}

#[tokio::test]
async fn test_filtered_run_carries_over_other_formats() {
    let ws = workspace();
    let mut options = options(&ws.target);
    let specs = small_matrix(&[ContainerFormat::Flac, ContainerFormat::Wav], "minimal")
        .expand()
        .unwrap();
    let registry = || {
        let mut registry = wav_registry();
        registry.register(Arc::new(AbsentEncoder(ContainerFormat::Flac)));
        registry
    };

    generate(registry(), specs.clone(), &options).await.unwrap();

    options.formats = Some(vec![ContainerFormat::Flac]);
    let report = generate(registry(), specs, &options).await.unwrap();
    assert!(report.generated.is_empty());

    let manifest = Manifest::load(&options.manifest_path()).unwrap().unwrap();
    let ids: Vec<_> = manifest.entries.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["wav_tone_minimal", "wav_quiet_minimal"]);
}

#[tokio::test]
async fn test_cancellation_discards_output() {
    let ws = workspace();
    let options = options(&ws.target);
    let mut registry = EncoderRegistry::new();
    registry.register(Arc::new(HungEncoder));

    let (tx, rx) = watch::channel(false);
    let generator = Generator::new(registry, EventBus::new());

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let _ = tx.send(true);
    });

    let report = generator.run(wav_specs(), &options, rx).await.unwrap();
    canceller.await.unwrap();

    assert!(report.cancelled);
    assert!(report.failures.iter().all(|f| f.kind == FailureKind::Cancelled));
    assert!(!report.manifest_committed);
    assert!(!options.manifest_path().exists());
    assert_eq!(exit_code(report.failure_kinds()), EXIT_FIXTURE_FAILURE);
}

#[tokio::test]
async fn test_cancel_before_run_writes_nothing() {
    let ws = workspace();
    let options = options(&ws.target);

    let (tx, rx) = watch::channel(false);
    tx.send(true).unwrap();

    let report = Generator::new(wav_registry(), EventBus::new())
        .run(wav_specs(), &options, rx)
        .await
        .unwrap();

    assert!(report.cancelled);
    assert!(!report.manifest_committed);
    assert!(report.generated.is_empty());
    assert!(!ws.target.exists());
    assert_eq!(exit_code(report.failure_kinds()), EXIT_FIXTURE_FAILURE);
}

#[tokio::test]
async fn test_failed_manifest_write_keeps_previous_state() {
    let ws = workspace();
    let options = options(&ws.target);
    let first = create_test_spec("tone", ContainerFormat::Wav, sine_1khz_stereo(), TagSet::new());
    generate(wav_registry(), vec![first], &options).await.unwrap();

    let fixture = ws.target.join("tone.wav");
    let before = std::fs::read(&fixture).unwrap();

    // A directory where the staged manifest goes makes the write fail
    std::fs::create_dir(staged_path(&options.manifest_path())).unwrap();

    let changed = create_test_spec(
        "tone",
        ContainerFormat::Wav,
        ReferenceSignal::sine(440.0, 44100, 2, 1.0),
        TagSet::new(),
    );
    assert!(generate(wav_registry(), vec![changed], &options).await.is_err());

    assert_eq!(std::fs::read(&fixture).unwrap(), before);
    let manifest = Manifest::load(&options.manifest_path()).unwrap().unwrap();
    assert!(manifest.check_drift(&ws.target).is_empty());
}

#[tokio::test]
async fn test_failed_fixture_move_leaves_no_stale_manifest() {
    let ws = workspace();
    let options = options(&ws.target);
    let first = create_test_spec("tone", ContainerFormat::Wav, sine_1khz_stereo(), TagSet::new());
    generate(wav_registry(), vec![first], &options).await.unwrap();

    // A non-empty directory in the way of the second fixture
    let blocker = ws.target.join("blocker.wav");
    std::fs::create_dir(&blocker).unwrap();
    std::fs::write(blocker.join("keep"), b"x").unwrap();

    let specs = vec![
        create_test_spec(
            "tone",
            ContainerFormat::Wav,
            ReferenceSignal::sine(440.0, 44100, 2, 1.0),
            TagSet::new(),
        ),
        create_test_spec("blocker", ContainerFormat::Wav, sine_1khz_stereo(), TagSet::new()),
    ];
    assert!(generate(wav_registry(), specs, &options).await.is_err());

    // tone.wav was replaced, so no manifest may still vouch for the old bytes
    let manifest_path = options.manifest_path();
    assert!(!manifest_path.exists());
    assert!(!staged_path(&manifest_path).exists());
}

#[tokio::test]
async fn test_events_follow_the_run() {
    let ws = workspace();
    let options = options(&ws.target);
    let events = EventBus::new();
    let mut rx = events.subscribe();
    let (_tx, shutdown) = watch::channel(false);

    Generator::new(wav_registry(), events)
        .run(wav_specs(), &options, shutdown)
        .await
        .unwrap();

    let mut seen = Vec::new();
    while let Ok(event) = rx.try_recv() {
        seen.push(event);
    }

    assert!(matches!(seen.first(), Some(Event::GenerationStarted { total: 2 })));
    assert!(seen.iter().any(|e| matches!(e, Event::ManifestCommitted { entries: 2 })));
    assert!(matches!(
        seen.last(),
        Some(Event::GenerationFinished { generated: 2, failed: 0 })
    ));
}

#[tokio::test]
async fn test_verify_after_generate() {
    let ws = workspace();
    let options = options(&ws.target);
    generate(wav_registry(), wav_specs(), &options).await.unwrap();

    let engine = VerificationEngine::symphonia();
    let events = EventBus::new();

    let report = run_verification(&engine, &options, &events).unwrap();
    assert_eq!(report.passed(), 2, "{:?}", report.results);
    assert_eq!(exit_code(report.failure_kinds()), EXIT_SUCCESS);

    std::fs::write(ws.target.join("wav_quiet_basic.wav"), b"stale").unwrap();
    let report = run_verification(&engine, &options, &events).unwrap();
    assert_eq!(report.failed(), 1);

    let drifted = report
        .results
        .iter()
        .find(|r| r.fixture_id == "wav_quiet_basic")
        .unwrap();
    assert_eq!(drifted.failure_kind(), Some(FailureKind::ManifestDrift));
    assert_eq!(exit_code(report.failure_kinds()), EXIT_DRIFT);
}

#[tokio::test]
async fn test_verify_without_manifest_fails() {
    let ws = workspace();
    let options = options(&ws.target);
    let result = run_verification(&VerificationEngine::symphonia(), &options, &EventBus::new());
    assert!(matches!(result, Err(FixtureError::Manifest(_))));
}
