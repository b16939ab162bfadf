use crate::{GenerateArgs, VerifyArgs};
use anyhow::{Context, Result};
use audiofix_codec::EncoderRegistry;
use audiofix_core::config::{Config, OverwritePolicy, RunOptions};
use audiofix_core::event::{Event, EventBus};
use audiofix_core::format::ContainerFormat;
use audiofix_core::state::GenerationState;
use audiofix_pipeline::outcome::exit_code;
use audiofix_pipeline::{Generator, run_verification};
use audiofix_verify::VerificationEngine;
use std::time::Duration;
use tokio::signal;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

pub async fn generate(config: Config, args: GenerateArgs) -> Result<u8> {
    let options = generate_options(&config, &args);
    let specs = config.matrix.expand()?;

    info!("Matrix expands to {} fixtures", specs.len());
    info!("Fixture directory: {}", options.target_dir);

    let registry = EncoderRegistry::with_defaults(config.generation.ffmpeg_path.as_std_path());
    let events = EventBus::new();
    let progress = spawn_progress_logger(&events);

    // Spawn task to handle shutdown signals
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                warn!("Received SIGINT, cancelling generation...");
                let _ = shutdown_tx.send(true);
            }
            Err(err) => {
                error!("Unable to listen for shutdown signal: {}", err);
            }
        }
    });

    let result = Generator::new(registry, events)
        .run(specs, &options, shutdown_rx)
        .await;
    progress.abort();
    let report = result?;

    if report.dry_run {
        for id in &report.planned {
            info!("would generate {}", id);
        }
    }
    for skipped in &report.skipped {
        warn!(
            "{}: {} fixtures skipped ({})",
            skipped.format, skipped.fixtures, skipped.reason
        );
    }
    for failure in &report.failures {
        error!("{} [{}] {}", failure.fixture_id, failure.kind, failure.message);
    }

    Ok(exit_code(report.failure_kinds()))
}

pub async fn verify(config: Config, args: VerifyArgs) -> Result<u8> {
    let options = verify_options(&config, &args);
    info!("Verifying fixtures in {}", options.target_dir);

    let report = tokio::task::spawn_blocking(move || {
        let events = EventBus::new();
        let engine = VerificationEngine::symphonia().with_events(events.clone());
        run_verification(&engine, &options, &events)
    })
    .await
    .context("verification task failed")??;

    Ok(exit_code(report.failure_kinds()))
}

fn generate_options(config: &Config, args: &GenerateArgs) -> RunOptions {
    let mut options = RunOptions::from_config(config);

    // Override with CLI arguments
    if let Some(target_dir) = &args.target_dir {
        options.target_dir = target_dir.clone();
    }
    options.formats = format_filter(&args.format);
    if args.force {
        options.overwrite = OverwritePolicy::Force;
    }
    options.dry_run = args.dry_run;
    if let Some(workers) = args.workers {
        options.workers = workers.max(1);
    }
    if let Some(timeout) = args.timeout {
        options.encoder_timeout = Duration::from_secs(timeout.max(1));
    }
    options
}

fn verify_options(config: &Config, args: &VerifyArgs) -> RunOptions {
    let mut options = RunOptions::from_config(config);
    if let Some(target_dir) = &args.target_dir {
        options.target_dir = target_dir.clone();
    }
    options.formats = format_filter(&args.format);
    options
}

fn format_filter(formats: &[ContainerFormat]) -> Option<Vec<ContainerFormat>> {
    (!formats.is_empty()).then(|| formats.to_vec())
}

/// Log one line per encoded fixture
fn spawn_progress_logger(events: &EventBus) -> JoinHandle<()> {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        let mut total = 0;
        let mut encoded = 0;
        loop {
            match rx.recv().await {
                Ok(Event::GenerationStarted { total: n }) => total = n,
                Ok(Event::FixtureStateChanged { id, state: GenerationState::Tagging }) => {
                    encoded += 1;
                    info!("[{}/{}] {} encoded", encoded, total, id);
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Progress log skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generate_args() -> GenerateArgs {
        GenerateArgs {
            target_dir: None,
            format: Vec::new(),
            force: false,
            dry_run: false,
            workers: None,
            timeout: None,
        }
    }

    #[test]
    fn test_config_values_without_flags() {
        let config = Config::default();
        let options = generate_options(&config, &generate_args());

        assert_eq!(options.target_dir, config.general.target_dir);
        assert_eq!(options.overwrite, OverwritePolicy::Refuse);
        assert!(options.formats.is_none());
        assert_eq!(options.encoder_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_flags_override_config() {
        let args = GenerateArgs {
            target_dir: Some("out".into()),
            format: vec![ContainerFormat::Flac, ContainerFormat::Mp3],
            force: true,
            dry_run: true,
            workers: Some(0),
            timeout: Some(5),
        };
        let options = generate_options(&Config::default(), &args);

        assert_eq!(options.target_dir.as_str(), "out");
        assert_eq!(
            options.formats,
            Some(vec![ContainerFormat::Flac, ContainerFormat::Mp3])
        );
        assert_eq!(options.overwrite, OverwritePolicy::Force);
        assert!(options.dry_run);
        assert_eq!(options.workers, 1);
        assert_eq!(options.encoder_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_verify_format_filter() {
        let args = VerifyArgs {
            target_dir: None,
            format: vec![ContainerFormat::Wav],
        };
        let options = verify_options(&Config::default(), &args);
        assert!(options.includes(ContainerFormat::Wav));
        assert!(!options.includes(ContainerFormat::Opus));
    }
}
