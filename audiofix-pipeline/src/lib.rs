pub mod generate;
pub mod manifest;
pub mod outcome;
pub mod verify_run;

pub use generate::{FixtureFailure, GenerationReport, Generator, SkippedFamily};
pub use manifest::{DriftKind, DriftReport, Manifest, ManifestEntry};
pub use verify_run::{VerifyReport, run_verification, verify_manifest};
