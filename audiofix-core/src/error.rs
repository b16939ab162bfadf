use serde::Serialize;
use thiserror::Error;

/// Coarse classification of a failure, used for reporting and exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    MissingTool,
    UnsupportedParameterCombination,
    EncodingFailed,
    TagRoundTripMismatch,
    VerificationMismatch,
    ManifestDrift,
    Cancelled,
    Other,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::MissingTool => "missing_tool",
            FailureKind::UnsupportedParameterCombination => "unsupported_parameter_combination",
            FailureKind::EncodingFailed => "encoding_failed",
            FailureKind::TagRoundTripMismatch => "tag_round_trip_mismatch",
            FailureKind::VerificationMismatch => "verification_mismatch",
            FailureKind::ManifestDrift => "manifest_drift",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Other => "other",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum FixtureError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported parameter combination for {format}: {reason}")]
    UnsupportedParameterCombination { format: String, reason: String },

    #[error("Missing tool for {format}: {detail}")]
    MissingTool { format: String, detail: String },

    #[error("Encoding failed: {0}")]
    EncodingFailed(String),

    #[error("Tag round trip mismatch: {0}")]
    TagRoundTripMismatch(String),

    #[error("Verification mismatch: {0}")]
    VerificationMismatch(String),

    #[error("Manifest drift for {fixture_id}: {detail}")]
    ManifestDrift { fixture_id: String, detail: String },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Tag error: {0}")]
    Tag(String),

    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("Cancelled")]
    Cancelled,
}

impl FixtureError {
    pub fn unsupported(format: impl Into<String>, reason: impl Into<String>) -> Self {
        FixtureError::UnsupportedParameterCombination {
            format: format.into(),
            reason: reason.into(),
        }
    }

    pub fn missing_tool(format: impl Into<String>, detail: impl Into<String>) -> Self {
        FixtureError::MissingTool {
            format: format.into(),
            detail: detail.into(),
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            FixtureError::MissingTool { .. } => FailureKind::MissingTool,
            FixtureError::UnsupportedParameterCombination { .. } | FixtureError::Config(_) => {
                FailureKind::UnsupportedParameterCombination
            }
            FixtureError::EncodingFailed(_) => FailureKind::EncodingFailed,
            FixtureError::TagRoundTripMismatch(_) | FixtureError::Tag(_) => {
                FailureKind::TagRoundTripMismatch
            }
            FixtureError::VerificationMismatch(_) | FixtureError::Decode(_) => {
                FailureKind::VerificationMismatch
            }
            FixtureError::ManifestDrift { .. } => FailureKind::ManifestDrift,
            FixtureError::Cancelled => FailureKind::Cancelled,
            FixtureError::Io(_) | FixtureError::Manifest(_) => FailureKind::Other,
        }
    }
}

pub type Result<T> = std::result::Result<T, FixtureError>;
