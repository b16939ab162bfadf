use audiofix_core::error::FailureKind;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FIXTURE_FAILURE: u8 = 1;
pub const EXIT_MISSING_TOOL: u8 = 2;
pub const EXIT_DRIFT: u8 = 3;
pub const EXIT_INVALID_CONFIG: u8 = 4;

/// Process exit code for a single failure kind
pub fn exit_code_for(kind: FailureKind) -> u8 {
    match kind {
        FailureKind::UnsupportedParameterCombination => EXIT_INVALID_CONFIG,
        FailureKind::ManifestDrift => EXIT_DRIFT,
        FailureKind::MissingTool => EXIT_MISSING_TOOL,
        FailureKind::EncodingFailed
        | FailureKind::TagRoundTripMismatch
        | FailureKind::VerificationMismatch
        | FailureKind::Cancelled
        | FailureKind::Other => EXIT_FIXTURE_FAILURE,
    }
}

/// Combine failures into one exit code
///
/// Precedence: invalid config, then fixture failures, then drift, then
/// missing tools. Missing tools alone still exit non-zero so automation can
/// tell an incomplete environment from a clean run.
pub fn exit_code<I>(kinds: I) -> u8
where
    I: IntoIterator<Item = FailureKind>,
{
    kinds
        .into_iter()
        .map(exit_code_for)
        .max_by_key(|&code| precedence(code))
        .unwrap_or(EXIT_SUCCESS)
}

fn precedence(code: u8) -> u8 {
    match code {
        EXIT_INVALID_CONFIG => 4,
        EXIT_FIXTURE_FAILURE => 3,
        EXIT_DRIFT => 2,
        EXIT_MISSING_TOOL => 1,
        _ => 0,
    }
}
