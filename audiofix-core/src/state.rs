use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-fixture generation state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GenerationState {
    Pending,
    Synthesizing,
    Encoding,
    Tagging,
    ManifestRecorded,
    Failed,
}

impl GenerationState {
    pub fn can_transition_to(&self, next: GenerationState) -> bool {
        use GenerationState::*;
        matches!(
            (self, next),
            (Pending, Synthesizing)
                | (Synthesizing, Encoding)
                | (Encoding, Tagging)
                | (Tagging, ManifestRecorded)
                | (Synthesizing | Encoding | Tagging, Failed)
        )
    }
}

impl Default for GenerationState {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for GenerationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GenerationState::Pending => "pending",
            GenerationState::Synthesizing => "synthesizing",
            GenerationState::Encoding => "encoding",
            GenerationState::Tagging => "tagging",
            GenerationState::ManifestRecorded => "manifest_recorded",
            GenerationState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Per-fixture verification state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationState {
    Loaded,
    Decoded,
    Compared,
    Passed,
    Failed,
}

impl VerificationState {
    pub fn can_transition_to(&self, next: VerificationState) -> bool {
        use VerificationState::*;
        matches!(
            (self, next),
            (Loaded, Decoded)
                | (Decoded, Compared)
                | (Compared, Passed)
                | (Loaded | Decoded | Compared, Failed)
        )
    }
}

impl fmt::Display for VerificationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VerificationState::Loaded => "loaded",
            VerificationState::Decoded => "decoded",
            VerificationState::Compared => "compared",
            VerificationState::Passed => "passed",
            VerificationState::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_happy_path() {
        use GenerationState::*;
        let path = [Pending, Synthesizing, Encoding, Tagging, ManifestRecorded];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_generation_failure_edges() {
        use GenerationState::*;
        assert!(Synthesizing.can_transition_to(Failed));
        assert!(Encoding.can_transition_to(Failed));
        assert!(Tagging.can_transition_to(Failed));
        assert!(!Pending.can_transition_to(Failed));
        assert!(!ManifestRecorded.can_transition_to(Failed));
        assert!(!Pending.can_transition_to(Encoding));
    }

    #[test]
    fn test_verification_edges() {
        use VerificationState::*;
        assert!(Loaded.can_transition_to(Decoded));
        assert!(Compared.can_transition_to(Passed));
        assert!(Loaded.can_transition_to(Failed));
        assert!(!Passed.can_transition_to(Failed));
    }
}
