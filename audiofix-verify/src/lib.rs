pub mod decoder;
pub mod engine;
pub mod spectral;

pub use decoder::{DecodedAudio, PcmDecoder, SymphoniaDecoder};
pub use engine::{FailureDetail, Metrics, VerificationEngine, VerificationResult};
