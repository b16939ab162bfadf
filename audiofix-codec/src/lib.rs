pub mod encoder;
pub mod ffmpeg;
pub mod metadata;
pub mod wav;

pub use encoder::{
    CodecEncoder, EncodeFuture, EncodeRequest, EncoderRegistry, ProbeFuture, encode_with_timeout,
};
pub use ffmpeg::FfmpegEncoder;
pub use metadata::MetadataInjector;
pub use wav::WavEncoder;
