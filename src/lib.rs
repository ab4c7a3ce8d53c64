pub mod aggregator;
pub mod audio_processor;
pub mod classifier;
pub mod config;
pub mod error;
pub mod labels;
pub mod model_inference;
pub mod resampler;
pub mod server;

pub use aggregator::{aggregate, ClassificationResult};
pub use audio_processor::{AudioDecoder, AudioProcessor, MediaHint, SymphoniaDecoder, Waveform};
pub use classifier::SoundClassifier;
pub use config::ServerConfig;
pub use error::ClassifyError;
pub use labels::LabelTable;
pub use model_inference::{OnnxClassifier, ScoreMatrix, ScoreModel};
pub use resampler::{Resample, SincResampler};

/// Input rate the model was trained on.
pub const MODEL_SAMPLE_RATE: u32 = 16_000;

pub type Result<T> = anyhow::Result<T>;
