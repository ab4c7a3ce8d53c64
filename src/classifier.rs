use std::time::Instant;

use log::{debug, info};

use crate::aggregator::{aggregate, ClassificationResult};
use crate::audio_processor::{AudioProcessor, MediaHint, Waveform};
use crate::error::ClassifyError;
use crate::labels::LabelTable;
use crate::model_inference::ScoreModel;
use crate::MODEL_SAMPLE_RATE;

/// Process-wide, read-only state shared by every request.
pub struct SoundClassifier {
    audio: AudioProcessor,
    model: Box<dyn ScoreModel>,
    labels: LabelTable,
}

impl SoundClassifier {
    /// Assemble the context and check that the model's score width matches
    /// the label table by scoring one second of silence.
    pub fn new(
        audio: AudioProcessor,
        model: Box<dyn ScoreModel>,
        labels: LabelTable,
    ) -> Result<Self, ClassifyError> {
        let classifier = Self {
            audio,
            model,
            labels,
        };
        classifier.check_label_width()?;
        Ok(classifier)
    }

    /// Default symphonia decoder and sinc resampler targeting the model rate.
    pub fn with_default_audio(
        model: Box<dyn ScoreModel>,
        labels: LabelTable,
    ) -> Result<Self, ClassifyError> {
        Self::new(AudioProcessor::new(MODEL_SAMPLE_RATE), model, labels)
    }

    fn check_label_width(&self) -> Result<(), ClassifyError> {
        let rate = self.audio.target_sample_rate();
        let silence = Waveform::new(vec![0.0; rate as usize], rate);
        let scores = self
            .model
            .infer(&silence)
            .map_err(|e| ClassifyError::Startup(format!("warm-up inference failed: {e}")))?;

        let width = scores.ncols();
        if width != self.labels.len() {
            return Err(ClassifyError::Startup(format!(
                "model emits {width} classes but the label table has {}",
                self.labels.len()
            )));
        }

        info!(
            "Classifier ready: {} classes at {} Hz",
            width,
            self.audio.target_sample_rate()
        );
        Ok(())
    }

    /// Decode, resample, score and aggregate one uploaded clip.
    pub fn classify(
        &self,
        bytes: &[u8],
        hint: &MediaHint,
    ) -> Result<ClassificationResult, ClassifyError> {
        let started = Instant::now();

        let waveform = self.audio.prepare(bytes, hint)?;
        debug!(
            "prepared {:.2}s of audio ({} samples)",
            waveform.duration_secs(),
            waveform.len()
        );

        let scores = self.model.infer(&waveform)?;
        debug!("model returned {} frames", scores.nrows());

        let result = aggregate(&scores, &self.labels)?;
        debug!(
            "classified as {} ({:.2}) in {:?}",
            result.class,
            result.confidence,
            started.elapsed()
        );
        Ok(result)
    }
}
