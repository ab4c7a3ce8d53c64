use std::path::Path;
use std::sync::Mutex;

use log::info;
use ndarray::Array2;
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::Tensor,
};

use crate::audio_processor::Waveform;
use crate::error::ClassifyError;

/// Per-frame class scores, shape `[frames, classes]`.
pub type ScoreMatrix = Array2<f32>;

/// Anything that maps a 16 kHz mono waveform to per-frame scores.
///
/// Callers guarantee the waveform is already at the model's rate; no
/// validation happens here.
pub trait ScoreModel: Send + Sync {
    fn infer(&self, waveform: &Waveform) -> Result<ScoreMatrix, ClassifyError>;
}

/// ONNX export of the pretrained classifier.
///
/// `Session::run` needs `&mut self`, so calls are serialized through a mutex.
pub struct OnnxClassifier {
    session: Mutex<Session>,
}

impl OnnxClassifier {
    pub fn load<P: AsRef<Path>>(model_path: P, intra_threads: usize) -> Result<Self, ClassifyError> {
        let model_path = model_path.as_ref();
        if !model_path.is_file() {
            return Err(ClassifyError::Startup(format!(
                "model file not found: {}",
                model_path.display()
            )));
        }

        let session = Session::builder()
            .map_err(|e| ClassifyError::Startup(format!("session builder: {e}")))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| ClassifyError::Startup(format!("optimization level: {e}")))?
            .with_intra_threads(intra_threads.max(1))
            .map_err(|e| ClassifyError::Startup(format!("intra threads: {e}")))?
            .commit_from_file(model_path)
            .map_err(|e| ClassifyError::Startup(format!("load model: {e}")))?;

        info!("Model loaded from {}", model_path.display());
        for input in session.inputs() {
            info!("  input: {}", input.name());
        }
        for output in session.outputs() {
            info!("  output: {}", output.name());
        }

        Ok(Self {
            session: Mutex::new(session),
        })
    }
}

impl ScoreModel for OnnxClassifier {
    fn infer(&self, waveform: &Waveform) -> Result<ScoreMatrix, ClassifyError> {
        let input = Tensor::from_array((vec![waveform.len()], waveform.samples.clone()))
            .map_err(|e| ClassifyError::Inference(format!("waveform tensor: {e}")))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| ClassifyError::Inference("model session poisoned".into()))?;

        // Output 0 is the score tensor; embeddings and spectrogram follow it.
        let outputs = session
            .run(ort::inputs![input])
            .map_err(|e| ClassifyError::Inference(format!("run: {e}")))?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ClassifyError::Inference(format!("extract scores: {e}")))?;
        let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();

        scores_from_raw(&dims, data)
    }
}

/// Reshape a flat score buffer into `[frames, classes]`.
///
/// Leading unit axes are squeezed; a 1-D tensor is a single frame.
pub fn scores_from_raw(dims: &[usize], data: &[f32]) -> Result<ScoreMatrix, ClassifyError> {
    let mut dims = dims;
    while dims.len() > 2 && dims[0] == 1 {
        dims = &dims[1..];
    }

    let shape = match *dims {
        [classes] => (1, classes),
        [frames, classes] => (frames, classes),
        _ => {
            return Err(ClassifyError::Inference(format!(
                "unexpected score tensor shape: {dims:?}"
            )))
        }
    };

    Array2::from_shape_vec(shape, data.to_vec())
        .map_err(|e| ClassifyError::Inference(format!("reshape scores {shape:?}: {e}")))
}
