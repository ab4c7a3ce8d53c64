use ndarray::Axis;
use serde::Serialize;

use crate::error::ClassifyError;
use crate::labels::LabelTable;
use crate::model_inference::ScoreMatrix;

/// Top class for a clip and its mean score as a percentage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationResult {
    pub class: String,
    pub confidence: f64,
}

/// Mean over frames, then first-max argmax.
///
/// Confidence is the winning mean score scaled by 100 and rounded to two
/// decimals.
pub fn aggregate(
    scores: &ScoreMatrix,
    labels: &LabelTable,
) -> Result<ClassificationResult, ClassifyError> {
    let (frames, classes) = scores.dim();
    if frames == 0 || classes == 0 {
        return Err(ClassifyError::Inference(format!(
            "empty score matrix ({frames} frames x {classes} classes)"
        )));
    }
    if scores.iter().any(|s| !s.is_finite()) {
        return Err(ClassifyError::Inference("non-finite model score".into()));
    }

    let mean = scores
        .mean_axis(Axis(0))
        .ok_or_else(|| ClassifyError::Inference("cannot average zero frames".into()))?;

    let (top_class, top_score) = argmax_first(mean.iter().copied())
        .ok_or_else(|| ClassifyError::Inference("no class scores".into()))?;

    let class = labels.name_at(top_class).ok_or_else(|| {
        ClassifyError::Inference(format!(
            "class index {top_class} outside label table of {}",
            labels.len()
        ))
    })?;

    Ok(ClassificationResult {
        class: class.to_string(),
        confidence: to_percent(top_score),
    })
}

/// Index and value of the maximum; ties keep the earliest index.
fn argmax_first<I: IntoIterator<Item = f32>>(values: I) -> Option<(usize, f32)> {
    values
        .into_iter()
        .enumerate()
        .fold(None, |best, (idx, v)| match best {
            Some((_, b)) if v <= b => best,
            _ => Some((idx, v)),
        })
}

fn to_percent(score: f32) -> f64 {
    (f64::from(score) * 100.0 * 100.0).round() / 100.0
}
