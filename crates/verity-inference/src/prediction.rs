//! Probability to label conversion.

use verity_core::{Error, Label, Prediction, Result};

/// Turn a model probability into a labelled prediction.
///
/// `p >= threshold` is "AI Generated" with confidence `p`; anything lower is
/// "Real" with confidence `1 - p`. Confidence is a percentage rounded to two
/// decimals.
pub fn from_probability(p: f32, threshold: f32) -> Result<Prediction> {
    if !(0.0..=1.0).contains(&p) {
        return Err(Error::Inference(format!(
            "Model returned probability outside [0, 1]: {}",
            p
        )));
    }
    let (label, confidence) = if p >= threshold {
        (Label::AiGenerated, p)
    } else {
        (Label::Real, 1.0 - p)
    };
    Ok(Prediction {
        label,
        confidence: round_percent(confidence),
    })
}

/// Fraction to percentage with two decimals.
pub fn round_percent(fraction: f32) -> f32 {
    ((fraction as f64 * 100.0 * 100.0).round() / 100.0) as f32
}

/// Reject batches the model cannot take.
pub fn ensure_valid_batch(len: usize, max: usize) -> Result<()> {
    if len == 0 || len > max {
        return Err(Error::InvalidInput(format!(
            "Batch must contain 1 to {} images, got {}",
            max, len
        )));
    }
    Ok(())
}
