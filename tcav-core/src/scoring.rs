//! TCAV score and per-example concept scores.

use crate::error::TcavError;
use crate::linalg::{dot, l2_norm};
use crate::types::ModelOutput;
use serde::{Deserialize, Serialize};

/// Fraction of directional derivatives that are strictly positive.
///
/// 0.5 means the concept neither helps nor hurts the explained class.
pub fn tcav_score(dir_derivs: &[f64]) -> Result<f64, TcavError> {
    if dir_derivs.is_empty() {
        return Err(TcavError::degenerate(
            "no dataset examples match class_to_explain",
        ));
    }
    let positive = dir_derivs.iter().filter(|&&d| d > 0.0).count();
    Ok(positive as f64 / dir_derivs.len() as f64)
}

/// Per-example similarity between each embedding and the CAV.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalScores {
    pub cos_sim: Vec<f64>,
    pub dot_prods: Vec<f64>,
}

/// Dot product and cosine similarity of every dataset embedding with `cav`.
pub fn local_scores(
    cav: &[f64],
    dataset_outputs: &[ModelOutput],
    emb_layer: &str,
) -> Result<LocalScores, TcavError> {
    let cav_magnitude = l2_norm(cav);
    if cav_magnitude == 0.0 {
        return Err(TcavError::degenerate("CAV has zero magnitude"));
    }

    let mut scores = LocalScores {
        cos_sim: Vec::with_capacity(dataset_outputs.len()),
        dot_prods: Vec::with_capacity(dataset_outputs.len()),
    };
    for (index, output) in dataset_outputs.iter().enumerate() {
        let emb = output.vector(emb_layer)?;
        if emb.len() != cav.len() {
            return Err(TcavError::DimensionMismatch {
                expected: cav.len(),
                actual: emb.len(),
            });
        }
        let dot_prod = dot(cav, &emb);
        let emb_magnitude = l2_norm(&emb);
        if emb_magnitude == 0.0 {
            return Err(TcavError::degenerate(format!(
                "embedding of dataset example {index} has zero magnitude"
            )));
        }
        let cos = (dot_prod / (emb_magnitude * cav_magnitude)).clamp(-1.0, 1.0);
        scores.dot_prods.push(dot_prod);
        scores.cos_sim.push(cos);
    }
    Ok(scores)
}
