//! Directional derivatives of the explained class along a CAV.

use crate::error::TcavError;
use crate::linalg::dot;
use crate::model::GradientLayer;
use crate::types::ModelOutput;
use serde_json::Value;

/// Project the gradient of every output whose gradient class equals
/// `class_to_explain` onto `cav`.
///
/// The result has one entry per matching output, in dataset order, and is
/// empty when nothing matches.
pub fn directional_derivatives(
    cav: &[f64],
    dataset_outputs: &[ModelOutput],
    layer: &GradientLayer,
    class_to_explain: &Value,
) -> Result<Vec<f64>, TcavError> {
    let mut dir_derivs = Vec::new();
    for output in dataset_outputs {
        if output.get(&layer.grad_class_key) != Some(class_to_explain) {
            continue;
        }
        let grad = output.vector(&layer.grad_layer)?;
        if grad.len() != cav.len() {
            return Err(TcavError::DimensionMismatch {
                expected: cav.len(),
                actual: grad.len(),
            });
        }
        dir_derivs.push(dot(&grad, cav));
    }
    Ok(dir_derivs)
}
