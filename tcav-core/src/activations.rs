//! Pulling activations out of model outputs.

use crate::error::TcavError;
use crate::model::Model;
use crate::types::{Example, ModelOutput};

/// Run `model` over `examples`, checking that exactly one output per input
/// came back.
pub fn predict_outputs(model: &dyn Model, examples: &[Example]) -> Result<Vec<ModelOutput>, TcavError> {
    let outputs = model.predict(examples)?;
    if outputs.len() != examples.len() {
        return Err(TcavError::model(format!(
            "model returned {} outputs for {} inputs",
            outputs.len(),
            examples.len()
        )));
    }
    Ok(outputs)
}

/// Read `emb_layer` from every output as one row of a matrix. All rows must
/// have the same width.
pub fn embedding_rows(outputs: &[ModelOutput], emb_layer: &str) -> Result<Vec<Vec<f64>>, TcavError> {
    let rows = outputs
        .iter()
        .map(|o| o.vector(emb_layer))
        .collect::<Result<Vec<_>, _>>()?;
    check_width(&rows)?;
    Ok(rows)
}

fn check_width(rows: &[Vec<f64>]) -> Result<(), TcavError> {
    if let Some(first) = rows.first() {
        let width = first.len();
        if let Some(bad) = rows.iter().find(|r| r.len() != width) {
            return Err(TcavError::DimensionMismatch {
                expected: width,
                actual: bad.len(),
            });
        }
    }
    Ok(())
}

/// Probe training data: comparison rows labelled 0 followed by concept rows
/// labelled 1.
pub fn training_data(
    comparison_outputs: &[ModelOutput],
    concept_outputs: &[ModelOutput],
    emb_layer: &str,
) -> Result<(Vec<Vec<f64>>, Vec<u8>), TcavError> {
    let mut x = embedding_rows(comparison_outputs, emb_layer)?;
    x.extend(embedding_rows(concept_outputs, emb_layer)?);

    let mut y = vec![0u8; comparison_outputs.len()];
    y.extend(std::iter::repeat_n(1u8, concept_outputs.len()));

    check_width(&x)?;
    Ok((x, y))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PrecomputedModel;
    use crate::types::OutputSpec;
    use std::collections::HashMap;

    struct ShortModel(OutputSpec);

    impl Model for ShortModel {
        fn output_spec(&self) -> &OutputSpec {
            &self.0
        }

        fn predict(&self, _inputs: &[Example]) -> Result<Vec<ModelOutput>, TcavError> {
            Ok(vec![ModelOutput::new()])
        }
    }

    #[test]
    fn test_predict_outputs_checks_count() {
        let model = ShortModel(OutputSpec::new());
        let err = predict_outputs(&model, &[Example::new("a"), Example::new("b")]).unwrap_err();
        assert!(matches!(err, TcavError::Model(_)));
    }

    #[test]
    fn test_predict_outputs_passes_through() {
        let mut model = PrecomputedModel::new(OutputSpec::new(), HashMap::new());
        model.insert("a", ModelOutput::new().with_vector("emb", &[1.0]));
        let outputs = predict_outputs(&model, &[Example::new("a")]).unwrap();
        assert_eq!(outputs.len(), 1);
    }

    #[test]
    fn test_training_data_labels_and_order() {
        let comparison = vec![
            ModelOutput::new().with_vector("emb", &[0.0, 1.0]),
            ModelOutput::new().with_vector("emb", &[0.0, 2.0]),
        ];
        let concept = vec![ModelOutput::new().with_vector("emb", &[3.0, 0.0])];

        let (x, y) = training_data(&comparison, &concept, "emb").unwrap();
        assert_eq!(y, vec![0, 0, 1]);
        assert_eq!(x[2], vec![3.0, 0.0]);
    }

    #[test]
    fn test_ragged_embeddings_rejected() {
        let comparison = vec![ModelOutput::new().with_vector("emb", &[0.0, 1.0])];
        let concept = vec![ModelOutput::new().with_vector("emb", &[3.0])];
        let err = training_data(&comparison, &concept, "emb").unwrap_err();
        assert!(matches!(
            err,
            TcavError::DimensionMismatch {
                expected: 2,
                actual: 1
            }
        ));
    }
}
