//! The model contract TCAV consumes, plus an in-memory implementation backed
//! by precomputed outputs.

use crate::error::TcavError;
use crate::types::{Example, FieldSpec, ModelOutput, OutputSpec};
use std::collections::HashMap;

/// A model that can be explained with TCAV.
///
/// Implementations must be side-effect free per call: the pipeline invokes
/// `predict` once for the concept set, once for the dataset and once per
/// comparison split, possibly from several threads at once.
pub trait Model: Send + Sync {
    /// Names and roles of the fields each [`ModelOutput`] carries.
    fn output_spec(&self) -> &OutputSpec;

    /// Run inference, returning one output per input in the same order.
    fn predict(&self, inputs: &[Example]) -> Result<Vec<ModelOutput>, TcavError>;
}

/// The three output fields a TCAV run reads, resolved from the model's
/// output spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GradientLayer {
    /// Gradient field, as named in the config.
    pub grad_layer: String,
    /// Embedding field the gradients were taken with respect to.
    pub emb_layer: String,
    /// Field holding the class each gradient was computed for.
    pub grad_class_key: String,
}

impl GradientLayer {
    /// Look up `grad_layer` in `spec` and follow its links.
    pub fn resolve(spec: &OutputSpec, grad_layer: &str) -> Result<Self, TcavError> {
        let field = spec.get(grad_layer).ok_or_else(|| {
            TcavError::config(format!("grad_layer '{grad_layer}' not in model output spec"))
        })?;

        let (grad_for, grad_target) = match field {
            FieldSpec::Gradients {
                grad_for,
                grad_target,
            } => (grad_for, grad_target),
            other => {
                return Err(TcavError::config(format!(
                    "grad_layer '{grad_layer}' is not a gradients field ({other:?})"
                )));
            }
        };

        let emb_layer = grad_for.clone().ok_or_else(|| {
            TcavError::config(format!("gradients field '{grad_layer}' has no grad_for"))
        })?;
        let grad_class_key = grad_target.clone().ok_or_else(|| {
            TcavError::config(format!("gradients field '{grad_layer}' has no grad_target"))
        })?;

        match spec.get(&emb_layer) {
            Some(FieldSpec::Embeddings) => {}
            Some(_) => {
                return Err(TcavError::config(format!(
                    "grad_for '{emb_layer}' of '{grad_layer}' is not an embeddings field"
                )));
            }
            None => {
                return Err(TcavError::config(format!(
                    "grad_for '{emb_layer}' of '{grad_layer}' not in model output spec"
                )));
            }
        }
        if !spec.contains_key(&grad_class_key) {
            return Err(TcavError::config(format!(
                "grad_target '{grad_class_key}' of '{grad_layer}' not in model output spec"
            )));
        }

        Ok(Self {
            grad_layer: grad_layer.to_string(),
            emb_layer,
            grad_class_key,
        })
    }

    /// All gradient fields in `spec` that resolve cleanly.
    pub fn all(spec: &OutputSpec) -> Vec<Self> {
        spec.iter()
            .filter(|(_, field)| matches!(field, FieldSpec::Gradients { .. }))
            .filter_map(|(name, _)| Self::resolve(spec, name).ok())
            .collect()
    }
}

/// A model that serves outputs computed ahead of time, keyed by example id.
#[derive(Debug, Clone, Default)]
pub struct PrecomputedModel {
    spec: OutputSpec,
    outputs: HashMap<String, ModelOutput>,
}

impl PrecomputedModel {
    pub fn new(spec: OutputSpec, outputs: HashMap<String, ModelOutput>) -> Self {
        Self { spec, outputs }
    }

    pub fn insert(&mut self, id: impl Into<String>, output: ModelOutput) {
        self.outputs.insert(id.into(), output);
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}

impl Model for PrecomputedModel {
    fn output_spec(&self) -> &OutputSpec {
        &self.spec
    }

    fn predict(&self, inputs: &[Example]) -> Result<Vec<ModelOutput>, TcavError> {
        inputs
            .iter()
            .map(|ex| {
                self.outputs
                    .get(&ex.id)
                    .cloned()
                    .ok_or_else(|| TcavError::model(format!("no precomputed output for '{}'", ex.id)))
            })
            .collect()
    }
}
