//! The interpretation capability shared by explainers.

use crate::error::TcavError;
use crate::model::Model;
use crate::types::{Dataset, Example, ModelOutput};
use serde_json::Value;

/// An explainer that runs over indexed inputs of a model and returns a list
/// of JSON result records.
pub trait Interpreter: Send + Sync {
    /// The unique name of this interpreter.
    fn name(&self) -> &str;

    /// Human-readable description of what this interpreter computes.
    fn description(&self) -> &str;

    /// JSON Schema for the config accepted by `run_with_metadata`.
    fn config_schema(&self) -> Value;

    /// Whether `model` exposes the outputs this interpreter needs.
    fn is_compatible(&self, model: &dyn Model) -> bool;

    /// Run the interpretation.
    ///
    /// `model_outputs`, when given, must line up one-to-one with
    /// `indexed_inputs`.
    fn run_with_metadata(
        &self,
        indexed_inputs: &[Example],
        model: &dyn Model,
        dataset: &Dataset,
        model_outputs: Option<&[ModelOutput]>,
        config: Option<&Value>,
    ) -> Result<Vec<Value>, TcavError>;
}
