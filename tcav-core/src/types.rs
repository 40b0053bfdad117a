//! Examples, model outputs and the output specification that describes them.

use crate::error::TcavError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A JSON object, as produced by models and datasets.
pub type JsonDict = serde_json::Map<String, Value>;

/// One dataset example. Only `id` is interpreted here; everything else is
/// passed through to the model untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Example {
    pub id: String,
    #[serde(flatten)]
    pub features: JsonDict,
}

impl Example {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            features: JsonDict::new(),
        }
    }

    pub fn with_feature(mut self, key: impl Into<String>, value: Value) -> Self {
        self.features.insert(key.into(), value);
        self
    }
}

/// A named collection of examples.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dataset {
    pub name: String,
    pub examples: Vec<Example>,
}

impl Dataset {
    pub fn new(name: impl Into<String>, examples: Vec<Example>) -> Self {
        Self {
            name: name.into(),
            examples,
        }
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }
}

/// Semantic role of a single model output field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldSpec {
    /// Activations of some internal layer.
    Embeddings,
    /// Gradients of the prediction w.r.t. the embedding field `grad_for`,
    /// computed for the class stored in the output field `grad_target`.
    Gradients {
        #[serde(default)]
        grad_for: Option<String>,
        #[serde(default)]
        grad_target: Option<String>,
    },
    CategoryLabel {
        #[serde(default)]
        vocab: Vec<String>,
    },
    MulticlassPreds {
        #[serde(default)]
        vocab: Vec<String>,
        #[serde(default)]
        parent: Option<String>,
    },
    Scalar,
}

/// Output specification of a model, keyed by field name.
pub type OutputSpec = BTreeMap<String, FieldSpec>;

/// The outputs a model produced for one example.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelOutput {
    fields: JsonDict,
}

impl ModelOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// Builder shortcut for a numeric vector field.
    pub fn with_vector(self, key: impl Into<String>, values: &[f64]) -> Self {
        self.with(key, Value::from(values.to_vec()))
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn fields(&self) -> &JsonDict {
        &self.fields
    }

    /// Read `key` as a flat numeric vector. Nested arrays are flattened in
    /// row-major order.
    pub fn vector(&self, key: &str) -> Result<Vec<f64>, TcavError> {
        let value = self
            .fields
            .get(key)
            .ok_or_else(|| TcavError::malformed(key, "field missing from model output"))?;
        let mut out = Vec::new();
        flatten_numeric(value, key, &mut out)?;
        Ok(out)
    }
}

impl From<JsonDict> for ModelOutput {
    fn from(fields: JsonDict) -> Self {
        Self { fields }
    }
}

fn flatten_numeric(value: &Value, key: &str, out: &mut Vec<f64>) -> Result<(), TcavError> {
    match value {
        Value::Number(n) => {
            let x = n
                .as_f64()
                .ok_or_else(|| TcavError::malformed(key, format!("{n} is not representable")))?;
            out.push(x);
            Ok(())
        }
        Value::Array(items) => {
            for item in items {
                flatten_numeric(item, key, out)?;
            }
            Ok(())
        }
        other => Err(TcavError::malformed(
            key,
            format!("expected a numeric array, found {}", json_kind(other)),
        )),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_example_roundtrips_with_flattened_features() {
        let ex: Example = serde_json::from_value(json!({
            "id": "ex1",
            "sentence": "a fine film",
            "label": "1"
        }))
        .unwrap();
        assert_eq!(ex.id, "ex1");
        assert_eq!(ex.features["sentence"], json!("a fine film"));

        let back = serde_json::to_value(&ex).unwrap();
        assert_eq!(back["id"], json!("ex1"));
        assert_eq!(back["label"], json!("1"));
    }

    #[test]
    fn test_vector_flattens_nested_arrays() {
        let out = ModelOutput::new().with("emb", json!([[1.0, 2.0], [3.0, 4]]));
        assert_eq!(out.vector("emb").unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_vector_missing_field() {
        let out = ModelOutput::new();
        let err = out.vector("emb").unwrap_err();
        assert!(matches!(err, TcavError::MalformedOutput { ref field, .. } if field == "emb"));
    }

    #[test]
    fn test_vector_rejects_non_numeric() {
        let out = ModelOutput::new().with("emb", json!([1.0, "two"]));
        let err = out.vector("emb").unwrap_err();
        assert!(err.to_string().contains("a string"));
    }

    #[test]
    fn test_field_spec_tagged_serde() {
        let spec: OutputSpec = serde_json::from_value(json!({
            "cls_emb": {"type": "embeddings"},
            "cls_grad": {"type": "gradients", "grad_for": "cls_emb", "grad_target": "grad_class"},
            "grad_class": {"type": "category_label"},
            "probas": {"type": "multiclass_preds", "vocab": ["0", "1"]}
        }))
        .unwrap();
        assert_eq!(spec["cls_emb"], FieldSpec::Embeddings);
        assert_eq!(
            spec["cls_grad"],
            FieldSpec::Gradients {
                grad_for: Some("cls_emb".into()),
                grad_target: Some("grad_class".into()),
            }
        );
        assert!(matches!(spec["probas"], FieldSpec::MulticlassPreds { ref vocab, .. } if vocab.len() == 2));
    }

    #[test]
    fn test_model_output_is_transparent() {
        let out: ModelOutput = serde_json::from_value(json!({"grad_class": "positive"})).unwrap();
        assert_eq!(out.get("grad_class"), Some(&json!("positive")));
    }
}
