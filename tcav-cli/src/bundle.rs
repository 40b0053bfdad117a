//! Precomputed model outputs on disk.
//!
//! A bundle is a single JSON document:
//!
//! ```json
//! {
//!   "name": "sst2-dev",
//!   "output_spec": { "cls_emb": { "type": "embeddings" }, ... },
//!   "examples": [ { "id": "ex0", "sentence": "..." }, ... ],
//!   "outputs": { "ex0": { "cls_emb": [...], "cls_grad": [...], ... }, ... }
//! }
//! ```

use anyhow::Context;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tcav_core::{Dataset, Example, ModelOutput, OutputSpec, PrecomputedModel};

#[derive(Debug, Deserialize)]
pub struct Bundle {
    #[serde(default)]
    pub name: Option<String>,
    pub output_spec: OutputSpec,
    pub examples: Vec<Example>,
    pub outputs: HashMap<String, ModelOutput>,
}

impl Bundle {
    /// Read and check a bundle file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read bundle {}", path.display()))?;
        let bundle: Bundle = serde_json::from_str(&content)
            .with_context(|| format!("Invalid bundle {}", path.display()))?;
        bundle.validate()?;
        tracing::debug!(
            path = %path.display(),
            examples = bundle.examples.len(),
            fields = bundle.output_spec.len(),
            "Loaded bundle"
        );
        Ok(bundle)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.examples.is_empty() {
            anyhow::bail!("Bundle has no examples");
        }
        let missing: Vec<&str> = self
            .examples
            .iter()
            .filter(|ex| !self.outputs.contains_key(&ex.id))
            .map(|ex| ex.id.as_str())
            .collect();
        if !missing.is_empty() {
            anyhow::bail!(
                "Bundle has no outputs for {} example(s): {}",
                missing.len(),
                missing.join(", ")
            );
        }
        Ok(())
    }

    /// Split into the dataset and a model serving the stored outputs.
    pub fn into_parts(self, default_name: &str) -> (Dataset, PrecomputedModel) {
        let name = self.name.unwrap_or_else(|| default_name.to_string());
        (
            Dataset::new(name, self.examples),
            PrecomputedModel::new(self.output_spec, self.outputs),
        )
    }
}
