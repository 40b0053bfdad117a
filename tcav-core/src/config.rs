//! Configuration for TCAV runs.
//!
//! [`TcavConfig`] is the validated, immutable per-run configuration. Every
//! construction path (builder methods, JSON, TOML, figment) goes through the
//! same validation, so a `TcavConfig` in hand is always usable.
//!
//! [`RunSettings`] is the raw, layered form used by the command line:
//! defaults -> settings file -> environment (`TCAV_`) -> explicit overrides.

use crate::error::TcavError;
use crate::types::JsonDict;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;

/// Number of comparison splits (and therefore trials) per run.
pub const NUM_SPLITS: usize = 20;

/// Settings file looked up in the working directory when none is given.
pub const SETTINGS_FILE: &str = "tcav.toml";

fn default_test_size() -> f64 {
    0.33
}

fn default_random_state() -> Option<u64> {
    Some(42)
}

fn default_num_splits() -> usize {
    NUM_SPLITS
}

/// Validated configuration for one TCAV run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTcavConfig")]
pub struct TcavConfig {
    concept_set_ids: Vec<String>,
    class_to_explain: Value,
    grad_layer: String,
    test_size: f64,
    random_state: Option<u64>,
    num_splits: usize,
    split_seed: Option<u64>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTcavConfig {
    #[serde(default)]
    concept_set_ids: Vec<String>,
    #[serde(default)]
    class_to_explain: Value,
    #[serde(default)]
    grad_layer: String,
    #[serde(default = "default_test_size")]
    test_size: f64,
    #[serde(default = "default_random_state")]
    random_state: Option<u64>,
    #[serde(default = "default_num_splits")]
    num_splits: usize,
    #[serde(default)]
    split_seed: Option<u64>,
}

impl TryFrom<RawTcavConfig> for TcavConfig {
    type Error = TcavError;

    fn try_from(raw: RawTcavConfig) -> Result<Self, Self::Error> {
        TcavConfig::new(raw.concept_set_ids, raw.class_to_explain, raw.grad_layer)?
            .with_test_size(raw.test_size)?
            .with_num_splits(raw.num_splits)
            .map(|config| {
                config
                    .with_random_state(raw.random_state)
                    .with_split_seed(raw.split_seed)
            })
    }
}

impl TcavConfig {
    /// Create a config with default `test_size`, `random_state` and split
    /// count. Duplicate concept ids are dropped, keeping first occurrences.
    pub fn new(
        concept_set_ids: impl IntoIterator<Item = impl Into<String>>,
        class_to_explain: Value,
        grad_layer: impl Into<String>,
    ) -> Result<Self, TcavError> {
        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        let mut duplicates = 0usize;
        for id in concept_set_ids {
            let id = id.into();
            if seen.insert(id.clone()) {
                ids.push(id);
            } else {
                duplicates += 1;
            }
        }
        if duplicates > 0 {
            tracing::warn!(duplicates, "Dropped duplicate concept ids");
        }
        if ids.is_empty() {
            return Err(TcavError::config("concept_set_ids must not be empty"));
        }
        if class_to_explain.is_null() {
            return Err(TcavError::config("class_to_explain is required"));
        }
        let grad_layer = grad_layer.into();
        if grad_layer.trim().is_empty() {
            return Err(TcavError::config("grad_layer is required"));
        }

        Ok(Self {
            concept_set_ids: ids,
            class_to_explain,
            grad_layer,
            test_size: default_test_size(),
            random_state: default_random_state(),
            num_splits: default_num_splits(),
            split_seed: None,
        })
    }

    /// Parse and validate a JSON config dict.
    pub fn from_json(value: &Value) -> Result<Self, TcavError> {
        Ok(serde_json::from_value(value.clone())?)
    }

    /// Fraction of probe data held out for evaluation; must lie in (0, 1).
    pub fn with_test_size(mut self, test_size: f64) -> Result<Self, TcavError> {
        if !(test_size > 0.0 && test_size < 1.0) {
            return Err(TcavError::config(format!(
                "test_size must be in (0, 1), got {test_size}"
            )));
        }
        self.test_size = test_size;
        Ok(self)
    }

    /// Seed for probe partitioning and training. `None` draws from entropy.
    pub fn with_random_state(mut self, random_state: Option<u64>) -> Self {
        self.random_state = random_state;
        self
    }

    /// Number of comparison splits; at least two are needed for the t-test.
    pub fn with_num_splits(mut self, num_splits: usize) -> Result<Self, TcavError> {
        if num_splits < 2 {
            return Err(TcavError::config(format!(
                "num_splits must be at least 2, got {num_splits}"
            )));
        }
        self.num_splits = num_splits;
        Ok(self)
    }

    /// Seed for the comparison split sampler. `None` draws from entropy.
    pub fn with_split_seed(mut self, split_seed: Option<u64>) -> Self {
        self.split_seed = split_seed;
        self
    }

    pub fn concept_set_ids(&self) -> &[String] {
        &self.concept_set_ids
    }

    pub fn class_to_explain(&self) -> &Value {
        &self.class_to_explain
    }

    pub fn grad_layer(&self) -> &str {
        &self.grad_layer
    }

    pub fn test_size(&self) -> f64 {
        self.test_size
    }

    pub fn random_state(&self) -> Option<u64> {
        self.random_state
    }

    pub fn num_splits(&self) -> usize {
        self.num_splits
    }

    pub fn split_seed(&self) -> Option<u64> {
        self.split_seed
    }
}

/// Layered run settings as read from files, environment and flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSettings {
    /// Ids of the examples that make up the concept.
    #[serde(default)]
    pub concept_set_ids: Vec<String>,
    /// Gradient class to explain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_to_explain: Option<Value>,
    /// Gradient output field to explain.
    #[serde(default)]
    pub grad_layer: String,
    #[serde(default = "default_test_size")]
    pub test_size: f64,
    #[serde(
        default = "default_random_state",
        skip_serializing_if = "Option::is_none"
    )]
    pub random_state: Option<u64>,
    /// Ignore `random_state` and seed probes from entropy. TOML and the
    /// environment cannot express a null seed, so this flag stands in for it.
    #[serde(default)]
    pub unseeded: bool,
    #[serde(default = "default_num_splits")]
    pub num_splits: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub split_seed: Option<u64>,
    /// Run trials concurrently on the blocking thread pool.
    #[serde(default)]
    pub parallel: bool,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            concept_set_ids: Vec::new(),
            class_to_explain: None,
            grad_layer: String::new(),
            test_size: default_test_size(),
            random_state: default_random_state(),
            unseeded: false,
            num_splits: default_num_splits(),
            split_seed: None,
            parallel: false,
        }
    }
}

impl RunSettings {
    /// Validate into a [`TcavConfig`].
    pub fn tcav_config(&self) -> Result<TcavConfig, TcavError> {
        TcavConfig::new(
            self.concept_set_ids.iter().cloned(),
            self.class_to_explain.clone().unwrap_or(Value::Null),
            self.grad_layer.clone(),
        )?
        .with_test_size(self.test_size)?
        .with_num_splits(self.num_splits)
        .map(|config| {
            let random_state = if self.unseeded { None } else { self.random_state };
            config
                .with_random_state(random_state)
                .with_split_seed(self.split_seed)
        })
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

/// Load run settings from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `TCAV_`)
/// 3. Settings file at `path`, which must exist when given
/// 4. Built-in defaults
pub fn load_settings(
    path: Option<&Path>,
    overrides: &JsonDict,
) -> Result<RunSettings, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(RunSettings::default()));

    if let Some(path) = path {
        if !path.exists() {
            return Err(Box::new(figment::Error::from(format!(
                "settings file not found: {}",
                path.display()
            ))));
        }
        figment = figment.merge(Toml::file(path));
    }

    // TCAV_NUM_SPLITS, TCAV_GRAD_LAYER, ...
    figment = figment.merge(Env::prefixed("TCAV_").split("__"));

    if !overrides.is_empty() {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}
