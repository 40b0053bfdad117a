//! Quantitative Testing with Concept Activation Vectors (TCAV).
//!
//! A run moves through these stages, aborting on the first error:
//!
//! 1. **Validating**: parse the config and resolve the embedding and
//!    gradient-class fields linked to `grad_layer`.
//! 2. **Extracting**: model outputs for the concept set and the dataset.
//! 3. **Sampling**: `num_splits` random comparison sets.
//! 4. **Running trials**: per split: train a probe (concept = 1,
//!    comparison = 0), take its weights as the CAV, score the explained
//!    class's directional derivatives and the per-example similarities.
//! 5. **Selecting**: the trial with the highest probe accuracy wins; the
//!    first one wins ties.
//! 6. **Testing significance**: t-test of all trial scores against 0.5,
//!    returned with the selected trial.

use crate::activations::{predict_outputs, training_data};
use crate::config::TcavConfig;
use crate::derivatives::directional_derivatives;
use crate::error::TcavError;
use crate::interpreter::Interpreter;
use crate::model::{GradientLayer, Model};
use crate::probe::ProbeTrainer;
use crate::sampling::{concept_examples, create_comparison_splits};
use crate::scoring::{local_scores, tcav_score};
use crate::significance::hypothesis_test;
use crate::types::{Dataset, Example, ModelOutput};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of one comparison split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    /// TCAV score in [0, 1].
    pub score: f64,
    /// Cosine similarity of each dataset embedding with the CAV.
    pub cos_sim: Vec<f64>,
    /// Dot product of each dataset embedding with the CAV.
    pub dot_prods: Vec<f64>,
    /// Held-out accuracy of the probe that produced the CAV.
    pub accuracy: f64,
}

/// The result of a TCAV run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TcavResult {
    /// The trial with the most accurate probe.
    pub result: TrialResult,
    /// Two-sided p-value of all trial scores against 0.5.
    pub p_val: f64,
}

/// Pipeline stage, used to label log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validating,
    ExtractingConceptAndDataset,
    SamplingSplits,
    RunningTrials,
    SelectingBest,
    TestingSignificance,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Validating => "validating",
            Self::ExtractingConceptAndDataset => "extracting",
            Self::SamplingSplits => "sampling",
            Self::RunningTrials => "running_trials",
            Self::SelectingBest => "selecting_best",
            Self::TestingSignificance => "testing_significance",
            Self::Done => "done",
        };
        f.write_str(s)
    }
}

/// Index of the trial with the highest accuracy; the lowest index wins ties.
pub fn select_best(trials: &[TrialResult]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, trial) in trials.iter().enumerate() {
        match best {
            Some(b) if trials[b].accuracy >= trial.accuracy => {}
            _ => best = Some(i),
        }
    }
    best
}

/// Read-only state shared by every trial of a run.
struct TrialContext {
    layer: GradientLayer,
    class_to_explain: Value,
    concept_outputs: Vec<ModelOutput>,
    dataset_outputs: Vec<ModelOutput>,
    trainer: ProbeTrainer,
}

impl TrialContext {
    fn run(
        &self,
        index: usize,
        model: &dyn Model,
        comparison_set: &[Example],
    ) -> Result<TrialResult, TcavError> {
        let comparison_outputs = predict_outputs(model, comparison_set)?;
        let (x, y) = training_data(
            &comparison_outputs,
            &self.concept_outputs,
            &self.layer.emb_layer,
        )?;
        let trained = self.trainer.train(&x, &y)?;

        let dir_derivs = directional_derivatives(
            &trained.cav,
            &self.dataset_outputs,
            &self.layer,
            &self.class_to_explain,
        )?;
        let score = tcav_score(&dir_derivs)?;
        let local = local_scores(&trained.cav, &self.dataset_outputs, &self.layer.emb_layer)?;

        debug!(
            stage = %Stage::RunningTrials,
            trial = index,
            score,
            accuracy = trained.accuracy,
            derivatives = dir_derivs.len(),
            "Trial complete"
        );

        Ok(TrialResult {
            score,
            cos_sim: local.cos_sim,
            dot_prods: local.dot_prods,
            accuracy: trained.accuracy,
        })
    }
}

/// The TCAV interpreter.
#[derive(Debug, Clone, Default)]
pub struct Tcav;

impl Tcav {
    pub fn new() -> Self {
        Self
    }

    /// Run TCAV, seeding the split sampler from the config's `split_seed`
    /// (or from entropy when unset).
    pub fn run_tcav(
        &self,
        inputs: &[Example],
        model: &dyn Model,
        model_outputs: Option<&[ModelOutput]>,
        config: &TcavConfig,
    ) -> Result<TcavResult, TcavError> {
        let mut rng = split_rng(config);
        self.run_tcav_with_rng(inputs, model, model_outputs, config, &mut rng)
    }

    /// Run TCAV drawing comparison splits from `rng`.
    pub fn run_tcav_with_rng<R: Rng + ?Sized>(
        &self,
        inputs: &[Example],
        model: &dyn Model,
        model_outputs: Option<&[ModelOutput]>,
        config: &TcavConfig,
        rng: &mut R,
    ) -> Result<TcavResult, TcavError> {
        let (context, splits) = self.prepare(inputs, model, model_outputs, config, rng)?;

        let trials = splits
            .iter()
            .enumerate()
            .map(|(i, split)| context.run(i, model, split))
            .collect::<Result<Vec<_>, _>>()?;

        finish(trials)
    }

    /// Run TCAV with the trials spread over tokio's blocking thread pool.
    ///
    /// Splits are drawn before any trial starts, and selection and the
    /// t-test only happen once every trial has finished, so a seeded run
    /// returns the same result as [`Tcav::run_tcav`].
    pub async fn run_concurrent(
        &self,
        inputs: &[Example],
        model: Arc<dyn Model>,
        model_outputs: Option<&[ModelOutput]>,
        config: &TcavConfig,
    ) -> Result<TcavResult, TcavError> {
        let mut rng = split_rng(config);
        let (context, splits) =
            self.prepare(inputs, model.as_ref(), model_outputs, config, &mut rng)?;
        let context = Arc::new(context);

        let handles: Vec<_> = splits
            .into_iter()
            .enumerate()
            .map(|(index, split)| {
                let context = Arc::clone(&context);
                let model = Arc::clone(&model);
                tokio::task::spawn_blocking(move || context.run(index, model.as_ref(), &split))
            })
            .collect();

        let mut trials = Vec::with_capacity(handles.len());
        for handle in handles {
            let trial = handle
                .await
                .map_err(|e| TcavError::Task(e.to_string()))??;
            trials.push(trial);
        }

        finish(trials)
    }

    fn prepare<R: Rng + ?Sized>(
        &self,
        inputs: &[Example],
        model: &dyn Model,
        model_outputs: Option<&[ModelOutput]>,
        config: &TcavConfig,
        rng: &mut R,
    ) -> Result<(TrialContext, Vec<Vec<Example>>), TcavError> {
        debug!(stage = %Stage::Validating, grad_layer = config.grad_layer(), "Resolving layers");
        let layer = GradientLayer::resolve(model.output_spec(), config.grad_layer())?;

        let ids: HashSet<&str> = config.concept_set_ids().iter().map(String::as_str).collect();
        let concept_set = concept_examples(inputs, &ids);
        if concept_set.is_empty() {
            return Err(TcavError::insufficient_data(
                "none of the concept ids are present in the examples",
            ));
        }
        if concept_set.len() < ids.len() {
            warn!(
                requested = ids.len(),
                found = concept_set.len(),
                "Some concept ids are not in the examples"
            );
        }

        debug!(
            stage = %Stage::ExtractingConceptAndDataset,
            concept = concept_set.len(),
            dataset = inputs.len(),
            "Extracting outputs"
        );
        let concept_outputs = predict_outputs(model, &concept_set)?;
        let dataset_outputs = match model_outputs {
            Some(outputs) if outputs.len() == inputs.len() => outputs.to_vec(),
            Some(outputs) => {
                return Err(TcavError::config(format!(
                    "{} precomputed outputs for {} inputs",
                    outputs.len(),
                    inputs.len()
                )));
            }
            None => predict_outputs(model, inputs)?,
        };

        debug!(stage = %Stage::SamplingSplits, splits = config.num_splits(), "Sampling comparison sets");
        let splits = create_comparison_splits(inputs, &ids, config.num_splits(), rng)?;

        let context = TrialContext {
            layer,
            class_to_explain: config.class_to_explain().clone(),
            concept_outputs,
            dataset_outputs,
            trainer: ProbeTrainer::new(config.test_size(), config.random_state()),
        };
        Ok((context, splits))
    }
}

fn split_rng(config: &TcavConfig) -> StdRng {
    match config.split_seed() {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

fn finish(trials: Vec<TrialResult>) -> Result<TcavResult, TcavError> {
    let best = select_best(&trials)
        .ok_or_else(|| TcavError::insufficient_data("no trials were run"))?;
    debug!(stage = %Stage::SelectingBest, best, "Selected most accurate trial");

    debug!(stage = %Stage::TestingSignificance, trials = trials.len(), "Testing significance");
    let scores: Vec<f64> = trials.iter().map(|t| t.score).collect();
    let p_val = hypothesis_test(&scores)?;

    let num_trials = trials.len();
    let result = trials
        .into_iter()
        .nth(best)
        .ok_or_else(|| TcavError::insufficient_data("best trial index out of range"))?;
    info!(
        stage = %Stage::Done,
        trials = num_trials,
        best,
        score = result.score,
        accuracy = result.accuracy,
        p_val,
        "TCAV complete"
    );
    Ok(TcavResult { result, p_val })
}

impl Interpreter for Tcav {
    fn name(&self) -> &str {
        "tcav"
    }

    fn description(&self) -> &str {
        "Tests whether a user-defined concept influences the model's prediction for a class"
    }

    fn config_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "concept_set_ids": {"type": "array", "items": {"type": "string"}, "minItems": 1},
                "class_to_explain": {},
                "grad_layer": {"type": "string"},
                "test_size": {"type": "number", "exclusiveMinimum": 0, "exclusiveMaximum": 1, "default": 0.33},
                "random_state": {"type": ["integer", "null"], "default": 42},
                "num_splits": {"type": "integer", "minimum": 2, "default": crate::config::NUM_SPLITS},
                "split_seed": {"type": ["integer", "null"]}
            },
            "required": ["concept_set_ids", "class_to_explain", "grad_layer"]
        })
    }

    fn is_compatible(&self, model: &dyn Model) -> bool {
        !GradientLayer::all(model.output_spec()).is_empty()
    }

    fn run_with_metadata(
        &self,
        indexed_inputs: &[Example],
        model: &dyn Model,
        dataset: &Dataset,
        model_outputs: Option<&[ModelOutput]>,
        config: Option<&Value>,
    ) -> Result<Vec<Value>, TcavError> {
        let config = config.ok_or_else(|| TcavError::config("TCAV requires a config"))?;
        let config = TcavConfig::from_json(config)?;
        debug!(dataset = %dataset.name, inputs = indexed_inputs.len(), "Running TCAV interpreter");

        let result = self.run_tcav(indexed_inputs, model, model_outputs, &config)?;
        Ok(vec![serde_json::to_value(result)?])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trial(accuracy: f64) -> TrialResult {
        TrialResult {
            score: 0.5,
            cos_sim: Vec::new(),
            dot_prods: Vec::new(),
            accuracy,
        }
    }

    #[test]
    fn test_select_best_prefers_first_on_ties() {
        let trials = vec![trial(0.5), trial(1.0), trial(0.75), trial(1.0)];
        assert_eq!(select_best(&trials), Some(1));
    }

    #[test]
    fn test_select_best_empty() {
        assert_eq!(select_best(&[]), None);
    }

    #[test]
    fn test_finish_returns_best_with_p_value() {
        let mut trials = vec![trial(0.5), trial(0.9), trial(0.9)];
        trials[0].score = 0.8;
        trials[1].score = 0.9;
        trials[2].score = 1.0;
        let result = finish(trials).unwrap();
        assert_eq!(result.result.accuracy, 0.9);
        assert_eq!(result.result.score, 0.9);
        assert!(result.p_val > 0.0 && result.p_val < 0.05);
    }

    #[test]
    fn test_stage_labels() {
        assert_eq!(Stage::RunningTrials.to_string(), "running_trials");
        assert_eq!(Stage::Done.to_string(), "done");
    }
}
