//! End-to-end tests for the TCAV pipeline.
//!
//! All scenarios share one toy model: concept examples embed along the first
//! axis and everything else along the second, so every probe learns a CAV
//! with a positive first and a negative second component. Gradients along
//! the first axis therefore have a known sign in every trial.

use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tcav_core::{
    Dataset, Example, FieldSpec, Interpreter, Model, ModelOutput, OutputSpec, PrecomputedModel,
    Tcav, TcavConfig, TcavError,
};

const EMB: &str = "cls_emb";
const GRAD: &str = "cls_grad";
const GRAD_CLASS: &str = "grad_class";

fn output_spec() -> OutputSpec {
    let mut spec = OutputSpec::new();
    spec.insert(EMB.into(), FieldSpec::Embeddings);
    spec.insert(
        GRAD.into(),
        FieldSpec::Gradients {
            grad_for: Some(EMB.into()),
            grad_target: Some(GRAD_CLASS.into()),
        },
    );
    spec.insert(
        GRAD_CLASS.into(),
        FieldSpec::CategoryLabel {
            vocab: vec!["negative".into(), "positive".into()],
        },
    );
    spec
}

/// Ten examples `ex0`..`ex9`; `ex0` and `ex1` form the concept. `ex8` and
/// `ex9` have gradient class "negative", the rest "positive".
/// `gradient(i)` gives the gradient of example `i`.
fn fixture(gradient: impl Fn(usize) -> [f64; 2]) -> (Vec<Example>, PrecomputedModel) {
    let mut examples = Vec::new();
    let mut outputs = HashMap::new();
    for i in 0..10 {
        let id = format!("ex{i}");
        let emb = if i < 2 { [1.0, 0.0] } else { [0.0, 1.0] };
        let class = if i < 8 { "positive" } else { "negative" };
        examples.push(Example::new(&id).with_feature("sentence", json!(format!("sentence {i}"))));
        outputs.insert(
            id,
            ModelOutput::new()
                .with_vector(EMB, &emb)
                .with_vector(GRAD, &gradient(i))
                .with(GRAD_CLASS, json!(class)),
        );
    }
    (examples, PrecomputedModel::new(output_spec(), outputs))
}

/// Six "positive" examples push along the concept axis, two push against it.
fn mixed_fixture() -> (Vec<Example>, PrecomputedModel) {
    fixture(|i| if i == 2 || i == 3 { [-1.0, 0.0] } else { [1.0, 0.0] })
}

fn config() -> TcavConfig {
    TcavConfig::new(["ex0", "ex1"], json!("positive"), GRAD)
        .unwrap()
        .with_split_seed(Some(7))
}

#[test]
fn test_score_counts_matching_class_only() {
    let (examples, model) = mixed_fixture();
    let result = Tcav::new()
        .run_tcav(&examples, &model, None, &config())
        .unwrap();

    // 8 of 10 examples match the class; 6 of those have positive derivatives.
    assert_eq!(result.result.score, 0.75);
    assert_eq!(result.result.dot_prods.len(), 10);
    assert_eq!(result.result.cos_sim.len(), 10);
    assert!((0.0..=1.0).contains(&result.result.accuracy));
    // Every trial scores 0.75, so the sample has no spread and rejects 0.5.
    assert_eq!(result.p_val, 0.0);
}

#[test]
fn test_local_scores_follow_embedding_axis() {
    let (examples, model) = mixed_fixture();
    let result = Tcav::new()
        .run_tcav(&examples, &model, None, &config())
        .unwrap();

    for (i, (cos, dot)) in result
        .result
        .cos_sim
        .iter()
        .zip(&result.result.dot_prods)
        .enumerate()
    {
        assert!((-1.0..=1.0).contains(cos));
        if i < 2 {
            assert!(*cos > 0.0 && *dot > 0.0, "concept example {i}");
        } else {
            assert!(*cos < 0.0 && *dot < 0.0, "example {i}");
        }
    }
}

#[test]
fn test_concept_aligned_gradients_are_significant() {
    let (examples, model) = fixture(|_| [1.0, 0.0]);
    let result = Tcav::new()
        .run_tcav(&examples, &model, None, &config())
        .unwrap();

    assert_eq!(result.result.score, 1.0);
    assert!(result.p_val < 0.05);
}

#[test]
fn test_balanced_gradients_are_degenerate() {
    let (examples, model) = fixture(|i| if i < 4 { [1.0, 0.0] } else { [-1.0, 0.0] });
    let err = Tcav::new()
        .run_tcav(&examples, &model, None, &config())
        .unwrap_err();
    assert!(matches!(err, TcavError::DegenerateScore(_)), "{err}");
}

#[test]
fn test_seeded_runs_are_reproducible() {
    let (examples, model) = mixed_fixture();
    let tcav = Tcav::new();
    let first = tcav.run_tcav(&examples, &model, None, &config()).unwrap();
    let second = tcav.run_tcav(&examples, &model, None, &config()).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_precomputed_dataset_outputs_are_used() {
    let (examples, model) = mixed_fixture();
    // Flip every gradient in the supplied dataset outputs.
    let flipped: Vec<ModelOutput> = model
        .predict(&examples)
        .unwrap()
        .into_iter()
        .map(|out| {
            let grad = out.vector(GRAD).unwrap();
            let neg: Vec<f64> = grad.iter().map(|g| -g).collect();
            out.with_vector(GRAD, &neg)
        })
        .collect();

    let result = Tcav::new()
        .run_tcav(&examples, &model, Some(&flipped), &config())
        .unwrap();
    assert_eq!(result.result.score, 0.25);
}

#[test]
fn test_precomputed_outputs_must_match_inputs() {
    let (examples, model) = mixed_fixture();
    let partial = model.predict(&examples[..3]).unwrap();
    let err = Tcav::new()
        .run_tcav(&examples, &model, Some(&partial), &config())
        .unwrap_err();
    assert!(matches!(err, TcavError::Config(_)));
}

#[test]
fn test_missing_concept_ids() {
    let (examples, model) = mixed_fixture();
    let config = TcavConfig::new(["nope"], json!("positive"), GRAD).unwrap();
    let err = Tcav::new()
        .run_tcav(&examples, &model, None, &config)
        .unwrap_err();
    assert!(matches!(err, TcavError::InsufficientData(_)));
}

#[test]
fn test_stale_concept_ids_are_ignored() {
    let (examples, model) = mixed_fixture();
    let with_ghost = TcavConfig::new(["ex0", "ex1", "ghost"], json!("positive"), GRAD)
        .unwrap()
        .with_split_seed(Some(7));

    let tcav = Tcav::new();
    let result = tcav.run_tcav(&examples, &model, None, &with_ghost).unwrap();
    // Splits are sized by the two ids that exist, so the run is identical.
    let expected = tcav.run_tcav(&examples, &model, None, &config()).unwrap();
    assert_eq!(result, expected);
}

#[test]
fn test_concept_larger_than_remaining_population() {
    let (examples, model) = mixed_fixture();
    let ids: Vec<String> = (0..6).map(|i| format!("ex{i}")).collect();
    let config = TcavConfig::new(ids, json!("positive"), GRAD).unwrap();
    let err = Tcav::new()
        .run_tcav(&examples, &model, None, &config)
        .unwrap_err();
    assert!(matches!(err, TcavError::InsufficientData(_)));
}

#[test]
fn test_unknown_grad_layer_is_config_error() {
    let (examples, model) = mixed_fixture();
    let config = TcavConfig::new(["ex0", "ex1"], json!("positive"), "missing_grad").unwrap();
    let err = Tcav::new()
        .run_tcav(&examples, &model, None, &config)
        .unwrap_err();
    assert!(matches!(err, TcavError::Config(_)));
}

#[test]
fn test_unmatched_class_is_degenerate() {
    let (examples, model) = mixed_fixture();
    let config = TcavConfig::new(["ex0", "ex1"], json!("neutral"), GRAD).unwrap();
    let err = Tcav::new()
        .run_tcav(&examples, &model, None, &config)
        .unwrap_err();
    assert!(matches!(err, TcavError::DegenerateScore(_)));
}

#[test]
fn test_single_concept_example_cannot_be_stratified() {
    let (examples, model) = mixed_fixture();
    let config = TcavConfig::new(["ex0"], json!("positive"), GRAD).unwrap();
    let err = Tcav::new()
        .run_tcav(&examples, &model, None, &config)
        .unwrap_err();
    assert!(matches!(err, TcavError::DataInsufficiency(_)));
}

#[tokio::test]
async fn test_concurrent_matches_sequential() {
    let (examples, model) = mixed_fixture();
    let tcav = Tcav::new();
    let sequential = tcav.run_tcav(&examples, &model, None, &config()).unwrap();

    let model: Arc<dyn Model> = Arc::new(model);
    let concurrent = tcav
        .run_concurrent(&examples, model, None, &config())
        .await
        .unwrap();
    assert_eq!(concurrent, sequential);
}

#[tokio::test]
async fn test_concurrent_propagates_errors() {
    let (examples, model) = mixed_fixture();
    let config = TcavConfig::new(["ex0", "ex1"], json!("neutral"), GRAD).unwrap();
    let model: Arc<dyn Model> = Arc::new(model);
    let err = Tcav::new()
        .run_concurrent(&examples, model, None, &config)
        .await
        .unwrap_err();
    assert!(matches!(err, TcavError::DegenerateScore(_)));
}

#[test]
fn test_interpreter_returns_single_record() {
    let (examples, model) = mixed_fixture();
    let dataset = Dataset::new("toy", examples.clone());
    let config = json!({
        "concept_set_ids": ["ex0", "ex1"],
        "class_to_explain": "positive",
        "grad_layer": GRAD,
        "split_seed": 3,
    });

    let tcav = Tcav::new();
    assert_eq!(tcav.name(), "tcav");
    assert!(tcav.is_compatible(&model));

    let records = tcav
        .run_with_metadata(&examples, &model, &dataset, None, Some(&config))
        .unwrap();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record["result"]["score"], json!(0.75));
    assert_eq!(record["p_val"], json!(0.0));
    assert!(record["result"]["cos_sim"].is_array());
    assert!(record["result"]["dot_prods"].is_array());
    assert!(record["result"]["accuracy"].is_number());
}

#[test]
fn test_interpreter_requires_config() {
    let (examples, model) = mixed_fixture();
    let dataset = Dataset::new("toy", examples.clone());
    let err = Tcav::new()
        .run_with_metadata(&examples, &model, &dataset, None, None)
        .unwrap_err();
    assert!(matches!(err, TcavError::Config(_)));

    let bad: Value = json!({"concept_set_ids": [], "class_to_explain": "positive", "grad_layer": GRAD});
    assert!(
        Tcav::new()
            .run_with_metadata(&examples, &model, &dataset, None, Some(&bad))
            .is_err()
    );
}

#[test]
fn test_incompatible_without_gradients() {
    let mut spec = OutputSpec::new();
    spec.insert(EMB.into(), FieldSpec::Embeddings);
    let model = PrecomputedModel::new(spec, HashMap::new());
    assert!(!Tcav::new().is_compatible(&model));
}
