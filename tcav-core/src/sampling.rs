//! Concept set selection and random comparison splits.

use crate::error::TcavError;
use crate::types::Example;
use rand::Rng;
use rand::seq::SliceRandom;
use std::collections::HashSet;

/// Examples whose id is in `concept_ids`, in population order.
pub fn concept_examples(examples: &[Example], concept_ids: &HashSet<&str>) -> Vec<Example> {
    examples
        .iter()
        .filter(|ex| concept_ids.contains(ex.id.as_str()))
        .cloned()
        .collect()
}

/// Draw `num_splits` comparison sets from the non-concept population.
///
/// Each split has exactly as many examples as the concept set and is drawn
/// without replacement; splits are independent of each other, so an
/// example may appear in several of them.
pub fn create_comparison_splits<R: Rng + ?Sized>(
    examples: &[Example],
    concept_ids: &HashSet<&str>,
    num_splits: usize,
    rng: &mut R,
) -> Result<Vec<Vec<Example>>, TcavError> {
    let (concept, filtered): (Vec<&Example>, Vec<&Example>) = examples
        .iter()
        .partition(|ex| concept_ids.contains(ex.id.as_str()));

    let split_size = concept.len();
    if split_size == 0 {
        return Err(TcavError::insufficient_data(
            "none of the concept ids are present in the examples",
        ));
    }
    if split_size > filtered.len() {
        return Err(TcavError::insufficient_data(format!(
            "concept set has {split_size} examples but only {} non-concept examples remain",
            filtered.len()
        )));
    }

    let splits = (0..num_splits)
        .map(|_| {
            filtered
                .choose_multiple(rng, split_size)
                .map(|ex| (*ex).clone())
                .collect()
        })
        .collect();
    Ok(splits)
}
