//! # tcav-core - Testing with Concept Activation Vectors
//!
//! Measures how sensitive a model's prediction for one class is to a
//! user-defined concept, given by a handful of example ids.
//!
//! ## Pipeline
//!
//! 1. Embeddings of the concept examples and of random comparison sets are
//!    separated by a linear probe; its weight vector is the CAV.
//! 2. Gradients of the explained class are projected onto the CAV. The
//!    fraction that is positive is the TCAV score.
//! 3. Repeating over many comparison sets gives a distribution of scores,
//!    tested against 0.5 for significance.

// Data model
pub mod config;
pub mod error;
pub mod model;
pub mod types;

// Numerics
pub mod linalg;
pub mod probe;
pub mod significance;

// Pipeline stages
pub mod activations;
pub mod derivatives;
pub mod sampling;
pub mod scoring;

// Orchestration
pub mod interpreter;
pub mod tcav;

// Re-exports
pub use config::{NUM_SPLITS, RunSettings, TcavConfig, load_settings};
pub use error::TcavError;
pub use interpreter::Interpreter;
pub use model::{GradientLayer, Model, PrecomputedModel};
pub use tcav::{Tcav, TcavResult, TrialResult};
pub use types::{Dataset, Example, FieldSpec, JsonDict, ModelOutput, OutputSpec};
