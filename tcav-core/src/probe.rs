//! Linear concept probes.
//!
//! A probe is a linear classifier separating concept activations (label 1)
//! from comparison activations (label 0). Its weight vector is the concept
//! activation vector (CAV). Probes are fit with stochastic gradient descent
//! on the hinge loss with an L2 penalty, and scored on a stratified held-out
//! partition.

use crate::error::TcavError;
use crate::linalg::dot;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Row indices of a train/test partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StratifiedSplit {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Partition `y` into train and test rows so that both partitions keep the
/// class proportions of `y`.
///
/// The test partition holds `ceil(test_size * n)` rows, allocated to classes
/// by largest remainder. Every class must end up with at least one row in
/// each partition.
pub fn stratified_split<R: Rng + ?Sized>(
    y: &[u8],
    test_size: f64,
    rng: &mut R,
) -> Result<StratifiedSplit, TcavError> {
    let n = y.len();
    let mut classes: Vec<u8> = y.to_vec();
    classes.sort_unstable();
    classes.dedup();

    if classes != [0u8, 1] {
        return Err(TcavError::data_insufficiency(format!(
            "labels must contain both class 0 and class 1, found {classes:?}"
        )));
    }

    let members: Vec<Vec<usize>> = classes
        .iter()
        .map(|&c| (0..n).filter(|&i| y[i] == c).collect())
        .collect();

    if let Some((class, rows)) = classes.iter().zip(&members).find(|(_, m)| m.len() < 2) {
        return Err(TcavError::data_insufficiency(format!(
            "class {class} has {} member(s); at least 2 are needed to stratify",
            rows.len()
        )));
    }

    let n_test = (test_size * n as f64).ceil() as usize;
    let n_train = n.saturating_sub(n_test);
    if n_test < classes.len() || n_train < classes.len() {
        return Err(TcavError::data_insufficiency(format!(
            "{n} rows with test_size {test_size} gives {n_train} train / {n_test} test rows \
             for {} classes",
            classes.len()
        )));
    }

    // Floor allocation, then hand out the remainder by largest fractional part.
    let exact: Vec<f64> = members
        .iter()
        .map(|m| n_test as f64 * m.len() as f64 / n as f64)
        .collect();
    let mut per_class: Vec<usize> = exact.iter().map(|e| e.floor() as usize).collect();
    let mut leftover = n_test - per_class.iter().sum::<usize>();
    let mut by_remainder: Vec<usize> = (0..classes.len()).collect();
    by_remainder.sort_by(|&a, &b| {
        let ra = exact[a] - exact[a].floor();
        let rb = exact[b] - exact[b].floor();
        rb.total_cmp(&ra).then(a.cmp(&b))
    });
    for &k in &by_remainder {
        if leftover == 0 {
            break;
        }
        per_class[k] += 1;
        leftover -= 1;
    }

    let mut split = StratifiedSplit {
        train: Vec::with_capacity(n_train),
        test: Vec::with_capacity(n_test),
    };
    for ((class, rows), &k_test) in classes.iter().zip(members).zip(&per_class) {
        if k_test == 0 || k_test >= rows.len() {
            return Err(TcavError::data_insufficiency(format!(
                "class {class} cannot be represented in both partitions \
                 ({k_test} of {} rows held out)",
                rows.len()
            )));
        }
        let mut rows = rows;
        rows.shuffle(rng);
        split.test.extend_from_slice(&rows[..k_test]);
        split.train.extend_from_slice(&rows[k_test..]);
    }
    Ok(split)
}

/// A fitted linear binary classifier.
///
/// Inputs to [`LinearProbe::decision_function`] and [`LinearProbe::predict`]
/// must have exactly `weights.len()` features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearProbe {
    pub weights: Vec<f64>,
    pub intercept: f64,
    /// Epochs run before convergence or the iteration cap.
    pub epochs: usize,
}

impl LinearProbe {
    pub fn decision_function(&self, x: &[f64]) -> f64 {
        dot(&self.weights, x) + self.intercept
    }

    /// Predict 1 (concept) when the decision value is strictly positive.
    pub fn predict(&self, x: &[f64]) -> u8 {
        u8::from(self.decision_function(x) > 0.0)
    }

    /// Fraction of `rows` whose prediction matches the label exactly.
    pub fn accuracy(&self, x: &[Vec<f64>], y: &[u8], rows: &[usize]) -> f64 {
        if rows.is_empty() {
            return 0.0;
        }
        let correct = rows
            .iter()
            .filter(|&&i| self.predict(&x[i]) == y[i])
            .count();
        correct as f64 / rows.len() as f64
    }
}

/// Hinge-loss SGD classifier with L2 regularisation and the "optimal"
/// learning-rate schedule `eta = 1 / (alpha * (t0 + t))`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SgdClassifier {
    /// L2 penalty strength.
    pub alpha: f64,
    pub max_iter: usize,
    /// Early-stopping tolerance on the per-epoch summed loss, scaled by the
    /// number of training rows.
    pub tol: f64,
    /// Consecutive epochs without improvement before stopping.
    pub n_iter_no_change: usize,
}

impl Default for SgdClassifier {
    fn default() -> Self {
        Self {
            alpha: 1e-4,
            max_iter: 1000,
            tol: 1e-3,
            n_iter_no_change: 5,
        }
    }
}

impl SgdClassifier {
    /// Fit on the rows of `x` listed in `rows`.
    pub fn fit<R: Rng + ?Sized>(
        &self,
        x: &[Vec<f64>],
        y: &[u8],
        rows: &[usize],
        rng: &mut R,
    ) -> Result<LinearProbe, TcavError> {
        let Some(&first) = rows.first() else {
            return Err(TcavError::data_insufficiency("no training rows"));
        };
        let n_features = x[first].len();
        if let Some(&bad) = rows.iter().find(|&&i| x[i].len() != n_features) {
            return Err(TcavError::DimensionMismatch {
                expected: n_features,
                actual: x[bad].len(),
            });
        }

        // Initial step size heuristic; for the hinge loss |dloss(-typw, 1)| = 1.
        let typw = (1.0 / self.alpha.sqrt()).sqrt();
        let optimal_init = 1.0 / (typw * self.alpha);

        let mut weights = vec![0.0; n_features];
        let mut intercept = 0.0;
        let mut order = rows.to_vec();
        let mut t = 1.0;
        let mut best_loss = f64::INFINITY;
        let mut no_improvement = 0;
        let mut epochs = 0;

        for _ in 0..self.max_iter {
            order.shuffle(rng);
            let mut sumloss = 0.0;

            for &i in &order {
                let target = if y[i] == 1 { 1.0 } else { -1.0 };
                let z = target * (dot(&weights, &x[i]) + intercept);
                sumloss += (1.0 - z).max(0.0);

                let eta = 1.0 / (self.alpha * (optimal_init + t - 1.0));
                // Shrink first, then step along the hinge subgradient.
                let decay = (1.0 - eta * self.alpha).max(0.0);
                weights.iter_mut().for_each(|w| *w *= decay);
                if z <= 1.0 {
                    let update = eta * target;
                    for (w, xi) in weights.iter_mut().zip(&x[i]) {
                        *w += update * xi;
                    }
                    intercept += update;
                }
                t += 1.0;
            }
            epochs += 1;

            if sumloss > best_loss - self.tol * order.len() as f64 {
                no_improvement += 1;
            } else {
                no_improvement = 0;
            }
            if sumloss < best_loss {
                best_loss = sumloss;
            }
            if no_improvement >= self.n_iter_no_change {
                break;
            }
        }

        if weights.iter().any(|w| !w.is_finite()) || !intercept.is_finite() {
            return Err(TcavError::degenerate("probe weights diverged"));
        }
        tracing::trace!(epochs, best_loss, "Probe converged");

        Ok(LinearProbe {
            weights,
            intercept,
            epochs,
        })
    }
}

/// A concept activation vector and the held-out accuracy of its probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedCav {
    pub cav: Vec<f64>,
    pub accuracy: f64,
}

/// Trains CAVs with a fixed partitioning and classifier setup.
#[derive(Debug, Clone)]
pub struct ProbeTrainer {
    classifier: SgdClassifier,
    test_size: f64,
    random_state: Option<u64>,
}

impl ProbeTrainer {
    pub fn new(test_size: f64, random_state: Option<u64>) -> Self {
        Self {
            classifier: SgdClassifier::default(),
            test_size,
            random_state,
        }
    }

    pub fn with_classifier(mut self, classifier: SgdClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    fn rng(&self) -> StdRng {
        match self.random_state {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }

    /// Split, fit and evaluate. Same `random_state` gives the same partition
    /// and the same weights.
    pub fn train(&self, x: &[Vec<f64>], y: &[u8]) -> Result<TrainedCav, TcavError> {
        if x.len() != y.len() {
            return Err(TcavError::DimensionMismatch {
                expected: x.len(),
                actual: y.len(),
            });
        }
        if let Some(first) = x.first() {
            if let Some(row) = x.iter().find(|row| row.len() != first.len()) {
                return Err(TcavError::DimensionMismatch {
                    expected: first.len(),
                    actual: row.len(),
                });
            }
        }
        let split = stratified_split(y, self.test_size, &mut self.rng())?;
        let probe = self.classifier.fit(x, y, &split.train, &mut self.rng())?;
        let accuracy = probe.accuracy(x, y, &split.test);

        Ok(TrainedCav {
            cav: probe.weights,
            accuracy,
        })
    }
}
