//! Significance testing of TCAV scores across trials.
//!
//! Each comparison split yields one TCAV score. If the concept has no
//! influence, those scores scatter around 0.5; a two-sided one-sample t-test
//! against 0.5 gives the p-value reported with the result.

use crate::error::TcavError;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};

/// TCAV score expected when the concept has no effect.
pub const NULL_TCAV_SCORE: f64 = 0.5;

/// Result of a one-sample t-test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TTestResult {
    pub statistic: f64,
    /// Two-sided p-value.
    pub p_value: f64,
    /// Degrees of freedom.
    pub df: f64,
}

/// One-sample t-test: H₀: μ = `population_mean`, H₁: μ ≠ `population_mean`.
///
/// With zero sample variance the statistic diverges: if the sample mean
/// differs from `population_mean` the p-value is 0, and if it equals it the
/// statistic is 0/0 and the test fails with a degenerate-score error.
pub fn ttest_1samp(sample: &[f64], population_mean: f64) -> Result<TTestResult, TcavError> {
    let n = sample.len();
    if n < 2 {
        return Err(TcavError::degenerate(format!(
            "t-test requires at least 2 samples, got {n}"
        )));
    }
    if sample.iter().any(|x| !x.is_finite()) {
        return Err(TcavError::degenerate("t-test sample contains non-finite values"));
    }

    let nf = n as f64;
    let mean = sample.iter().sum::<f64>() / nf;
    let variance = sample.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (nf - 1.0);
    let df = nf - 1.0;
    let diff = mean - population_mean;

    if variance == 0.0 {
        if diff == 0.0 {
            return Err(TcavError::degenerate(format!(
                "all {n} scores equal the null mean {population_mean}; t statistic is undefined"
            )));
        }
        return Ok(TTestResult {
            statistic: diff.signum() * f64::INFINITY,
            p_value: 0.0,
            df,
        });
    }

    // t = (x̄ - μ₀) / (s / √n)
    let statistic = diff / (variance.sqrt() / nf.sqrt());
    let t_dist = StudentsT::new(0.0, 1.0, df)
        .map_err(|e| TcavError::degenerate(format!("invalid t distribution: {e}")))?;
    let p_value = (2.0 * t_dist.sf(statistic.abs())).clamp(0.0, 1.0);

    Ok(TTestResult {
        statistic,
        p_value,
        df,
    })
}

/// Two-sided p-value of the trial scores against [`NULL_TCAV_SCORE`].
pub fn hypothesis_test(scores: &[f64]) -> Result<f64, TcavError> {
    ttest_1samp(scores, NULL_TCAV_SCORE).map(|r| r.p_value)
}
