//! Small dense-vector helpers.

/// Dot product of two equal-length vectors. Callers check lengths.
pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len(), "dot product of mismatched vectors");
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Euclidean norm.
pub fn l2_norm(a: &[f64]) -> f64 {
    dot(a, a).sqrt()
}
