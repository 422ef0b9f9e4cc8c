//! Combining several embeddings of one query variant into a single probe.

use ndarray::{Array1, ArrayView1};

use docent_core::Aggregation;

/// Weighted mean of `vectors`. `None` when empty or dimensions disagree.
pub fn aggregate(vectors: &[Vec<f32>], aggregation: Aggregation) -> Option<Vec<f32>> {
    let dim = vectors.first()?.len();
    if dim == 0 || vectors.iter().any(|v| v.len() != dim) {
        return None;
    }

    let weights: Vec<f32> = match aggregation {
        Aggregation::Uniform => vec![1.0; vectors.len()],
        Aggregation::Decay(factor) => (0..vectors.len()).map(|i| factor.powi(i as i32)).collect(),
    };
    let total: f32 = weights.iter().sum();
    if total <= 0.0 {
        return None;
    }

    let mut acc = Array1::<f32>::zeros(dim);
    for (v, w) in vectors.iter().zip(&weights) {
        acc.scaled_add(*w / total, &ArrayView1::from(v.as_slice()));
    }
    Some(acc.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_mean() {
        let v = aggregate(&[vec![1.0, 0.0], vec![0.0, 1.0]], Aggregation::Uniform).unwrap();
        assert_eq!(v, vec![0.5, 0.5]);
    }

    #[test]
    fn test_decay_weights_first_input_most() {
        let v = aggregate(&[vec![1.0, 0.0], vec![0.0, 1.0]], Aggregation::Decay(0.5)).unwrap();
        assert!((v[0] - 2.0 / 3.0).abs() < 1e-6);
        assert!((v[1] - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_single_vector_is_identity() {
        let v = aggregate(&[vec![0.3, 0.4]], Aggregation::Decay(0.2)).unwrap();
        assert!((v[0] - 0.3).abs() < 1e-6 && (v[1] - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_rejects_mismatch_and_empty() {
        assert!(aggregate(&[], Aggregation::Uniform).is_none());
        assert!(aggregate(&[vec![1.0], vec![1.0, 2.0]], Aggregation::Uniform).is_none());
    }
}
