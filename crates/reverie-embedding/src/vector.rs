//! Vector math and the pgvector wire format.
//!
//! All stored embeddings are L2-normalized, so cosine similarity collapses
//! to a single multiply-add pass (the dot product).

use crate::error::EmbeddingError;

/// Tolerance for the self-similarity invariant of normalized vectors.
pub const NORM_EPSILON: f32 = 1e-5;

/// Dot product. For two L2-normalized vectors this IS the cosine similarity.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Scale to unit length. Zero vectors are returned unchanged.
pub fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

pub fn is_l2_normalized(v: &[f32]) -> bool {
    let norm_sq: f32 = v.iter().map(|x| x * x).sum();
    (norm_sq - 1.0).abs() <= NORM_EPSILON * 2.0
}

/// Render a vector as a pgvector literal: `[f1,f2,…,fN]`.
///
/// Every component must be a finite number — NaN and infinities are rejected
/// before string construction so no malformed token can reach the SQL layer.
pub fn format_vector_literal(v: &[f32]) -> Result<String, EmbeddingError> {
    let mut out = String::with_capacity(v.len() * 10 + 2);
    out.push('[');
    for (i, x) in v.iter().enumerate() {
        if !x.is_finite() {
            return Err(EmbeddingError::InvalidVector(format!(
                "non-finite component at index {i}"
            )));
        }
        if i > 0 {
            out.push(',');
        }
        out.push_str(&format!("{x}"));
    }
    out.push(']');
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_of_normalized_self_is_one() {
        let mut v: Vec<f32> = (0..384).map(|i| (i as f32 * 0.37).sin()).collect();
        l2_normalize(&mut v);
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() <= NORM_EPSILON, "sim={sim}");
        assert!(is_l2_normalized(&v));
    }

    #[test]
    fn normalize_leaves_zero_vector() {
        let mut v = vec![0.0f32; 8];
        l2_normalize(&mut v);
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn literal_formats_plain_floats() {
        let lit = format_vector_literal(&[0.1, 0.2, 0.3]).unwrap();
        assert_eq!(lit, "[0.1,0.2,0.3]");
    }

    #[test]
    fn literal_rejects_non_finite() {
        assert!(format_vector_literal(&[0.1, f32::NAN]).is_err());
        assert!(format_vector_literal(&[f32::INFINITY]).is_err());
        assert!(format_vector_literal(&[0.1, f32::NEG_INFINITY, 0.3]).is_err());
    }

    #[test]
    fn orthogonal_vectors_have_zero_similarity() {
        let a = [1.0, 0.0];
        let b = [0.0, 1.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }
}
