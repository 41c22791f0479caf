//! In-memory checkpoint representation.

use ckptmerge_core::Tensor;
use indexmap::IndexMap;

/// Ordered mapping from parameter name to tensor.
///
/// Order follows insertion: the loader's key order for inputs, then base
/// keys followed by adopted donor keys for a merge result.
pub type WeightMap = IndexMap<String, Tensor>;

/// Total size of all tensor buffers in bytes.
pub fn total_bytes(weights: &WeightMap) -> usize {
    weights.values().map(Tensor::nbytes).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ckptmerge_core::Dtype;

    #[test]
    fn test_total_bytes() {
        let mut weights = WeightMap::new();
        weights.insert("a".into(), Tensor::from_f32(vec![4], &[0.0; 4]).unwrap());
        weights.insert(
            "b".into(),
            Tensor::from_f64_values(Dtype::Float16, vec![2, 3], &[0.0; 6]).unwrap(),
        );

        assert_eq!(total_bytes(&weights), 16 + 12);
        assert_eq!(total_bytes(&WeightMap::new()), 0);
    }
}
