use crate::NumTrait;
use rayon::prelude::*;

/// Sets each element to the same value.
/// `chunk_size` is break the work into tasks for multi-threading.
pub fn set_value<NumType: NumTrait>(
    a_slice: &mut [NumType],
    value: NumType,
    chunk_size: usize,
) {
    a_slice
        .par_chunks_mut(chunk_size.max(1))
        .for_each(|a_chunk: &mut [NumType]| {
            for a in a_chunk {
                *a = value;
            }
        });
}

/// Sum of all elements, accumulated per chunk.
pub fn sum<NumType: NumTrait>(a_slice: &[NumType], chunk_size: usize) -> NumType {
    a_slice
        .par_chunks(chunk_size.max(1))
        .map(|a_chunk| {
            a_chunk
                .iter()
                .fold(NumType::zero(), |acc, &a| acc + a)
        })
        .reduce(NumType::zero, |a, b| a + b)
}

/// Largest element, `None` for an empty slice.
pub fn max(a_slice: &[f64], chunk_size: usize) -> Option<f64> {
    a_slice
        .par_chunks(chunk_size.max(1))
        .map(|a_chunk| a_chunk.iter().copied().fold(f64::NEG_INFINITY, f64::max))
        .reduce_with(f64::max)
}

/// Smallest element, `None` for an empty slice.
pub fn min(a_slice: &[f64], chunk_size: usize) -> Option<f64> {
    a_slice
        .par_chunks(chunk_size.max(1))
        .map(|a_chunk| a_chunk.iter().copied().fold(f64::INFINITY, f64::min))
        .reduce_with(f64::min)
}

#[cfg(test)]
mod unit_tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    #[test]
    fn set_values_test() {
        {
            // Fill only the air segment of a profile.
            let mut profile = vec![203.0; 12];
            set_value(&mut profile[5..], 293.0, 3);
            assert!(profile[..5].iter().all(|&t| t == 203.0));
            assert!(profile[5..].iter().all(|&t| t == 293.0));
        }

        {
            let n = 1000;
            let chunk_size = 10;
            let value = 293.0;
            let mut a = vec![0.0; n];

            set_value(&mut a, value, chunk_size);

            for v in a {
                assert_approx_eq!(f64, v, value);
            }
        }
    }

    #[test]
    fn reductions() {
        let a: Vec<f64> = (0..1001).map(|i| i as f64).collect();
        assert_approx_eq!(f64, sum(&a, 7), 500.0 * 1001.0);
        assert_eq!(max(&a, 13), Some(1000.0));
        assert_eq!(min(&a, 13), Some(0.0));

        let empty: [f64; 0] = [];
        assert_eq!(max(&empty, 4), None);
        assert_eq!(min(&empty, 4), None);
        assert_approx_eq!(f64, sum(&empty, 4), 0.0);
    }
}
