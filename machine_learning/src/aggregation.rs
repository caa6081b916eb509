//! Uniform federated averaging.

use log::debug;
use ndarray::ArrayD;

use crate::{MlErr, ParameterVector, Result};

/// Averages the parameter vectors of a cohort, tensor position by tensor position.
///
/// Every participant weighs the same regardless of how many samples it trained on (FedAvg
/// without sample-size weighting). Sums are accumulated in `f64` and the result is cast back
/// to `f32`, so the output keeps the input dtype and shapes.
#[derive(Debug, Default, Clone, Copy)]
pub struct Aggregator;

impl Aggregator {
    pub fn new() -> Self {
        Self
    }

    /// Computes the element-wise arithmetic mean of `vectors`.
    ///
    /// # Arguments
    /// * `vectors` - One parameter vector per participant, all sharing the same structure.
    ///
    /// # Returns
    /// The averaged vector, or an error if `vectors` is empty or any vector differs in tensor
    /// count or shape from the first one. Nothing is averaged on error.
    pub fn mean(&self, vectors: &[ParameterVector]) -> Result<ParameterVector> {
        let (first, rest) = vectors.split_first().ok_or(MlErr::EmptyCohort)?;

        for (i, other) in rest.iter().enumerate() {
            first.check_compatible(other, i + 1)?;
        }

        let n = vectors.len() as f64;
        debug!(participants = vectors.len(), tensors = first.len(); "averaging cohort");

        let layers = first
            .layers()
            .iter()
            .enumerate()
            .map(|(pos, tensor)| {
                let mut acc: ArrayD<f64> = tensor.mapv(f64::from);
                for other in rest {
                    acc.zip_mut_with(&other.layers()[pos], |a, &x| *a += f64::from(x));
                }

                acc.mapv(|sum| (sum / n) as f32)
            })
            .collect();

        Ok(ParameterVector::new(layers))
    }
}
