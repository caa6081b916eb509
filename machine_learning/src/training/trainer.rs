use crate::{ParameterVector, Result};

/// What a call to `LocalTrainer::train` did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainStats {
    pub steps: usize,
    pub loss: f32,
}

/// A model trained on a private shard that exposes its state as a `ParameterVector`.
///
/// The federated rounds only rely on this contract, never on the model inside.
pub trait LocalTrainer {
    /// Runs the configured amount of local optimization steps.
    fn train(&mut self) -> Result<TrainStats>;

    /// Returns the accuracy on the held-out set, in `[0, 1]`.
    fn evaluate(&self) -> Result<f32>;

    /// Snapshots the current trainable tensors.
    fn parameters(&self) -> ParameterVector;

    /// Replaces the trainable tensors.
    ///
    /// # Returns
    /// An error, leaving the model untouched, if `params` has a different structure.
    fn set_parameters(&mut self, params: ParameterVector) -> Result<()>;
}
