mod codec;

use ndarray::{Array1, ArrayD};

use crate::{MlErr, Result};

pub use codec::decode_cohort;

/// One trainable layer of a model.
pub type Tensor = ArrayD<f32>;

/// The trainable state of a model: one tensor per layer in a globally agreed order.
///
/// Every worker and the aggregator index layers the same way, so two vectors are only
/// comparable when their tensor count and per-position shapes match.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterVector {
    layers: Vec<Tensor>,
}

impl ParameterVector {
    /// Creates a new `ParameterVector` from its ordered layers.
    pub fn new(layers: Vec<Tensor>) -> Self {
        Self { layers }
    }

    /// Creates a vector holding a single one dimensional tensor.
    pub fn from_flat(values: Vec<f32>) -> Self {
        Self::new(vec![Array1::from_vec(values).into_dyn()])
    }

    pub fn layers(&self) -> &[Tensor] {
        &self.layers
    }

    pub fn into_layers(self) -> Vec<Tensor> {
        self.layers
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Returns the shape of every tensor, in layer order.
    pub fn shapes(&self) -> Vec<&[usize]> {
        self.layers.iter().map(|t| t.shape()).collect()
    }

    /// Checks `other` has the same tensor count and per-position shapes as `self`.
    ///
    /// # Arguments
    /// * `other` - The vector to compare against this one.
    /// * `index` - The position of `other` inside its cohort, used for error reporting.
    ///
    /// # Returns
    /// The first structural difference found, as a typed error.
    pub fn check_compatible(&self, other: &Self, index: usize) -> Result<()> {
        if other.len() != self.len() {
            return Err(MlErr::LayerCountMismatch {
                vector: index,
                got: other.len(),
                expected: self.len(),
            });
        }

        for (layer, (ours, theirs)) in self.layers.iter().zip(&other.layers).enumerate() {
            if ours.shape() != theirs.shape() {
                return Err(MlErr::ShapeMismatch {
                    vector: index,
                    layer,
                    got: theirs.shape().to_vec(),
                    expected: ours.shape().to_vec(),
                });
            }
        }

        Ok(())
    }

    /// Encodes the vector as a JSON array of nested lists, one per tensor.
    pub fn to_json(&self) -> Result<String> {
        let value = codec::encode_vector(self)?;
        Ok(serde_json::to_string(&value)?)
    }

    /// Decodes a vector previously written by `to_json`.
    pub fn from_json(text: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        codec::decode_vector(&value)
    }
}

impl From<Vec<Tensor>> for ParameterVector {
    fn from(layers: Vec<Tensor>) -> Self {
        Self::new(layers)
    }
}
