pub mod aggregation;
pub mod dataset;
pub mod error;
pub mod params;
pub mod training;

pub use aggregation::Aggregator;
pub use error::{MlErr, Result};
pub use params::{ParameterVector, Tensor};
