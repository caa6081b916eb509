mod dense;
mod trainer;

pub use dense::{DenseConfig, DenseTrainer};
pub use trainer::{LocalTrainer, TrainStats};
