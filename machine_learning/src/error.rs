use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

/// The result type used in the entire machine learning module.
pub type Result<T> = std::result::Result<T, MlErr>;

/// The machine learning module's error type.
#[derive(Debug)]
pub enum MlErr {
    EmptyCohort,
    LayerCountMismatch {
        vector: usize,
        got: usize,
        expected: usize,
    },
    ShapeMismatch {
        vector: usize,
        layer: usize,
        got: Vec<usize>,
        expected: Vec<usize>,
    },
    Codec(String),
    Dataset(String),
    Diverged {
        step: usize,
    },
    Shape(ndarray::ShapeError),
    Json(serde_json::Error),
    Io(io::Error),
}

impl Display for MlErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MlErr::EmptyCohort => f.write_str("cannot average an empty set of parameter vectors"),
            MlErr::LayerCountMismatch {
                vector,
                got,
                expected,
            } => write!(
                f,
                "parameter vector {vector} has {got} tensors, expected {expected}"
            ),
            MlErr::ShapeMismatch {
                vector,
                layer,
                got,
                expected,
            } => write!(
                f,
                "tensor {layer} of parameter vector {vector} has shape {got:?}, expected {expected:?}"
            ),
            MlErr::Codec(detail) => write!(f, "malformed parameter encoding: {detail}"),
            MlErr::Dataset(detail) => write!(f, "invalid dataset: {detail}"),
            MlErr::Diverged { step } => write!(f, "training diverged at local step {step}"),
            MlErr::Shape(e) => write!(f, "shape error: {e}"),
            MlErr::Json(e) => write!(f, "json error: {e}"),
            MlErr::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for MlErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MlErr::Shape(e) => Some(e),
            MlErr::Json(e) => Some(e),
            MlErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ndarray::ShapeError> for MlErr {
    fn from(value: ndarray::ShapeError) -> Self {
        Self::Shape(value)
    }
}

impl From<serde_json::Error> for MlErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

impl From<io::Error> for MlErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}
