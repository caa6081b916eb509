use std::{fs, path::Path};

use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::Deserialize;

use crate::{MlErr, Result};

/// A labelled classification dataset held in memory.
///
/// Features are row-major, one sample per row; labels are class indices.
#[derive(Debug, Clone)]
pub struct Dataset {
    x: Array2<f32>,
    y: Array1<usize>,
}

#[derive(Deserialize)]
struct RawDataset {
    x: Vec<Vec<f32>>,
    y: Vec<usize>,
}

impl Dataset {
    /// Creates a new dataset from owned buffers.
    ///
    /// # Returns
    /// An error if the dataset is empty or there is not exactly one label per row.
    pub fn new(x: Array2<f32>, y: Array1<usize>) -> Result<Self> {
        if x.nrows() == 0 {
            return Err(MlErr::Dataset("dataset must be non-empty".into()));
        }

        if x.nrows() != y.len() {
            return Err(MlErr::Dataset(format!(
                "{} feature rows but {} labels",
                x.nrows(),
                y.len()
            )));
        }

        Ok(Self { x, y })
    }

    /// Loads a dataset stored as `{ "x": [[..], ..], "y": [..] }`.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let raw: RawDataset = serde_json::from_str(&text)?;

        let cols = raw.x.first().map(Vec::len).unwrap_or_default();
        if let Some(row) = raw.x.iter().position(|r| r.len() != cols) {
            return Err(MlErr::Dataset(format!(
                "{}: row {row} has {} features, expected {cols}",
                path.display(),
                raw.x[row].len()
            )));
        }

        let rows = raw.x.len();
        let flat = raw.x.into_iter().flatten().collect();
        let x = Array2::from_shape_vec((rows, cols), flat)?;

        Self::new(x, Array1::from_vec(raw.y))
    }

    /// Divides every feature by `scale`, e.g. `255.0` for raw pixel intensities.
    pub fn normalize(&mut self, scale: f32) {
        self.x.mapv_inplace(|v| v / scale);
    }

    pub fn len(&self) -> usize {
        self.x.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.x.nrows() == 0
    }

    pub fn features(&self) -> usize {
        self.x.ncols()
    }

    /// Returns one past the largest label.
    pub fn classes(&self) -> usize {
        self.y.iter().max().map_or(0, |&max| max + 1)
    }

    pub fn x(&self) -> ArrayView2<'_, f32> {
        self.x.view()
    }

    pub fn y(&self) -> &Array1<usize> {
        &self.y
    }

    /// Copies the rows at `indices` into a new batch.
    pub fn batch(&self, indices: &[usize]) -> (Array2<f32>, Array1<usize>) {
        (
            self.x.select(Axis(0), indices),
            self.y.select(Axis(0), indices),
        )
    }
}
