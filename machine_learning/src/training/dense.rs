use std::num::NonZeroUsize;

use log::debug;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, Ix1, Ix2};
use rand::{Rng, SeedableRng, rngs::StdRng, seq::SliceRandom};

use super::{LocalTrainer, TrainStats};
use crate::{MlErr, ParameterVector, Result, Tensor, dataset::Dataset};

/// Hyperparameters of the reference `DenseTrainer`.
#[derive(Debug, Clone)]
pub struct DenseConfig {
    pub hidden: NonZeroUsize,
    pub classes: NonZeroUsize,
    pub epochs: NonZeroUsize,
    pub steps_per_epoch: NonZeroUsize,
    pub batch_size: NonZeroUsize,
    pub learning_rate: f32,
    /// Workers sharing a seed start every run from the same parameters.
    pub seed: u64,
}

impl Default for DenseConfig {
    fn default() -> Self {
        let nz = |n| NonZeroUsize::new(n).unwrap_or(NonZeroUsize::MIN);

        Self {
            hidden: nz(128),
            classes: nz(10),
            epochs: nz(5),
            steps_per_epoch: nz(3),
            batch_size: nz(32),
            learning_rate: 0.1,
            seed: 42,
        }
    }
}

/// A dense classifier (ReLU hidden layer, softmax output) trained with minibatch SGD.
///
/// Parameters are laid out as `[W1, b1, W2, b2]`, kernels being `[fan_in, fan_out]`.
pub struct DenseTrainer {
    cfg: DenseConfig,
    train: Dataset,
    test: Dataset,
    w1: Array2<f32>,
    b1: Array1<f32>,
    w2: Array2<f32>,
    b2: Array1<f32>,
    rng: StdRng,
}

impl DenseTrainer {
    /// Creates a new `DenseTrainer` with Glorot-uniform kernels and zero biases.
    ///
    /// # Arguments
    /// * `cfg` - The trainer's hyperparameters.
    /// * `train` - This worker's private shard.
    /// * `test` - The held-out evaluation set.
    ///
    /// # Returns
    /// An error if the datasets disagree on feature count or hold labels outside `cfg.classes`.
    pub fn new(cfg: DenseConfig, train: Dataset, test: Dataset) -> Result<Self> {
        if train.features() != test.features() {
            return Err(MlErr::Dataset(format!(
                "train set has {} features, test set has {}",
                train.features(),
                test.features()
            )));
        }

        let classes = cfg.classes.get();
        let seen = train.classes().max(test.classes());
        if seen > classes {
            return Err(MlErr::Dataset(format!(
                "labels reach class {}, model only has {classes}",
                seen - 1
            )));
        }

        let hidden = cfg.hidden.get();
        let mut rng = StdRng::seed_from_u64(cfg.seed);
        let w1 = glorot(train.features(), hidden, &mut rng);
        let w2 = glorot(hidden, classes, &mut rng);

        Ok(Self {
            b1: Array1::zeros(hidden),
            b2: Array1::zeros(classes),
            cfg,
            train,
            test,
            w1,
            w2,
            rng,
        })
    }

    /// Returns the hidden pre-activations and the output logits for `x`.
    fn forward(&self, x: ArrayView2<'_, f32>) -> (Array2<f32>, Array2<f32>) {
        let z1 = x.dot(&self.w1) + &self.b1;
        let logits = z1.mapv(relu).dot(&self.w2) + &self.b2;
        (z1, logits)
    }

    /// One SGD step on a batch, returns the mean cross-entropy before the update.
    fn step(&mut self, x: ArrayView2<'_, f32>, y: &Array1<usize>) -> f32 {
        let m = x.nrows() as f32;
        let (z1, mut probs) = self.forward(x);
        let a1 = z1.mapv(relu);
        softmax_rows(&mut probs);

        let mut loss = 0.0;
        for (i, &label) in y.iter().enumerate() {
            loss -= probs[[i, label]].max(f32::MIN_POSITIVE).ln();
            probs[[i, label]] -= 1.0;
        }

        let dz2 = probs.mapv(|g| g / m);
        let dw2 = a1.t().dot(&dz2);
        let db2 = dz2.sum_axis(Axis(0));

        let mut dz1 = dz2.dot(&self.w2.t());
        dz1.zip_mut_with(&z1, |g, &z| {
            if z <= 0.0 {
                *g = 0.0;
            }
        });
        let dw1 = x.t().dot(&dz1);
        let db1 = dz1.sum_axis(Axis(0));

        let lr = self.cfg.learning_rate;
        self.w1.scaled_add(-lr, &dw1);
        self.b1.scaled_add(-lr, &db1);
        self.w2.scaled_add(-lr, &dw2);
        self.b2.scaled_add(-lr, &db2);

        loss / m
    }
}

impl LocalTrainer for DenseTrainer {
    fn train(&mut self) -> Result<TrainStats> {
        let batch_size = self.cfg.batch_size.get();
        let mut order: Vec<usize> = (0..self.train.len()).collect();
        let mut steps = 0;
        let mut total = 0.0;

        for _ in 0..self.cfg.epochs.get() {
            order.shuffle(&mut self.rng);

            for chunk in order.chunks(batch_size).take(self.cfg.steps_per_epoch.get()) {
                let (x, y) = self.train.batch(chunk);
                let loss = self.step(x.view(), &y);
                steps += 1;

                if !loss.is_finite() {
                    return Err(MlErr::Diverged { step: steps });
                }

                total += loss;
            }
        }

        let loss = total / steps as f32;
        debug!(steps = steps, loss = loss; "local training done");
        Ok(TrainStats { steps, loss })
    }

    fn evaluate(&self) -> Result<f32> {
        let (_, logits) = self.forward(self.test.x());

        let correct = logits
            .rows()
            .into_iter()
            .zip(self.test.y())
            .filter(|(row, label)| argmax(*row) == **label)
            .count();

        Ok(correct as f32 / self.test.len() as f32)
    }

    fn parameters(&self) -> ParameterVector {
        ParameterVector::new(vec![
            self.w1.clone().into_dyn(),
            self.b1.clone().into_dyn(),
            self.w2.clone().into_dyn(),
            self.b2.clone().into_dyn(),
        ])
    }

    fn set_parameters(&mut self, params: ParameterVector) -> Result<()> {
        self.parameters().check_compatible(&params, 0)?;

        let got = params.len();
        let layers: [Tensor; 4] = params.into_layers().try_into().map_err(|_| {
            MlErr::LayerCountMismatch {
                vector: 0,
                got,
                expected: 4,
            }
        })?;
        let [w1, b1, w2, b2] = layers;

        self.w1 = w1.into_dimensionality::<Ix2>()?;
        self.b1 = b1.into_dimensionality::<Ix1>()?;
        self.w2 = w2.into_dimensionality::<Ix2>()?;
        self.b2 = b2.into_dimensionality::<Ix1>()?;
        Ok(())
    }
}

fn glorot(fan_in: usize, fan_out: usize, rng: &mut StdRng) -> Array2<f32> {
    let limit = (6.0 / (fan_in + fan_out) as f32).sqrt();
    Array2::from_shape_fn((fan_in, fan_out), |_| rng.random_range(-limit..limit))
}

fn relu(v: f32) -> f32 {
    v.max(0.0)
}

fn softmax_rows(logits: &mut Array2<f32>) {
    for mut row in logits.rows_mut() {
        let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
    }
}

fn argmax(row: ArrayView1<'_, f32>) -> usize {
    row.iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |best, (i, &v)| {
            if v > best.1 { (i, v) } else { best }
        })
        .0
}
