// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Linear models trained by the workers and averaged by the aggregators.

pub mod logistic;
pub mod softmax;

use std::fmt;
use std::str::FromStr;

use etree_engine::config_error;
use etree_engine::types::ConfigError;

use crate::dataset::{Dataset, Instance};

pub use logistic::LogisticRegression;
pub use softmax::SoftmaxRegression;

/// Probabilities are clipped to this before taking logs.
pub const LOSS_EPSILON: f64 = 1e-8;

pub const DEFAULT_LAMBDA: f64 = 0.01;

/// Shape and learning rate shared by every model built for a run.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelParams {
    pub num_features: usize,
    pub num_classes: usize,

    /// Learning rate.
    pub lambda: f64,

    /// Weight decay factor applied as `w *= 1 - regularization * lambda`.
    pub regularization: f64,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            num_features: 0,
            num_classes: 2,
            lambda: DEFAULT_LAMBDA,
            regularization: 0.0,
        }
    }
}

pub trait Model: Clone {
    /// Build a zero-initialised model.
    fn from_params(params: &ModelParams) -> Result<Self, ConfigError>;

    /// One stochastic gradient step on `instance`.
    fn update(&mut self, instance: &Instance);

    /// Equal-weight average of `self` and `others`.
    ///
    /// Ages take the maximum and the learning rate the minimum.
    #[must_use]
    fn merge_equal_weight(&self, others: &[&Self]) -> Self;

    /// Probability of each class.
    fn distribution(&self, features: &[f64]) -> Vec<f64>;

    /// Number of updates that went into the model.
    fn age(&self) -> f64;

    /// Most likely class; the lowest class wins ties.
    fn predict(&self, features: &[f64]) -> usize {
        let distribution = self.distribution(features);
        let mut best = 0;
        for (class, &p) in distribution.iter().enumerate() {
            if p > distribution[best] {
                best = class;
            }
        }
        best
    }

    /// One pass over `data` in order.
    fn train(&mut self, data: &Dataset) {
        for instance in data.iter() {
            self.update(instance);
        }
    }

    /// Mean cross-entropy and the fraction predicted correctly.
    ///
    /// An empty set gives `(0.0, 0.0)`.
    fn loss_and_accuracy(&self, data: &Dataset) -> (f64, f64) {
        if data.is_empty() {
            return (0.0, 0.0);
        }
        let mut loss = 0.0;
        let mut correct = 0usize;
        for instance in data.iter() {
            let distribution = self.distribution(&instance.features);
            let p = distribution.get(instance.label).copied().unwrap_or(0.0);
            loss -= p.max(LOSS_EPSILON).ln();
            if self.predict(&instance.features) == instance.label {
                correct += 1;
            }
        }
        let n = data.len() as f64;
        (loss / n, correct as f64 / n)
    }
}

/// The models that can be selected by name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ModelKind {
    #[default]
    Logistic,
    Softmax,
}

impl FromStr for ModelKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "logistic" | "logisticregression" => Ok(ModelKind::Logistic),
            "softmax" | "softmaxregression" => Ok(ModelKind::Softmax),
            _ => config_error!(format!("Unknown model '{s}'")),
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ModelKind::Logistic => write!(f, "logistic"),
            ModelKind::Softmax => write!(f, "softmax"),
        }
    }
}

pub(crate) fn dot(weights: &[f64], features: &[f64]) -> f64 {
    weights.iter().zip(features).map(|(w, x)| w * x).sum()
}

/// Element-wise mean of equally long vectors.
pub(crate) fn mean_of<'a, I>(vectors: I, len: usize) -> Vec<f64>
where
    I: IntoIterator<Item = &'a [f64]>,
{
    let mut total = vec![0.0; len];
    let mut count = 0usize;
    for vector in vectors {
        for (t, v) in total.iter_mut().zip(vector) {
            *t += v;
        }
        count += 1;
    }
    if count > 0 {
        for t in &mut total {
            *t /= count as f64;
        }
    }
    total
}
