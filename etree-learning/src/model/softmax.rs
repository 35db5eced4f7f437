// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

use etree_engine::types::ConfigError;

use crate::dataset::Instance;
use crate::model::{Model, ModelParams, dot, mean_of};

/// Multi-class softmax regression with one weight row and bias per class.
#[derive(Debug, Clone, PartialEq)]
pub struct SoftmaxRegression {
    weights: Vec<Vec<f64>>,
    biases: Vec<f64>,
    age: f64,
    lambda: f64,
    regularization: f64,
}

impl SoftmaxRegression {
    #[must_use]
    pub fn num_classes(&self) -> usize {
        self.biases.len()
    }

    #[must_use]
    pub fn weights(&self, class: usize) -> &[f64] {
        &self.weights[class]
    }
}

impl Model for SoftmaxRegression {
    fn from_params(params: &ModelParams) -> Result<Self, ConfigError> {
        let num_classes = params.num_classes.max(2);
        Ok(Self {
            weights: vec![vec![0.0; params.num_features]; num_classes],
            biases: vec![0.0; num_classes],
            age: 0.0,
            lambda: params.lambda,
            regularization: params.regularization,
        })
    }

    fn update(&mut self, instance: &Instance) {
        let probabilities = self.distribution(&instance.features);
        self.age += 1.0;
        let decay = 1.0 - self.regularization * self.lambda;
        for (class, p) in probabilities.into_iter().enumerate() {
            let target = if class == instance.label { 1.0 } else { 0.0 };
            let err = p - target;
            for (w, x) in self.weights[class].iter_mut().zip(&instance.features) {
                *w = *w * decay - self.lambda * err * x;
            }
            self.biases[class] -= self.lambda * err;
        }
    }

    fn merge_equal_weight(&self, others: &[&Self]) -> Self {
        let models = || std::iter::once(self).chain(others.iter().copied());
        let num_features = self.weights.first().map_or(0, Vec::len);
        let weights = (0..self.num_classes())
            .map(|class| mean_of(models().map(|m| m.weights[class].as_slice()), num_features))
            .collect();
        Self {
            weights,
            biases: mean_of(models().map(|m| m.biases.as_slice()), self.num_classes()),
            age: models().map(|m| m.age).fold(0.0, f64::max),
            lambda: models().map(|m| m.lambda).fold(f64::INFINITY, f64::min),
            regularization: self.regularization,
        }
    }

    fn distribution(&self, features: &[f64]) -> Vec<f64> {
        let outputs: Vec<f64> = self
            .weights
            .iter()
            .zip(&self.biases)
            .map(|(w, b)| dot(w, features) + b)
            .collect();
        // Shift by the largest output so exp cannot overflow
        let max = outputs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let exps: Vec<f64> = outputs.iter().map(|o| (o - max).exp()).collect();
        let total: f64 = exps.iter().sum();
        exps.into_iter().map(|e| e / total).collect()
    }

    fn age(&self) -> f64 {
        self.age
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::dataset::Dataset;

    fn three_classes() -> SoftmaxRegression {
        SoftmaxRegression::from_params(&ModelParams {
            num_features: 3,
            num_classes: 3,
            lambda: 0.5,
            ..ModelParams::default()
        })
        .unwrap()
    }

    #[test]
    fn uniform_at_start() {
        let model = three_classes();
        for p in model.distribution(&[1.0, 2.0, 3.0]) {
            assert_relative_eq!(p, 1.0 / 3.0);
        }
    }

    #[test]
    fn update_moves_towards_label() {
        let mut model = three_classes();
        model.update(&Instance {
            features: vec![1.0, 0.0, 0.0],
            label: 2,
        });
        // err is 1/3 for classes 0 and 1 and -2/3 for class 2
        assert_relative_eq!(model.weights(0)[0], -0.5 / 3.0);
        assert_relative_eq!(model.weights(2)[0], 1.0 / 3.0);
        assert_relative_eq!(model.weights(2)[1], 0.0);
        assert_eq!(model.predict(&[1.0, 0.0, 0.0]), 2);
    }

    #[test]
    fn learns_one_hot_classes() {
        let mut model = three_classes();
        let data: Dataset = (0..30)
            .map(|i| {
                let mut features = vec![0.0; 3];
                features[i % 3] = 1.0;
                Instance { features, label: i % 3 }
            })
            .collect();
        for _ in 0..5 {
            model.train(&data);
        }
        let (loss, accuracy) = model.loss_and_accuracy(&data);
        assert!(loss < 0.5);
        assert_relative_eq!(accuracy, 1.0);
    }

    #[test]
    fn merge_averages_rows() {
        let mut a = three_classes();
        let mut b = three_classes();
        a.weights[1] = vec![2.0, 0.0, 0.0];
        a.age = 2.0;
        b.biases = vec![3.0, 0.0, 0.0];
        b.age = 5.0;
        let merged = a.merge_equal_weight(&[&b]);
        assert_eq!(merged.weights(1), &[1.0, 0.0, 0.0]);
        assert_eq!(merged.biases, vec![1.5, 0.0, 0.0]);
        assert_relative_eq!(merged.age(), 5.0);
    }
}
