// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

use etree_engine::config_error;
use etree_engine::types::ConfigError;

use crate::dataset::Instance;
use crate::model::{Model, ModelParams, dot, mean_of};

/// Binary logistic regression.
#[derive(Debug, Clone, PartialEq)]
pub struct LogisticRegression {
    weights: Vec<f64>,
    bias: f64,
    age: f64,
    lambda: f64,
    regularization: f64,
}

impl LogisticRegression {
    fn positive_probability(&self, features: &[f64]) -> f64 {
        1.0 / (1.0 + (-(dot(&self.weights, features) + self.bias)).exp())
    }

    #[must_use]
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    #[must_use]
    pub fn bias(&self) -> f64 {
        self.bias
    }

    #[must_use]
    pub fn lambda(&self) -> f64 {
        self.lambda
    }
}

impl Model for LogisticRegression {
    fn from_params(params: &ModelParams) -> Result<Self, ConfigError> {
        if params.num_classes > 2 {
            return config_error!(format!(
                "Logistic regression needs 2 classes, the data has {}",
                params.num_classes
            ));
        }
        Ok(Self {
            weights: vec![0.0; params.num_features],
            bias: 0.0,
            age: 0.0,
            lambda: params.lambda,
            regularization: params.regularization,
        })
    }

    fn update(&mut self, instance: &Instance) {
        let label = if instance.label == 0 { 0.0 } else { 1.0 };
        let err = self.positive_probability(&instance.features) - label;
        self.age += 1.0;
        let decay = 1.0 - self.regularization * self.lambda;
        for (w, x) in self.weights.iter_mut().zip(&instance.features) {
            *w = *w * decay - self.lambda * err * x;
        }
        self.bias -= self.lambda * err;
    }

    fn merge_equal_weight(&self, others: &[&Self]) -> Self {
        let models = || std::iter::once(self).chain(others.iter().copied());
        let count = (others.len() + 1) as f64;
        Self {
            weights: mean_of(models().map(|m| m.weights.as_slice()), self.weights.len()),
            bias: models().map(|m| m.bias).sum::<f64>() / count,
            age: models().map(|m| m.age).fold(0.0, f64::max),
            lambda: models().map(|m| m.lambda).fold(f64::INFINITY, f64::min),
            regularization: self.regularization,
        }
    }

    fn distribution(&self, features: &[f64]) -> Vec<f64> {
        let p = self.positive_probability(features);
        vec![1.0 - p, p]
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

    fn params(num_features: usize) -> ModelParams {
        ModelParams {
            num_features,
            ..ModelParams::default()
        }
    }

    #[test]
    fn single_update() {
        let mut model = LogisticRegression::from_params(&params(2)).unwrap();
        model.update(&Instance {
            features: vec![1.0, 2.0],
            label: 1,
        });
        // p = 0.5 so err = -0.5 and each weight moves by 0.005 * x
        assert_relative_eq!(model.weights()[0], 0.005);
        assert_relative_eq!(model.weights()[1], 0.01);
        assert_relative_eq!(model.bias(), 0.005);
        assert_relative_eq!(model.age(), 1.0);
    }

    #[test]
    fn regularization_decays_weights() {
        let mut model = LogisticRegression::from_params(&ModelParams {
            num_features: 1,
            lambda: 0.5,
            regularization: 1.0,
            ..ModelParams::default()
        })
        .unwrap();
        model.weights[0] = 1.0;
        model.update(&Instance {
            features: vec![0.0],
            label: 0,
        });
        assert_relative_eq!(model.weights()[0], 0.5);
    }

    #[test]
    fn zero_model_loss_is_ln2() {
        let model = LogisticRegression::from_params(&params(1)).unwrap();
        let eval: Dataset = [
            Instance {
                features: vec![1.0],
                label: 0,
            },
            Instance {
                features: vec![-1.0],
                label: 1,
            },
        ]
        .into_iter()
        .collect();
        let (loss, accuracy) = model.loss_and_accuracy(&eval);
        assert_relative_eq!(loss, std::f64::consts::LN_2);
        assert_relative_eq!(accuracy, 0.5);
    }

    #[test]
    fn learns_separable_data() {
        let mut model = LogisticRegression::from_params(&ModelParams {
            num_features: 1,
            lambda: 0.5,
            ..ModelParams::default()
        })
        .unwrap();
        let data: Dataset = (0..20)
            .map(|i| Instance {
                features: vec![if i % 2 == 0 { 1.0 } else { -1.0 }],
                label: i % 2,
            })
            .collect();
        for _ in 0..10 {
            model.train(&data);
        }
        let (loss, accuracy) = model.loss_and_accuracy(&data);
        assert!(loss < 0.1);
        assert_relative_eq!(accuracy, 1.0);
    }

    #[test]
    fn merge_averages() {
        let mut a = LogisticRegression::from_params(&params(2)).unwrap();
        let mut b = a.clone();
        a.weights = vec![1.0, 3.0];
        a.bias = 1.0;
        a.age = 4.0;
        b.weights = vec![3.0, 5.0];
        b.bias = 0.0;
        b.age = 7.0;
        b.lambda = 0.001;
        let merged = a.merge_equal_weight(&[&b]);
        assert_eq!(merged.weights(), &[2.0, 4.0]);
        assert_relative_eq!(merged.bias(), 0.5);
        assert_relative_eq!(merged.age(), 7.0);
        assert_relative_eq!(merged.lambda(), 0.001);

        let alone = a.merge_equal_weight(&[]);
        assert_eq!(alone, a);
    }

    #[test]
    fn rejects_multi_class() {
        assert!(
            LogisticRegression::from_params(&ModelParams {
                num_classes: 3,
                ..ModelParams::default()
            })
            .is_err()
        );
    }
}
