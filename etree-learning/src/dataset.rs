// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Labelled samples in SVMLight format.
//!
//! Each line holds `label index:value ...` with feature indices starting at
//! 1. Anything after a `#` is a comment. A label of `-1` is read as class 0 so
//! that `-1/+1` binary files load as classes 0 and 1.

use std::path::Path;

use etree_engine::config_error;
use etree_engine::types::ConfigError;

#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    pub features: Vec<f64>,
    pub label: usize,
}

/// An ordered set of instances sharing a feature and class count.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    instances: Vec<Instance>,
    num_features: usize,
    num_classes: usize,
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path)
        .map_err(|e| ConfigError(format!("Unable to read {}: {e}", path.display())))
}

impl Dataset {
    /// An empty set with a fixed shape.
    #[must_use]
    pub fn empty(num_features: usize, num_classes: usize) -> Self {
        Self {
            instances: Vec::new(),
            num_features,
            num_classes,
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        Self::from_svmlight(&read_file(path)?)
    }

    pub fn from_svmlight(s: &str) -> Result<Self, ConfigError> {
        let mut parsed = Vec::new();
        let mut num_features = 0;
        for (line_num, line) in s.lines().enumerate() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let mut fields = line.split_whitespace();
            let label = match fields.next() {
                Some(label) => parse_label(label, line_num)?,
                None => continue,
            };
            let mut sparse = Vec::new();
            for field in fields {
                let (index, value) = parse_feature(field, line_num)?;
                num_features = num_features.max(index);
                sparse.push((index - 1, value));
            }
            parsed.push((label, sparse));
        }

        let num_classes = parsed
            .iter()
            .map(|(label, _)| label + 1)
            .max()
            .unwrap_or(0)
            .max(2);
        let instances = parsed
            .into_iter()
            .map(|(label, sparse)| {
                let mut features = vec![0.0; num_features];
                for (i, value) in sparse {
                    features[i] = value;
                }
                Instance { features, label }
            })
            .collect();
        Ok(Self {
            instances,
            num_features,
            num_classes,
        })
    }

    /// Widen the set to at least `num_features` features and
    /// `num_classes` classes.
    pub fn widen(&mut self, num_features: usize, num_classes: usize) {
        if num_features > self.num_features {
            self.num_features = num_features;
            for instance in &mut self.instances {
                instance.features.resize(num_features, 0.0);
            }
        }
        self.num_classes = self.num_classes.max(num_classes);
    }

    /// Split the leading samples over nodes, `counts[i]` to node `i`.
    ///
    /// Samples left over after the last node are unused.
    pub fn partition(&self, counts: &[usize], num_nodes: usize) -> Result<Vec<Dataset>, ConfigError> {
        if counts.len() < num_nodes {
            return config_error!(format!(
                "{} sample counts given for {num_nodes} nodes",
                counts.len()
            ));
        }
        let needed: usize = counts[..num_nodes].iter().sum();
        if needed > self.len() {
            return config_error!(format!(
                "Sample counts need {needed} samples but only {} are available",
                self.len()
            ));
        }

        let mut start = 0;
        let parts = counts[..num_nodes]
            .iter()
            .map(|&count| {
                let part = Dataset {
                    instances: self.instances[start..start + count].to_vec(),
                    num_features: self.num_features,
                    num_classes: self.num_classes,
                };
                start += count;
                part
            })
            .collect();
        Ok(parts)
    }

    /// Fraction of the samples with each label.
    #[must_use]
    pub fn label_distribution(&self) -> Vec<f64> {
        let mut distribution = vec![0.0; self.num_classes];
        if self.instances.is_empty() {
            return distribution;
        }
        for instance in &self.instances {
            distribution[instance.label] += 1.0;
        }
        let total = self.instances.len() as f64;
        for share in &mut distribution {
            *share /= total;
        }
        distribution
    }

    #[must_use]
    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    pub fn iter(&self) -> impl Iterator<Item = &Instance> {
        self.instances.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    #[must_use]
    pub fn num_features(&self) -> usize {
        self.num_features
    }

    #[must_use]
    pub fn num_classes(&self) -> usize {
        self.num_classes
    }
}

impl FromIterator<Instance> for Dataset {
    fn from_iter<I: IntoIterator<Item = Instance>>(iter: I) -> Self {
        let instances: Vec<Instance> = iter.into_iter().collect();
        let num_features = instances.iter().map(|i| i.features.len()).max().unwrap_or(0);
        let num_classes = instances
            .iter()
            .map(|i| i.label + 1)
            .max()
            .unwrap_or(0)
            .max(2);
        let mut dataset = Self {
            instances,
            num_features: 0,
            num_classes,
        };
        dataset.widen(num_features, num_classes);
        dataset
    }
}

/// Per-node sample counts: whitespace separated integers.
pub fn parse_sample_counts(s: &str) -> Result<Vec<usize>, ConfigError> {
    s.split_whitespace()
        .map(|field| {
            field
                .parse()
                .map_err(|e| ConfigError(format!("Bad sample count '{field}': {e}")))
        })
        .collect()
}

pub fn read_sample_counts(path: &Path) -> Result<Vec<usize>, ConfigError> {
    parse_sample_counts(&read_file(path)?)
}

fn parse_label(field: &str, line_num: usize) -> Result<usize, ConfigError> {
    let label: f64 = field
        .parse()
        .map_err(|e| ConfigError(format!("Line {}: bad label '{field}': {e}", line_num + 1)))?;
    if label == -1.0 {
        return Ok(0);
    }
    if label < 0.0 || label.fract() != 0.0 {
        return config_error!(format!(
            "Line {}: label '{field}' is not a class number",
            line_num + 1
        ));
    }
    Ok(label as usize)
}

fn parse_feature(field: &str, line_num: usize) -> Result<(usize, f64), ConfigError> {
    let bad = || ConfigError(format!("Line {}: bad feature '{field}'", line_num + 1));
    let (index, value) = field.split_once(':').ok_or_else(bad)?;
    let index: usize = index.parse().map_err(|_| bad())?;
    let value: f64 = value.parse().map_err(|_| bad())?;
    if index == 0 {
        return config_error!(format!(
            "Line {}: feature indices start at 1",
            line_num + 1
        ));
    }
    Ok((index, value))
}
