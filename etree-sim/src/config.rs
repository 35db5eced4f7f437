// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Configuration gathered from several sources.
//!
//! Values are taken, lowest priority first, from the built-in defaults, an
//! `etree.toml` file in the working directory, `ETREE_` prefixed environment
//! variables and the command line. A further TOML file can be named with
//! `--conf-file`; its values only apply where the command line is silent.
//!
//! Every field is optional so that a source which does not mention a field
//! leaves the value from the layers below untouched.

use std::io;
use std::path::{Path, PathBuf};

use clap::Parser;
use etree_engine::config_error;
use etree_engine::types::{ConfigError, SimTime};
use etree_learning::model::{ModelKind, ModelParams};
use etree_learning::protocol::EtreeParams;
use etree_topology::cluster::{ClusterMode, ClusterParams};
use etree_topology::routing::LinkParams;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Deserializer, Serialize};

/// File read from the working directory when present.
pub const CONF_FILE: &str = "etree.toml";

/// Prefix of the environment variables that set configuration values.
pub const ENV_PREFIX: &str = "ETREE_";

#[derive(Parser, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[command(about = "Simulate delay-aware hierarchical federated learning.", version)]
pub struct Config {
    /// Topology file of 'from to delay' lines with one-based node numbers.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topology_file: Option<PathBuf>,

    /// Number of nodes. Taken from the topology file when not given.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nodes: Option<usize>,

    /// Training data in SVMLight format, split over the nodes.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub training_file: Option<PathBuf>,

    /// Evaluation data in SVMLight format used by the roots.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eval_file: Option<PathBuf>,

    /// Space separated number of training samples for each node.
    ///
    /// Without it the training set is split evenly.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub samples_file: Option<PathBuf>,

    /// Number of aggregation layers above the workers.
    #[arg(long)]
    pub layers: Option<usize>,

    /// Comma separated number of clusters formed at each layer.
    #[arg(long)]
    #[serde(default, deserialize_with = "int_list_text")]
    pub groups: Option<String>,

    /// Comma separated promotion cadence of every layer but the top one.
    #[arg(long)]
    #[serde(default, deserialize_with = "int_list_text")]
    pub ratios: Option<String>,

    /// Fraction of children whose uploads each aggregator waits for.
    #[arg(long, visible_alias = "recvPercent")]
    pub recv_percent: Option<f64>,

    /// 0: delay, 1: accuracy balanced, 2: uniform size, 3: class
    /// distribution, 4: class distribution with uniform size.
    #[arg(long)]
    pub clustering_mode: Option<u8>,

    /// Tolerance of the balancing clustering modes.
    #[arg(long)]
    pub clustering_delta: Option<f64>,

    /// Iteration cap of each clustering restart.
    #[arg(long)]
    pub clustering_iterations: Option<usize>,

    /// Fraction of the medoids, nearest first, a balancing mode may choose
    /// from.
    #[arg(long)]
    pub clustering_check_nearest_ratio: Option<f64>,

    /// Number of random restarts of the clustering.
    #[arg(long)]
    pub clustering_restarts: Option<usize>,

    /// Model trained by the workers: logistic or softmax.
    #[arg(long)]
    pub model: Option<String>,

    /// Learning rate.
    #[arg(long)]
    pub lambda: Option<f64>,

    /// Weight decay factor.
    #[arg(long)]
    pub regularization: Option<f64>,

    /// Local passes used to profile nodes for the balancing clustering modes.
    #[arg(long)]
    pub pretrain_rounds: Option<usize>,

    /// Number of epochs to simulate.
    #[arg(long)]
    pub epochs: Option<u64>,

    /// Seed of the random number generator.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Extra delay added to every upload.
    #[arg(long)]
    pub compute_delay_ms: Option<SimTime>,

    /// Delay before the workers first start.
    #[arg(long)]
    pub start_delay_ms: Option<SimTime>,

    /// Per hop processing delay.
    #[arg(long)]
    pub processing_delay_ms: Option<u64>,

    /// Per hop transmission delay of one model.
    #[arg(long)]
    pub transmission_delay_ms: Option<u64>,

    /// Per hop propagation delay.
    #[arg(long)]
    pub propagation_delay_ms: Option<u64>,

    /// Number of models a node forwards without queueing.
    #[arg(long)]
    pub link_capacity: Option<u64>,

    /// Write the per-layer routing delays to this file.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_dump_file: Option<PathBuf>,

    /// Enable logging to the console.
    #[arg(long)]
    pub stdout: Option<bool>,

    /// Level of log message to display.
    #[arg(long)]
    pub stdout_level: Option<String>,

    /// Set a regular expression for which entities should have logging level
    /// set to `--stdout-level`. Others will have level set to `Error`.
    #[arg(long)]
    pub stdout_filter_regex: Option<String>,

    /// Also write the log to this file.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,

    /// Path to additional configuration file
    ///
    /// This additional configuration file must contain TOML, and set values
    /// for fields of this struct.
    #[arg(long)]
    pub conf_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let cluster = ClusterParams::default();
        let link = LinkParams::default();
        let model = ModelParams::default();
        Self {
            topology_file: None,
            nodes: None,
            training_file: None,
            eval_file: None,
            samples_file: None,
            layers: Some(2),
            groups: Some("3,1".to_string()),
            ratios: Some("1".to_string()),
            recv_percent: Some(cluster.recv_percent),
            clustering_mode: Some(0),
            clustering_delta: Some(cluster.delta),
            clustering_iterations: Some(cluster.max_iterations),
            clustering_check_nearest_ratio: Some(cluster.check_nearest_ratio),
            clustering_restarts: Some(cluster.restarts),
            model: Some(ModelKind::default().to_string()),
            lambda: Some(model.lambda),
            regularization: Some(model.regularization),
            pretrain_rounds: Some(1),
            epochs: Some(etree_learning::protocol::DEFAULT_EPOCHS),
            seed: Some(1_234_567_890),
            compute_delay_ms: Some(0),
            start_delay_ms: Some(0),
            processing_delay_ms: Some(link.processing_delay_ms),
            transmission_delay_ms: Some(link.transmission_delay_ms),
            propagation_delay_ms: Some(link.propagation_delay_ms),
            link_capacity: Some(link.capacity),
            delay_dump_file: None,
            stdout: Some(true),
            stdout_level: Some("Info".to_string()),
            stdout_filter_regex: Some(String::new()),
            log_file: None,
            conf_file: Some(PathBuf::new()),
        }
    }
}

/// Apply every field the command line set.
macro_rules! merge_cli {
    ($config:ident, $cli:ident ; $($field:ident),+ $(,)?) => {
        $(
            if $cli.$field.is_some() {
                $config.$field = $cli.$field.clone();
            }
        )+
    };
}

/// Apply the command line first and then any value a file changed from its
/// default.
macro_rules! merge_existing {
    ($config:ident, $file:ident, $cli:ident, $defaults:ident ; $($field:ident),+ $(,)?) => {
        $(
            if $cli.$field.is_some() {
                $config.$field = $cli.$field.clone();
            } else if $file.$field != $defaults.$field {
                $config.$field = $file.$field;
            }
        )+
    };
}

macro_rules! for_each_field {
    ($macro:ident ! ( $($args:tt)* )) => {
        $macro!($($args)* ;
            topology_file, nodes, training_file, eval_file, samples_file,
            layers, groups, ratios, recv_percent,
            clustering_mode, clustering_delta, clustering_iterations,
            clustering_check_nearest_ratio, clustering_restarts,
            model, lambda, regularization, pretrain_rounds,
            epochs, seed, compute_delay_ms, start_delay_ms,
            processing_delay_ms, transmission_delay_ms, propagation_delay_ms, link_capacity,
            delay_dump_file, stdout, stdout_level, stdout_filter_regex, log_file,
            conf_file,
        )
    };
}

impl Config {
    /// Merge already parsed command-line values over the defaults, the
    /// configuration file and the environment.
    pub fn from_cli(cli: &Config) -> Result<Self, ConfigError> {
        let mut config = Self::extract(Self::figment(None))?;
        for_each_field!(merge_cli!(config, cli));
        Ok(config)
    }

    /// Layer `conf_file` between the working directory file and the
    /// environment, keeping anything `cli` set.
    ///
    /// An empty path is ignored.
    pub fn parse_extra_conf_file(&mut self, conf_file: &Path, cli: &Config) -> io::Result<()> {
        if conf_file.as_os_str().is_empty() {
            return Ok(());
        }
        if conf_file.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::IsADirectory,
                format!("{} is not a file path", conf_file.display()),
            ));
        }
        if !conf_file.exists() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} not found", conf_file.display()),
            ));
        }

        let file = Self::extract(Self::figment(Some(conf_file))).map_err(io::Error::other)?;
        let defaults = Self::default();
        let config = self;
        for_each_field!(merge_existing!(config, file, cli, defaults));
        Ok(())
    }

    fn figment(extra_conf_file: Option<&Path>) -> Figment {
        let mut figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(CONF_FILE));
        if let Some(extra) = extra_conf_file {
            figment = figment.merge(Toml::file(extra));
        }
        figment.merge(Env::prefixed(ENV_PREFIX))
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        figment
            .extract()
            .map_err(|e| ConfigError(format!("Invalid configuration: {e}")))
    }

    pub fn topology_file(&self) -> Result<&Path, ConfigError> {
        match &self.topology_file {
            Some(path) if !path.as_os_str().is_empty() => Ok(path),
            _ => config_error!("No topology file given (use --topology-file)"),
        }
    }

    pub fn etree_params(&self) -> Result<EtreeParams, ConfigError> {
        let layers = required(self.layers, "layers")?;
        let groups = parse_int_list(required(self.groups.as_deref(), "groups")?)?;
        let ratios = parse_int_list(required(self.ratios.as_deref(), "ratios")?)?;
        let recv_percent = required(self.recv_percent, "recv_percent")?;
        Ok(EtreeParams::new(layers, groups, ratios, recv_percent)?
            .with_epochs(required(self.epochs, "epochs")?)
            .with_compute_delay(required(self.compute_delay_ms, "compute_delay_ms")?)
            .with_start_delay(required(self.start_delay_ms, "start_delay_ms")?))
    }

    pub fn cluster_mode(&self) -> Result<ClusterMode, ConfigError> {
        ClusterMode::try_from(required(self.clustering_mode, "clustering_mode")?)
    }

    pub fn cluster_params(&self) -> Result<ClusterParams, ConfigError> {
        Ok(ClusterParams {
            restarts: required(self.clustering_restarts, "clustering_restarts")?,
            max_iterations: required(self.clustering_iterations, "clustering_iterations")?,
            recv_percent: required(self.recv_percent, "recv_percent")?,
            delta: required(self.clustering_delta, "clustering_delta")?,
            check_nearest_ratio: required(
                self.clustering_check_nearest_ratio,
                "clustering_check_nearest_ratio",
            )?,
        })
    }

    pub fn link_params(&self) -> Result<LinkParams, ConfigError> {
        let capacity = required(self.link_capacity, "link_capacity")?;
        if capacity == 0 {
            return config_error!("link_capacity must be at least 1");
        }
        Ok(LinkParams {
            processing_delay_ms: required(self.processing_delay_ms, "processing_delay_ms")?,
            transmission_delay_ms: required(self.transmission_delay_ms, "transmission_delay_ms")?,
            propagation_delay_ms: required(self.propagation_delay_ms, "propagation_delay_ms")?,
            capacity,
        })
    }

    pub fn model_kind(&self) -> Result<ModelKind, ConfigError> {
        required(self.model.as_deref(), "model")?.parse()
    }

    /// Learning rate and regularisation; the shape comes from the data.
    pub fn model_params(&self) -> Result<ModelParams, ConfigError> {
        Ok(ModelParams {
            lambda: required(self.lambda, "lambda")?,
            regularization: required(self.regularization, "regularization")?,
            ..ModelParams::default()
        })
    }
}

fn required<T>(value: Option<T>, name: &str) -> Result<T, ConfigError> {
    value.ok_or_else(|| ConfigError(format!("'{name}' is not set")))
}

/// Parse a comma separated list of integers such as `3,1`.
pub fn parse_int_list(s: &str) -> Result<Vec<usize>, ConfigError> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(Vec::new());
    }
    s.split(',')
        .map(|item| {
            let item = item.trim();
            item.parse()
                .map_err(|e| ConfigError(format!("Bad list entry '{item}' in '{s}': {e}")))
        })
        .collect()
}

/// Lists may be written as `"3,1"`, `[3, 1]` or a single number.
#[derive(Deserialize)]
#[serde(untagged)]
enum IntListSource {
    Text(String),
    One(u64),
    Many(Vec<u64>),
}

fn int_list_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let source = Option::<IntListSource>::deserialize(deserializer)?;
    Ok(source.map(|source| match source {
        IntListSource::Text(text) => text,
        IntListSource::One(value) => value.to_string(),
        IntListSource::Many(values) => values
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join(","),
    }))
}
