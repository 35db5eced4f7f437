// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Command-line front-end of the ETree simulator.
//!
//! For example, run using:
//!   cargo run --bin etree-sim -- --topology-file topology.txt
//! --training-file train.svm --eval-file eval.svm --groups 4,1 --epochs 20

use clap::Parser;
use etree_engine::types::SimError;
use etree_sim::Config;
use etree_track::Tracker;
use etree_track::builder::{TrackerConfig, TrackersConfig, setup_trackers};
use etree_track::tracker::str_to_level;
use log::LevelFilter;
use simplelog::{ConfigBuilder, SimpleLogger};

fn setup_all_trackers(config: &Config) -> Result<Tracker, SimError> {
    let level = str_to_level(config.stdout_level.as_deref().unwrap_or("Info"))?;
    let filter_regex = config.stdout_filter_regex.as_deref().unwrap_or_default();
    let log_file = config
        .log_file
        .as_ref()
        .and_then(|path| path.to_str())
        .filter(|path| !path.is_empty());
    let trackers = TrackersConfig {
        stdout: TrackerConfig {
            enable: config.stdout.unwrap_or(true),
            level,
            filter_regex,
            file: None,
        },
        file: TrackerConfig {
            enable: log_file.is_some(),
            level,
            filter_regex,
            file: log_file,
        },
    };
    Ok(setup_trackers(&trackers)?)
}

fn main() -> Result<(), SimError> {
    // Setup messages go through the plain `log` facade without timestamps,
    // locations, threads or targets
    let log_config = ConfigBuilder::new()
        .set_time_level(LevelFilter::Off)
        .set_location_level(LevelFilter::Off)
        .set_thread_level(LevelFilter::Off)
        .set_target_level(LevelFilter::Off)
        .build();
    SimpleLogger::init(LevelFilter::Info, log_config)
        .map_err(|e| SimError(format!("Unable to set up logging: {e}")))?;

    let cli = Config::parse();
    let mut config = Config::from_cli(&cli)?;
    let extra_conf_file = config.conf_file.clone().unwrap_or_default();
    config
        .parse_extra_conf_file(&extra_conf_file, &cli)
        .map_err(|e| SimError(format!("Unable to read {}: {e}", extra_conf_file.display())))?;
    log::debug!("configuration: {config:#?}");

    let tracker = setup_all_trackers(&config)?;
    let outcome = etree_sim::run(&config, &tracker)?;

    println!(
        "Ran {} epochs. Time now {}ms",
        outcome.epochs_completed, outcome.end_time_ms
    );
    println!("Uploads sent: {}", outcome.messages.total());
    if let Some(last) = outcome.reports.last() {
        println!(
            "Final ETree loss: {}, acc: {} (epoch {})",
            last.loss, last.accuracy, last.epoch
        );
    }
    Ok(())
}
