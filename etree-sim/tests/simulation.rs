// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use approx::assert_relative_eq;
use etree_sim::{Config, run};
use etree_track::tracker::dev_null_tracker;
use regex::Regex;
use serial_test::serial;
use tempfile::TempDir;

/// Three triangles joined in a line through nodes 2, 5 and 8.
const NINE_NODES: &str = "\
# from to delay
1 2 1
2 3 1
1 3 3
4 5 1
5 6 1
4 6 3
7 8 1
8 9 1
7 9 3
2 5 50
5 8 50
";

fn write(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).unwrap();
    path
}

/// Ten samples per node, labels alternating, separable on the one feature.
fn binary_training() -> String {
    let mut s = String::new();
    for i in 0..90 {
        if i % 2 == 0 {
            writeln!(s, "-1 1:1").unwrap();
        } else {
            writeln!(s, "+1 1:-1").unwrap();
        }
    }
    s
}

fn one_hot(num_samples: usize) -> String {
    let mut s = String::new();
    for i in 0..num_samples {
        let class = i % 3;
        writeln!(s, "{class} {}:1", class + 1).unwrap();
    }
    s
}

fn base_config(topology: &Path) -> Config {
    Config {
        topology_file: Some(topology.to_path_buf()),
        epochs: Some(3),
        clustering_restarts: Some(50),
        stdout: Some(false),
        ..Config::default()
    }
}

#[test]
#[serial]
fn root_logs_every_epoch() {
    let dir = TempDir::new().unwrap();
    let topology = write(&dir, "topology.txt", NINE_NODES);
    let config = Config {
        training_file: Some(write(&dir, "train.svm", &binary_training())),
        eval_file: Some(write(&dir, "eval.svm", "-1 1:1\n+1 1:-1\n")),
        lambda: Some(0.1),
        ..base_config(&topology)
    };

    let (test_tracker, tracker) = etree_track::test_init!(0);
    let outcome = run(&config, &tracker).unwrap();

    assert_eq!(outcome.epochs_completed, 3);
    assert_eq!(outcome.aggregators, vec![vec![1, 4, 7], vec![4]]);
    assert_eq!(outcome.time_advances.len(), 3);
    assert_eq!(outcome.reports.len(), 3);
    assert_eq!(outcome.messages.total(), 6 * 3 + 2 * 3);
    assert_eq!(outcome.messages.received()[4], 2 * 3 + 2 * 3);
    assert!(outcome.reports[2].loss < outcome.reports[0].loss);
    assert_relative_eq!(outcome.reports[2].accuracy, 1.0);

    let evaluation = Regex::new(r":INFO: Time: \d+, ETree loss: \S+, acc: \S+$").unwrap();
    let lines: Vec<String> = test_tracker
        .events()
        .into_iter()
        .filter(|event| evaluation.is_match(event))
        .collect();
    assert_eq!(lines.len(), 3);
    let first_time = format!("Time: {}, ", outcome.reports[0].time);
    assert!(lines[0].contains(&first_time));
}

#[test]
fn softmax_with_class_balanced_clusters() {
    let dir = TempDir::new().unwrap();
    let topology = write(&dir, "topology.txt", NINE_NODES);
    let config = Config {
        training_file: Some(write(&dir, "train.svm", &one_hot(45))),
        eval_file: Some(write(&dir, "eval.svm", &one_hot(3))),
        samples_file: Some(write(&dir, "samples.txt", "5 5 5 5 5 5 5 5 5\n")),
        model: Some("softmax".to_string()),
        clustering_mode: Some(3),
        lambda: Some(0.2),
        ..base_config(&topology)
    };

    let outcome = run(&config, &dev_null_tracker()).unwrap();
    assert_eq!(outcome.epochs_completed, 3);
    assert_eq!(outcome.reports.len(), 3);
    assert_eq!(outcome.aggregators[0].len(), 3);
    assert_eq!(outcome.aggregators[1].len(), 1);
    assert!(outcome.reports[2].loss < (3.0f64).ln());
}

#[test]
fn delay_dump_has_a_line_per_layer() {
    let dir = TempDir::new().unwrap();
    let topology = write(&dir, "topology.txt", NINE_NODES);
    let dump = dir.path().join("delays.txt");
    let config = Config {
        delay_dump_file: Some(dump.clone()),
        epochs: Some(1),
        ..base_config(&topology)
    };

    let outcome = run(&config, &dev_null_tracker()).unwrap();
    assert_eq!(outcome.epochs_completed, 1);

    let contents = fs::read_to_string(dump).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 2);
    // Each layer-1 aggregator has two children, the root has two
    assert_eq!(lines[0].split(' ').count(), 6);
    assert_eq!(lines[1].split(' ').count(), 2);
}

#[test]
fn ratio_delays_root_evaluation() {
    let dir = TempDir::new().unwrap();
    let topology = write(&dir, "topology.txt", NINE_NODES);
    let config = Config {
        ratios: Some("2".to_string()),
        epochs: Some(4),
        ..base_config(&topology)
    };

    let outcome = run(&config, &dev_null_tracker()).unwrap();
    let epochs: Vec<u64> = outcome.reports.iter().map(|r| r.epoch).collect();
    assert_eq!(epochs, vec![2, 4]);
}

#[test]
fn setup_errors() {
    let dir = TempDir::new().unwrap();
    let topology = write(&dir, "topology.txt", NINE_NODES);

    let missing = Config {
        stdout: Some(false),
        ..Config::default()
    };
    let e = run(&missing, &dev_null_tracker()).unwrap_err();
    assert!(e.to_string().contains("No topology file"));

    let too_many = Config {
        groups: Some("20,1".to_string()),
        ..base_config(&topology)
    };
    let e = run(&too_many, &dev_null_tracker()).unwrap_err();
    assert!(e.to_string().contains("Cannot form 20 clusters from 9 nodes"));

    let bad_model = Config {
        model: Some("forest".to_string()),
        ..base_config(&topology)
    };
    let e = run(&bad_model, &dev_null_tracker()).unwrap_err();
    assert!(e.to_string().contains("Unknown model 'forest'"));

    let disconnected = write(&dir, "split.txt", "1 2 5\n3 4 5\n");
    let config = Config {
        groups: Some("1,1".to_string()),
        ..base_config(&disconnected)
    };
    assert!(run(&config, &dev_null_tracker()).is_err());

    let short_counts = Config {
        training_file: Some(write(&dir, "train.svm", &binary_training())),
        samples_file: Some(write(&dir, "samples.txt", "10 10\n")),
        ..base_config(&topology)
    };
    assert!(run(&short_counts, &dev_null_tracker()).is_err());
}
