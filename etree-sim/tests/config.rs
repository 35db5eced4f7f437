// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

use std::fs;
use std::path::PathBuf;

use clap::Parser;
use etree_sim::Config;
use serial_test::serial;
use tempfile::TempDir;

fn cli(args: &[&str]) -> Config {
    Config::try_parse_from(std::iter::once("etree-sim").chain(args.iter().copied())).unwrap()
}

#[test]
#[serial]
fn defaults_without_any_source() {
    let config = Config::from_cli(&cli(&[])).unwrap();
    assert_eq!(config, Config::default());
}

#[test]
#[serial]
fn empty_extra_file_is_ignored() {
    let cli = cli(&[]);
    let mut config = Config::from_cli(&cli).unwrap();
    let extra_conf_file = config.conf_file.clone().unwrap();
    assert!(config.parse_extra_conf_file(&extra_conf_file, &cli).is_ok());
    assert_eq!(config, Config::default());
}

#[test]
#[serial]
fn extra_file_below_command_line() {
    let dir = TempDir::new().unwrap();
    let conf_file = dir.path().join("run.toml");
    fs::write(
        &conf_file,
        "topology_file = \"net.txt\"\ngroups = [4, 1]\nepochs = 7\nseed = 9\n",
    )
    .unwrap();

    let cli = cli(&["--epochs", "3", "--conf-file", conf_file.to_str().unwrap()]);
    let mut config = Config::from_cli(&cli).unwrap();
    assert_eq!(config.epochs, Some(3));

    let extra_conf_file = config.conf_file.clone().unwrap();
    config.parse_extra_conf_file(&extra_conf_file, &cli).unwrap();
    assert_eq!(config.topology_file, Some(PathBuf::from("net.txt")));
    assert_eq!(config.groups.as_deref(), Some("4,1"));
    assert_eq!(config.seed, Some(9));
    assert_eq!(config.epochs, Some(3));
    assert_eq!(config.layers, Some(2));
}

#[test]
#[serial]
fn file_not_found() {
    let cli = cli(&[]);
    let mut config = Config::from_cli(&cli).unwrap();
    let result = config.parse_extra_conf_file(&PathBuf::from("missing.toml"), &cli);
    assert_eq!(result.map_err(|e| e.kind()), Err(std::io::ErrorKind::NotFound));
}

#[test]
#[serial]
fn path_is_directory() {
    let cli = cli(&[]);
    let mut config = Config::from_cli(&cli).unwrap();
    let result = config.parse_extra_conf_file(&PathBuf::from("."), &cli);
    assert_eq!(result.map_err(|e| e.kind()), Err(std::io::ErrorKind::IsADirectory));
}

#[test]
#[serial]
fn environment_below_command_line() {
    // SAFETY: tests touching the environment are serialised
    unsafe {
        std::env::set_var("ETREE_EPOCHS", "12");
        std::env::set_var("ETREE_LAMBDA", "0.5");
    }
    let config = Config::from_cli(&cli(&["--lambda", "0.25"]));
    unsafe {
        std::env::remove_var("ETREE_EPOCHS");
        std::env::remove_var("ETREE_LAMBDA");
    }

    let config = config.unwrap();
    assert_eq!(config.epochs, Some(12));
    assert_eq!(config.lambda, Some(0.25));
}

#[test]
#[serial]
fn bad_values_are_reported() {
    // SAFETY: tests touching the environment are serialised
    unsafe {
        std::env::set_var("ETREE_LAYERS", "many");
    }
    let config = Config::from_cli(&cli(&[]));
    unsafe {
        std::env::remove_var("ETREE_LAYERS");
    }
    let e = config.unwrap_err();
    assert!(e.to_string().starts_with("Config error: Invalid configuration"));
}
