// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Shared types.

use std::error::Error;
use std::fmt;

/// Simulated time in milliseconds.
pub type SimTime = u64;

/// Index of a node in the [`NodeRegistry`](crate::node::NodeRegistry).
pub type NodeId = usize;

/// Identifies a protocol registered with the [`Engine`](crate::engine::Engine).
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ProtocolId(pub usize);

impl fmt::Display for ProtocolId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "pid{}", self.0)
    }
}

// Simulation errors

#[macro_export]
/// Build a [SimError] from a message that supports `to_string`
macro_rules! sim_error {
    ($msg:expr) => {
        Err($crate::types::SimError($msg.to_string()))
    };
}

#[macro_export]
/// Build a [ConfigError] from a message that supports `to_string`
macro_rules! config_error {
    ($msg:expr) => {
        Err($crate::types::ConfigError($msg.to_string()))
    };
}

/// The `SimError` is what should be returned in the case of an error
#[derive(Debug)]
pub struct SimError(pub String);

impl fmt::Display for SimError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Error: {}", self.0)
    }
}

impl Error for SimError {}

/// The SimResult is the return type for most simulation functions
pub type SimResult = Result<(), SimError>;

/// Setup-time errors: bad configuration, unreadable inputs or topologies
/// that cannot support the requested tree.
///
/// These are always fatal.
#[derive(Debug, PartialEq)]
pub struct ConfigError(pub String);

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Config error: {}", self.0)
    }
}

impl Error for ConfigError {}

impl From<ConfigError> for SimError {
    fn from(e: ConfigError) -> Self {
        SimError(e.to_string())
    }
}

impl From<etree_track::tracker::TrackConfigError> for SimError {
    fn from(e: etree_track::tracker::TrackConfigError) -> Self {
        SimError(e.to_string())
    }
}
