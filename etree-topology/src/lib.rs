// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Everything about the network that is worked out once before the
//! simulation starts.
//!
//! The [graph](crate::graph) is read from a topology file and turned into a
//! [delay matrix](crate::delay). The [clusterer](crate::cluster) groups nodes
//! by delay, the [tree builder](crate::tree) applies it layer by layer to
//! elect aggregators, and the [routing model](crate::routing) prices the
//! links that the resulting tree uses.

pub mod cluster;
pub mod delay;
pub mod graph;
pub mod routing;
pub mod tree;
