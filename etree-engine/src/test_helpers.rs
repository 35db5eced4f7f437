// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

use etree_track::test_helpers::create_tracker;

use crate::engine::Engine;

#[must_use]
pub fn start_test<M>(full_filepath: &str) -> Engine<M> {
    Engine::new(&create_tracker(full_filepath))
}
