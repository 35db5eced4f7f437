// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

#![doc(test(attr(warn(unused))))]

//! The discrete-event engine used by the ETree simulator.
//!
//! A single ordered queue holds `(time, target node, protocol, payload)`
//! events. The [engine](crate::engine::Engine) pops the earliest event and
//! hands it to the registered [protocol](crate::engine::Protocol) together
//! with an explicit [context](crate::engine::EventContext). Handlers run to
//! completion, there is no preemption and no real parallelism. Events for the
//! same time are delivered in the order they were scheduled.
//!
//! # Simple Application
//!
//! ```rust
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! use etree_engine::engine::{Engine, EventContext, Protocol};
//! use etree_engine::run_simulation;
//! use etree_engine::types::SimResult;
//!
//! struct Counter(u32);
//!
//! impl Protocol<u32> for Counter {
//!     fn process_event(&mut self, ctx: &mut EventContext<'_, u32>, hops: u32) -> SimResult {
//!         self.0 += 1;
//!         if hops > 0 {
//!             ctx.schedule_at(10, hops - 1, ctx.node());
//!         }
//!         Ok(())
//!     }
//! }
//!
//! let mut engine = Engine::default();
//! let counter = Rc::new(RefCell::new(Counter(0)));
//! let pid = engine.register(counter.clone());
//! engine.schedule_at(0, 3, 0, pid);
//! run_simulation!(engine);
//! assert_eq!(counter.borrow().0, 4);
//! assert_eq!(engine.time_now_ms(), 30);
//! ```

pub mod engine;
pub mod node;
pub mod queue;
pub mod test_helpers;
pub mod types;

#[macro_export]
/// Run the simulation to completion.
macro_rules! run_simulation {
    ($engine:ident) => {
        $engine.run().unwrap();
    };
    ($engine:ident, $expect:expr) => {
        match $engine.run() {
            Ok(()) => panic!("Expected an error!"),
            Err(e) => assert_eq!(format!("{e}").as_str(), $expect),
        }
    };
}
