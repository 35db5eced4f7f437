// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! The engine owns the event queue and the registered protocols and runs the
//! simulation one event at a time.

use std::cell::RefCell;
use std::rc::Rc;

use etree_track::entity::{Entity, toplevel};
use etree_track::tracker::stdout_tracker;
use etree_track::{Tracker, set_time, trace};

use crate::queue::EventQueue;
use crate::sim_error;
use crate::types::{NodeId, ProtocolId, SimResult, SimTime};

/// Handler for the events addressed to one protocol.
///
/// The handler runs to completion before the next event is popped. Waiting
/// for more input is expressed by returning and handling a later event.
pub trait Protocol<M> {
    fn process_event(&mut self, ctx: &mut EventContext<'_, M>, payload: M) -> SimResult;
}

/// A protocol shared between the engine and the code that built it, so that
/// its state can still be read once the simulation has finished.
pub type ProtocolRef<M> = Rc<RefCell<dyn Protocol<M>>>;

/// Everything a handler needs to know about the event being processed.
pub struct EventContext<'a, M> {
    node: NodeId,
    pid: ProtocolId,
    time: SimTime,
    queue: &'a mut EventQueue<M>,
    stop: bool,
}

impl<'a, M> EventContext<'a, M> {
    pub fn new(node: NodeId, pid: ProtocolId, time: SimTime, queue: &'a mut EventQueue<M>) -> Self {
        Self {
            node,
            pid,
            time,
            queue,
            stop: false,
        }
    }

    /// The node the event was delivered to.
    #[must_use]
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// The protocol handling the event.
    #[must_use]
    pub fn pid(&self) -> ProtocolId {
        self.pid
    }

    #[must_use]
    pub fn now(&self) -> SimTime {
        self.time
    }

    /// Schedule a payload for the same protocol on `target`.
    pub fn schedule_at(&mut self, delay: SimTime, payload: M, target: NodeId) {
        self.queue.schedule_at(delay, payload, target, self.pid);
    }

    /// Drop every pending event addressed to `pid`.
    pub fn cancel_all_pending(&mut self, pid: ProtocolId) -> usize {
        self.queue.cancel_all_pending(pid)
    }

    /// Ask the engine to stop once this handler returns.
    pub fn request_stop(&mut self) {
        self.stop = true;
    }

    #[must_use]
    pub fn stop_requested(&self) -> bool {
        self.stop
    }
}

pub struct Engine<M> {
    toplevel: Rc<Entity>,
    tracker: Tracker,
    queue: EventQueue<M>,
    protocols: Vec<ProtocolRef<M>>,
    end_time: Option<SimTime>,
    num_events: u64,
}

impl<M> Engine<M> {
    /// Create a standalone engine.
    pub fn new(tracker: &Tracker) -> Self {
        let toplevel = toplevel(tracker, "top");
        Self {
            toplevel,
            tracker: tracker.clone(),
            queue: EventQueue::new(),
            protocols: Vec::new(),
            end_time: None,
            num_events: 0,
        }
    }

    /// Add a protocol. Events scheduled with the returned id are delivered to
    /// it.
    pub fn register(&mut self, protocol: ProtocolRef<M>) -> ProtocolId {
        self.protocols.push(protocol);
        ProtocolId(self.protocols.len() - 1)
    }

    pub fn schedule_at(&mut self, delay: SimTime, payload: M, target: NodeId, pid: ProtocolId) {
        self.queue.schedule_at(delay, payload, target, pid);
    }

    pub fn cancel_all_pending(&mut self, pid: ProtocolId) -> usize {
        self.queue.cancel_all_pending(pid)
    }

    /// Events later than `end_time` are left in the queue.
    pub fn set_end_time(&mut self, end_time: SimTime) {
        self.end_time = Some(end_time);
    }

    /// Run until the queue drains, the end time is passed or a handler asks to
    /// stop. The first handler error stops the simulation and is returned.
    pub fn run(&mut self) -> SimResult {
        while let Some(time) = self.queue.peek_time() {
            if self.end_time.is_some_and(|end| time > end) {
                trace!(self.toplevel ; "end time reached with {} pending", self.queue.len());
                break;
            }
            let previous_time = self.time_now_ms();
            let Some(event) = self.queue.pop() else {
                break;
            };
            if event.time != previous_time || self.num_events == 0 {
                set_time!(self.toplevel ; event.time);
            }

            let Some(protocol) = self.protocols.get(event.pid.0).cloned() else {
                return sim_error!(format!(
                    "Event for unregistered protocol {} at node {}",
                    event.pid, event.node
                ));
            };
            self.num_events += 1;

            let mut ctx = EventContext::new(event.node, event.pid, event.time, &mut self.queue);
            protocol.borrow_mut().process_event(&mut ctx, event.payload)?;
            if ctx.stop_requested() {
                trace!(self.toplevel ; "stop requested at {}ms", event.time);
                break;
            }
        }
        self.tracker.shutdown();
        Ok(())
    }

    #[must_use]
    pub fn time_now_ms(&self) -> SimTime {
        self.queue.now()
    }

    /// Number of events processed so far.
    #[must_use]
    pub fn num_events(&self) -> u64 {
        self.num_events
    }

    #[must_use]
    pub fn num_pending(&self) -> usize {
        self.queue.len()
    }

    pub fn top(&self) -> &Rc<Entity> {
        &self.toplevel
    }

    pub fn tracker(&self) -> Tracker {
        self.tracker.clone()
    }
}

/// Create a default engine that sends [`Track`](etree_track::Track) events to
/// stdout.
///
/// This is provided to keep documentation examples simple.
impl<M> Default for Engine<M> {
    fn default() -> Self {
        let tracker = stdout_tracker(log::Level::Warn);
        Self::new(&tracker)
    }
}
