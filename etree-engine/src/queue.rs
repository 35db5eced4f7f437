// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! The ordered queue of pending events.
//!
//! Events are ordered by time and then by the order in which they were
//! scheduled, so events for the same time are delivered first-in first-out.

use core::cmp::Ordering;
use std::collections::BTreeMap;

use crate::types::{NodeId, ProtocolId, SimTime};

/// Position of an event in the queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EventKey {
    /// Time at which the event is delivered.
    time: SimTime,

    /// Insertion sequence number used to break ties.
    seq: u64,
}

impl EventKey {
    /// Time at which the event is delivered.
    #[must_use]
    pub fn time(&self) -> SimTime {
        self.time
    }
}

/// Define the comparison operation for EventKey.
impl Ord for EventKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.time.cmp(&other.time) {
            Ordering::Greater => Ordering::Greater,
            Ordering::Less => Ordering::Less,
            Ordering::Equal => self.seq.cmp(&other.seq),
        }
    }
}

impl PartialOrd for EventKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A payload addressed to a protocol instance on a node.
#[derive(Debug)]
pub struct Event<M> {
    /// Time at which the event is delivered.
    pub time: SimTime,

    /// Node the event is delivered to.
    pub node: NodeId,

    /// Protocol that handles the event.
    pub pid: ProtocolId,

    /// Protocol specific payload.
    pub payload: M,
}

pub struct EventQueue<M> {
    pending: BTreeMap<EventKey, Event<M>>,
    next_seq: u64,
    now: SimTime,
}

impl<M> EventQueue<M> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending: BTreeMap::new(),
            next_seq: 0,
            now: 0,
        }
    }

    /// Schedule `payload` for `target` at `delay` after the current time.
    pub fn schedule_at(&mut self, delay: SimTime, payload: M, target: NodeId, pid: ProtocolId) {
        let time = self.now.saturating_add(delay);
        let key = EventKey {
            time,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.pending.insert(
            key,
            Event {
                time,
                node: target,
                pid,
                payload,
            },
        );
    }

    /// Remove the earliest event and move the current time to it.
    pub fn pop(&mut self) -> Option<Event<M>> {
        let (key, event) = self.pending.pop_first()?;
        self.now = key.time;
        Some(event)
    }

    /// Time of the earliest pending event.
    #[must_use]
    pub fn peek_time(&self) -> Option<SimTime> {
        self.pending.first_key_value().map(|(key, _)| key.time)
    }

    /// Drop every pending event addressed to `pid`. Returns how many were
    /// removed.
    pub fn cancel_all_pending(&mut self, pid: ProtocolId) -> usize {
        let before = self.pending.len();
        self.pending.retain(|_, event| event.pid != pid);
        before - self.pending.len()
    }

    #[must_use]
    pub fn now(&self) -> SimTime {
        self.now
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl<M> Default for EventQueue<M> {
    fn default() -> Self {
        Self::new()
    }
}
