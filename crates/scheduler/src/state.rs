use std::collections::VecDeque;

use batch::WorkerMap;
use ekacore::clock::{Clock, Timestamp};

use crate::event::Event;

/// The scheduler's mutable state. Single-owner: only the dispatch loop
/// touches this, so no locking is needed (see concurrency model notes).
#[derive(Debug, Clone)]
pub struct InternalState {
    pub workers_status: WorkerMap,
    /// `None` means "currently below threshold", the idiomatic stand-in
    /// for the original's `-1` sentinel.
    pub first_seen_above_threshold: Option<Timestamp>,
    pub vms_allegedly_running: u64,
    pub event_queue: VecDeque<Event>,
}

impl InternalState {
    /// Fresh state with both periodic actions due immediately, as at
    /// process startup.
    pub fn new(clock: &dyn Clock) -> Self {
        let now = clock.now();
        let mut event_queue = VecDeque::with_capacity(2);
        event_queue.push_back(Event::CheckVms { when: now });
        event_queue.push_back(Event::CheckQueue { when: now });

        Self {
            workers_status: WorkerMap::new(),
            first_seen_above_threshold: None,
            vms_allegedly_running: 0,
            event_queue,
        }
    }
}
