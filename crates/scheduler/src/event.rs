use ekacore::clock::Timestamp;

/// A scheduled invocation, tagged by which action it carries.
///
/// Replaces the original's heterogeneous `{action, when, params}` record
/// (see design notes on "untyped event records") with a tagged union: each
/// variant owns exactly the payload its handler needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Event {
    CheckQueue { when: Timestamp },
    CheckVms { when: Timestamp },
    /// `delta` is always negative: the compensating event for a prior
    /// `change_vms_allegedly_running(+k)` credit.
    DecayAllegedlyRunning { when: Timestamp, delta: i64 },
}

impl Event {
    pub fn when(&self) -> Timestamp {
        match self {
            Event::CheckQueue { when }
            | Event::CheckVms { when }
            | Event::DecayAllegedlyRunning { when, .. } => *when,
        }
    }
}
