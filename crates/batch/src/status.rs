use std::collections::BTreeMap;

use ekacore::clock::Timestamp;

/// Per-worker record observed by the batch system.
///
/// `unchanged_since` only moves forward when `jobs` changes between polls;
/// it must be carried over verbatim otherwise, which is why [`WorkerMap`]
/// is threaded through `poll_status` as both input and output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorkerStatus {
    pub jobs: u32,
    pub unchanged_since: Timestamp,
}

impl WorkerStatus {
    pub fn is_idle(&self) -> bool {
        self.jobs == 0
    }
}

pub type WorkerMap = BTreeMap<String, WorkerStatus>;
