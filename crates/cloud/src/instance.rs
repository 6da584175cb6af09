use std::net::Ipv4Addr;

/// Coarse-grained state of a cloud instance. Only `Running` instances ever
/// participate in quota accounting or scale-down candidacy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Running,
    Other,
}

/// A handle to a cloud instance, as returned by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub id: String,
    pub private_ipv4: Ipv4Addr,
    pub state: InstanceState,
}

impl Instance {
    pub fn is_running(&self) -> bool {
        self.state == InstanceState::Running
    }
}
