use std::{collections::HashSet, net::Ipv4Addr};

use anyhow::Result;
use strum_macros::{Display, EnumString, VariantArray};

use crate::{htcondor::HtCondorPlugin, status::WorkerMap};

/// The capability set an external batch system adapter must satisfy.
///
/// Both operations return `Ok(None)` on a *transient* failure (the original
/// Python's "return `None`"): a malformed response, an unreachable batch
/// system, and so on. `Err` is reserved for programming errors the caller
/// cannot meaningfully recover from today (there are none in the shipped
/// `htcondor` plugin, but the trait leaves room for one that needs it).
pub trait BatchPlugin: Send + Sync {
    fn poll_queue(&self) -> Result<Option<u64>>;

    fn poll_status(
        &self,
        previous: &WorkerMap,
        valid_ips: Option<&HashSet<Ipv4Addr>>,
    ) -> Result<Option<WorkerMap>>;
}

/// Explicit registry of loadable batch plugins, keyed by the
/// `elastiq.batch_plugin` configuration value. Replaces the original's
/// dynamic `__import__("elastiq.plugins", fromlist=[name])`.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Display, EnumString, VariantArray)]
#[strum(serialize_all = "snake_case")]
pub enum BatchPluginKind {
    Htcondor,
}

impl BatchPluginKind {
    pub fn build(self) -> Box<dyn BatchPlugin> {
        match self {
            Self::Htcondor => Box::new(HtCondorPlugin::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn plugin_name_round_trips() {
        assert_eq!(BatchPluginKind::from_str("htcondor").unwrap(), BatchPluginKind::Htcondor);
        assert_eq!(BatchPluginKind::Htcondor.to_string(), "htcondor");
    }
}
