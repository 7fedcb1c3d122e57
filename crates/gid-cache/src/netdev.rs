//! Network interface handles and link topology matching.

use std::fmt;
use std::sync::Arc;

use crate::types::MacAddr;

/// A reference-counted handle to a host network interface.
///
/// Identity is the interface index. Stacked interfaces carry topology
/// links: `lower` points from a virtual interface (e.g. a VLAN) to the
/// underlying link, `master` points from an enslaved interface to its
/// aggregate.
#[derive(Debug)]
pub struct NetInterface {
    index: u32,
    name: String,
    mac: MacAddr,
    lower: Option<Arc<NetInterface>>,
    master: Option<Arc<NetInterface>>,
}

impl NetInterface {
    pub fn new(index: u32, name: impl Into<String>, mac: MacAddr) -> Self {
        NetInterface {
            index,
            name: name.into(),
            mac,
            lower: None,
            master: None,
        }
    }

    /// Sets the underlying link of a stacked interface.
    pub fn with_lower(mut self, lower: Arc<NetInterface>) -> Self {
        self.lower = Some(lower);
        self
    }

    /// Sets the aggregate this interface is enslaved to.
    pub fn with_master(mut self, master: Arc<NetInterface>) -> Self {
        self.master = Some(master);
        self
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mac(&self) -> MacAddr {
        self.mac
    }

    pub fn master(&self) -> Option<&Arc<NetInterface>> {
        self.master.as_ref()
    }

    /// Resolves a stacked interface down to the underlying link.
    pub fn real_dev(&self) -> &NetInterface {
        match &self.lower {
            Some(lower) => lower.real_dev(),
            None => self,
        }
    }
}

impl fmt::Display for NetInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.index)
    }
}

/// Tests whether an interface event is topologically bound to a port.
///
/// The event interface is resolved down to its underlying link; the port
/// interface is resolved up to its aggregate. The two sides refer to the
/// same link when the resolved identities agree.
pub fn same_underlying_link(port_dev: &NetInterface, event_dev: &NetInterface) -> bool {
    let event_real = event_dev.real_dev();
    let port_upper = port_dev.master().map(|m| m.as_ref()).unwrap_or(port_dev);
    event_real.index() == port_upper.index()
}
