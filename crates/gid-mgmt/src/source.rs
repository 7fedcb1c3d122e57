//! External enumeration source for host interfaces.

use std::net::IpAddr;
use std::sync::Arc;

use gid_cache::NetInterface;

/// Iteration over the host's interfaces and their bound addresses.
///
/// Only the single event worker (and the direct device-attach path)
/// calls this; notification callbacks never enumerate.
pub trait IfaceSource: Send + Sync {
    /// All host interfaces, in enumeration order.
    fn interfaces(&self) -> Vec<Arc<NetInterface>>;

    /// Addresses currently bound to an interface.
    fn addrs(&self, iface: &NetInterface) -> Vec<IpAddr>;
}
