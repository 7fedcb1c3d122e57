//! Device-facing traits: hardware programming, capability discovery and
//! change notification.

use std::sync::Arc;

use crate::error::DeviceError;
use crate::netdev::NetInterface;
use crate::types::{DeviceId, Gid, GidAttr, GidTypeMask, HwContext, PortNum};

/// Link layer of a port's transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkLayer {
    Ethernet,
    Infiniband,
}

impl LinkLayer {
    /// Returns true for Ethernet, the only transport GID tables serve.
    pub fn is_ethernet(&self) -> bool {
        matches!(self, LinkLayer::Ethernet)
    }
}

/// A RoCE-capable device as seen by the cache.
///
/// Implemented by the device driver (or a test double). All methods are
/// synchronous; `program_gid` is assumed bounded and is the only call the
/// cache makes while holding a table's write lock.
pub trait RoceDevice: Send + Sync {
    /// Stable identifier of this device.
    fn id(&self) -> DeviceId;

    /// Number of ports, numbered `1..=port_count()`.
    fn port_count(&self) -> PortNum;

    /// Hardware-reported GID table length for a port. Fixed for the
    /// lifetime of the device.
    fn gid_table_len(&self, port: PortNum) -> usize;

    /// Link layer of a port.
    fn link_layer(&self, port: PortNum) -> LinkLayer;

    /// GID types the port supports. May fail; callers treat failure as
    /// "no types supported".
    fn supported_gid_types(&self, port: PortNum) -> Result<GidTypeMask, DeviceError>;

    /// The host interface a port is bound to, if any.
    fn netdev(&self, port: PortNum) -> Option<Arc<NetInterface>>;

    /// Installs (or, for the zero GID, removes) a GID at a table index on
    /// physical hardware. Returns the driver's opaque per-slot context.
    fn program_gid(
        &self,
        port: PortNum,
        index: usize,
        gid: &Gid,
        attr: &GidAttr,
    ) -> Result<HwContext, DeviceError>;
}

/// Subscriber interface for GID table change notifications.
///
/// Invoked synchronously from the write path after a slot is republished;
/// implementations must not call back into the same table.
pub trait GidChangeSink: Send + Sync {
    fn gid_table_changed(&self, device: &DeviceId, port: PortNum);
}
