//! Notification payloads delivered by the external event sources.

use std::net::IpAddr;

/// Interface lifecycle notifications.
///
/// The producer delivers these in kernel order. `Unregister` is expected
/// only while the interface is not yet fully unregistered; once it is
/// gone, the producer suppresses the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetdevEvent {
    /// Interface registered with the host.
    Register,
    /// Interface brought up.
    Up,
    /// Interface link went down.
    Down,
    /// Interface hardware address changed.
    ChangeAddr,
    /// Interface is being unregistered.
    Unregister,
}

/// Address add/remove notifications, one event source per address
/// family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrEvent {
    /// An address was bound to the interface.
    Added(IpAddr),
    /// An address was removed from the interface.
    Removed(IpAddr),
}

impl AddrEvent {
    /// The address this event is about.
    pub fn addr(&self) -> IpAddr {
        match self {
            AddrEvent::Added(addr) | AddrEvent::Removed(addr) => *addr,
        }
    }

    /// Returns true for an add.
    pub fn is_add(&self) -> bool {
        matches!(self, AddrEvent::Added(_))
    }
}
