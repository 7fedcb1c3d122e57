//! Serialized mutation tasks and event-to-task translation.
//!
//! Every notification is translated into a self-contained, deep-copied
//! task at delivery time; the worker consumes each task exactly once, in
//! enqueue order.

use std::sync::Arc;

use gid_cache::{DeviceId, Gid, NetInterface};
use tokio::sync::oneshot;

use crate::config::LinkDownPolicy;
use crate::event::NetdevEvent;

/// Direction of an event-sourced cache mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GidOp {
    Add,
    Del,
}

/// One per-interface command inside a [`Task::Netdev`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NetdevCmd {
    /// Default-GID maintenance plus one add per bound address and
    /// supported type, on ports bound to the interface's link.
    AddIps,
    /// Delete every entry owned by the interface, on all ports of all
    /// devices.
    DelIps,
}

/// A queued mutation task.
pub(crate) enum Task {
    /// Interface lifecycle work: the commands run strictly in order.
    Netdev {
        iface: Arc<NetInterface>,
        cmds: Vec<NetdevCmd>,
    },
    /// Address-driven add/delete, expanded per supported GID type on
    /// matching ports.
    UpdateGid {
        op: GidOp,
        gid: Gid,
        iface: Arc<NetInterface>,
    },
    /// Re-enumerate host interfaces and repopulate matching ports,
    /// optionally scoped to one device (the device-attach path).
    Rescan { device: Option<DeviceId> },
    /// Drain marker: acknowledged once every earlier task has run.
    Flush { ack: oneshot::Sender<()> },
}

/// Translates an interface lifecycle event into its command list.
///
/// An empty list means the event needs no cache work. Link-down handling
/// is a policy choice: with [`LinkDownPolicy::Keep`] only a full
/// unregistration deletes the interface's entries.
pub(crate) fn netdev_cmds(event: NetdevEvent, policy: LinkDownPolicy) -> Vec<NetdevCmd> {
    match event {
        NetdevEvent::Register | NetdevEvent::Up => vec![NetdevCmd::AddIps],
        NetdevEvent::Unregister => vec![NetdevCmd::DelIps],
        NetdevEvent::ChangeAddr => vec![NetdevCmd::DelIps, NetdevCmd::AddIps],
        NetdevEvent::Down => match policy {
            LinkDownPolicy::Keep => vec![],
            LinkDownPolicy::Remove => vec![NetdevCmd::DelIps],
        },
    }
}
