//! The GID event manager: notification entry points, the single ordered
//! worker, and device attach/detach orchestration.
//!
//! Notification callbacks run in constrained contexts: they must not
//! block and must not enumerate interfaces. Each entry point therefore
//! only deep-copies the event into a task and hands it to the queue. The
//! worker drains tasks strictly in enqueue order, one at a time, and is
//! the only context that enumerates interfaces or writes tables on
//! behalf of events.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use gid_cache::{
    mapper, same_underlying_link, CacheError, DeviceId, DeviceTables, Gid, NetInterface, PortNum,
    RoceDevice, TableRegistry,
};

use crate::config::MgmtConfig;
use crate::error::{MgmtError, Result};
use crate::event::{AddrEvent, NetdevEvent};
use crate::source::IfaceSource;
use crate::task::{netdev_cmds, GidOp, NetdevCmd, Task};

/// Context object owning the serialized mutation queue and its worker.
///
/// Created with [`GidEventManager::start`] (subscribe) and torn down with
/// [`GidEventManager::shutdown`] (unsubscribe and drain); there is no
/// process-global state.
pub struct GidEventManager {
    registry: Arc<TableRegistry>,
    config: MgmtConfig,
    tx: mpsc::UnboundedSender<Task>,
    worker: JoinHandle<()>,
}

impl GidEventManager {
    /// Spawns the single event worker. Must be called from within a
    /// tokio runtime.
    pub fn start(
        registry: Arc<TableRegistry>,
        source: Arc<dyn IfaceSource>,
        config: MgmtConfig,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = EventWorker {
            registry: registry.clone(),
            source,
        };
        let handle = tokio::spawn(worker.run(rx));
        GidEventManager {
            registry,
            config,
            tx,
            worker: handle,
        }
    }

    /// The registry this manager drives.
    pub fn registry(&self) -> &Arc<TableRegistry> {
        &self.registry
    }

    /// Notification entry point for interface lifecycle events.
    /// Non-blocking: translates and enqueues only.
    pub fn netdev_event(&self, iface: &Arc<NetInterface>, event: NetdevEvent) -> Result<()> {
        let cmds = netdev_cmds(event, self.config.link_down_policy);
        if cmds.is_empty() {
            return Ok(());
        }
        self.enqueue(Task::Netdev {
            iface: iface.clone(),
            cmds,
        })
    }

    /// Notification entry point for address add/remove events.
    /// Non-blocking: the address is mapped to its GID value here and the
    /// per-type expansion happens on the worker.
    pub fn addr_event(&self, iface: &Arc<NetInterface>, event: AddrEvent) -> Result<()> {
        let op = if event.is_add() { GidOp::Add } else { GidOp::Del };
        self.enqueue(Task::UpdateGid {
            op,
            gid: mapper::ip_to_gid(&event.addr()),
            iface: iface.clone(),
        })
    }

    /// Queues a rescan of all host interfaces, optionally scoped to one
    /// device.
    pub fn request_rescan(&self, device: Option<DeviceId>) -> Result<()> {
        self.enqueue(Task::Rescan { device })
    }

    /// Attaches a device: allocates and activates its tables, then
    /// queues the initial population rescan scoped to it.
    pub fn attach_device(&self, device: Arc<dyn RoceDevice>) -> Result<()> {
        let id = device.id();
        self.registry.attach(device);
        self.registry.activate(&id)?;
        self.request_rescan(Some(id))
    }

    /// Detaches a device: stop serving, drain every queued task, only
    /// then release table storage and held interface references.
    pub async fn detach_device(&self, id: &DeviceId) -> Result<()> {
        self.registry.deactivate(id)?;
        self.flush().await?;
        self.registry.detach(id)?;
        Ok(())
    }

    /// Waits until every task enqueued before this call has run.
    pub async fn flush(&self) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.enqueue(Task::Flush { ack })?;
        done.await.map_err(|_| MgmtError::QueueClosed)
    }

    /// Closes the queue, drains it to completion and stops the worker.
    pub async fn shutdown(self) {
        drop(self.tx);
        if self.worker.await.is_err() {
            warn!("event worker terminated abnormally");
        }
    }

    fn enqueue(&self, task: Task) -> Result<()> {
        self.tx.send(task).map_err(|_| {
            warn!("event queue closed, dropping event");
            MgmtError::QueueClosed
        })
    }
}

/// The single consumer of the task queue.
struct EventWorker {
    registry: Arc<TableRegistry>,
    source: Arc<dyn IfaceSource>,
}

impl EventWorker {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<Task>) {
        while let Some(task) = rx.recv().await {
            self.handle(task);
            // Grace point: no reader started before this line can still
            // be validating a slot whose reference was replaced above.
            self.registry.flush_deferred();
        }
        debug!("event queue drained, worker exiting");
    }

    fn handle(&self, task: Task) {
        match task {
            Task::Netdev { iface, cmds } => {
                for cmd in cmds {
                    self.run_netdev_cmd(&iface, cmd);
                }
            }
            Task::UpdateGid { op, gid, iface } => {
                self.for_matching_ports(&iface, |entry, port| {
                    self.update_gid(op, entry, port, &gid, &iface);
                });
            }
            Task::Rescan { device } => self.rescan(device.as_ref()),
            Task::Flush { ack } => {
                let _ = ack.send(());
            }
        }
    }

    fn run_netdev_cmd(&self, iface: &Arc<NetInterface>, cmd: NetdevCmd) {
        match cmd {
            NetdevCmd::AddIps => {
                self.for_matching_ports(iface, |entry, port| {
                    self.add_netdev_gids(entry, port, iface);
                });
            }
            // Deletions run against every port of every device, not just
            // ports bound to the interface's link.
            NetdevCmd::DelIps => {
                for entry in self.registry.devices() {
                    let id = entry.device().id();
                    for port in entry.ports() {
                        if let Err(err) = self.registry.del_all_for_iface(&id, port, iface) {
                            debug!(device = %id, port, iface = %iface, %err, "skipping port");
                        }
                    }
                }
            }
        }
    }

    /// Runs `f` for every active-capable Ethernet port bound to the
    /// event interface's underlying link.
    fn for_matching_ports<F>(&self, iface: &NetInterface, mut f: F)
    where
        F: FnMut(&DeviceTables, PortNum),
    {
        for entry in self.registry.devices() {
            for port in entry.ports() {
                if port_matches(&entry, port, iface) {
                    f(&entry, port);
                }
            }
        }
    }

    /// The interface-up expansion: default-GID maintenance, then one add
    /// per bound address and supported GID type.
    fn add_netdev_gids(&self, entry: &DeviceTables, port: PortNum, iface: &Arc<NetInterface>) {
        let device = entry.device();
        let id = device.id();
        // Default GIDs belong to the port's own interface, not to
        // stacked interfaces resolving to the same link.
        if device.netdev(port).map(|nd| nd.index()) == Some(iface.index()) {
            let mask = mapper::supported_gid_types(device.as_ref(), port);
            if let Err(err) = self.registry.set_default_gids(&id, port, iface, mask) {
                debug!(device = %id, port, %err, "default GID maintenance skipped");
            }
        }
        for addr in self.source.addrs(iface) {
            self.update_gid(GidOp::Add, entry, port, &mapper::ip_to_gid(&addr), iface);
        }
    }

    /// Applies one add/delete for every GID type the port supports, in
    /// ascending type order. Event-path failures are logged, never
    /// retried here.
    fn update_gid(
        &self,
        op: GidOp,
        entry: &DeviceTables,
        port: PortNum,
        gid: &Gid,
        iface: &Arc<NetInterface>,
    ) {
        let device = entry.device();
        let id = device.id();
        let mask = mapper::supported_gid_types(device.as_ref(), port);
        for gid_type in mask.iter() {
            let res = match op {
                GidOp::Add => {
                    self.registry
                        .add_gid(&id, port, gid, gid_type, Some(iface.clone()))
                }
                GidOp::Del => self.registry.del_gid(&id, port, gid, gid_type, Some(iface)),
            };
            match res {
                Ok(()) => {}
                Err(
                    err @ (CacheError::NotActive
                    | CacheError::Unsupported
                    | CacheError::PermissionDenied),
                ) => {
                    debug!(device = %id, port, %gid, %gid_type, %err, "gid update skipped");
                }
                Err(err) => {
                    warn!(device = %id, port, %gid, %gid_type, %err, "gid update failed");
                }
            }
        }
    }

    /// Enumerates all host interfaces and repopulates every matching
    /// port, optionally restricted to one device.
    fn rescan(&self, scope: Option<&DeviceId>) {
        debug!(scope = scope.map(|id| id.as_str()), "rescanning host interfaces");
        for iface in self.source.interfaces() {
            for entry in self.registry.devices() {
                if let Some(scope) = scope {
                    if entry.device().id() != *scope {
                        continue;
                    }
                }
                for port in entry.ports() {
                    if port_matches(&entry, port, &iface) {
                        self.add_netdev_gids(&entry, port, &iface);
                    }
                }
            }
        }
    }
}

/// A port takes an interface's events when it is Ethernet and its bound
/// interface resolves to the same underlying link.
fn port_matches(entry: &DeviceTables, port: PortNum, iface: &NetInterface) -> bool {
    if !entry.device().link_layer(port).is_ethernet() {
        return false;
    }
    match entry.device().netdev(port) {
        Some(port_dev) => same_underlying_link(&port_dev, iface),
        None => false,
    }
}
