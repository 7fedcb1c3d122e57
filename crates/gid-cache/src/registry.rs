//! Ownership and lifecycle of per-port GID tables, plus the device-level
//! operation surface.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::device::{GidChangeSink, RoceDevice};
use crate::error::{CacheError, Result};
use crate::netdev::NetInterface;
use crate::table::GidTable;
use crate::types::{DeviceId, Gid, GidEntry, GidFilter, GidType, GidTypeMask, PortNum};

/// The GID tables of one attached device, one per port.
pub struct DeviceTables {
    device: Arc<dyn RoceDevice>,
    tables: Box<[Arc<GidTable>]>,
}

impl DeviceTables {
    pub fn device(&self) -> &Arc<dyn RoceDevice> {
        &self.device
    }

    /// Ports of this device, in ascending order.
    pub fn ports(&self) -> std::ops::RangeInclusive<PortNum> {
        1..=self.tables.len() as PortNum
    }

    /// The table serving a port, if the port number is valid.
    pub fn table(&self, port: PortNum) -> Option<&Arc<GidTable>> {
        let ix = (port as usize).checked_sub(1)?;
        self.tables.get(ix)
    }
}

/// Registry mapping (device, port) to its GID table.
///
/// Tables are created at device attach and keep their identity until
/// detach; only their activity state changes in between. Lookups that
/// name a device with no tables fail `Unsupported`.
pub struct TableRegistry {
    devices: RwLock<HashMap<DeviceId, Arc<DeviceTables>>>,
    sink: Option<Arc<dyn GidChangeSink>>,
}

impl TableRegistry {
    pub fn new() -> Self {
        TableRegistry {
            devices: RwLock::new(HashMap::new()),
            sink: None,
        }
    }

    /// Registry whose tables notify the sink on every successful write.
    pub fn with_sink(sink: Arc<dyn GidChangeSink>) -> Self {
        TableRegistry {
            devices: RwLock::new(HashMap::new()),
            sink: Some(sink),
        }
    }

    /// Allocates one table per port, sized by the hardware-reported
    /// table length. Tables start inactive; nothing is served until
    /// [`TableRegistry::activate`]. Attaching an already-attached device
    /// is a no-op.
    pub fn attach(&self, device: Arc<dyn RoceDevice>) {
        let id = device.id();
        let mut devices = self.devices.write();
        if devices.contains_key(&id) {
            debug!(device = %id, "device already attached");
            return;
        }
        let tables: Box<[Arc<GidTable>]> = (1..=device.port_count())
            .map(|port| {
                Arc::new(GidTable::new(
                    device.clone(),
                    port,
                    device.gid_table_len(port),
                    self.sink.clone(),
                ))
            })
            .collect();
        debug!(device = %id, ports = tables.len(), "attached GID tables");
        devices.insert(id, Arc::new(DeviceTables { device, tables }));
    }

    /// Starts serving on every port of the device.
    pub fn activate(&self, id: &DeviceId) -> Result<()> {
        let entry = self.lookup(id).ok_or(CacheError::Unsupported)?;
        for table in entry.tables.iter() {
            table.set_active(true);
        }
        Ok(())
    }

    /// Stops serving new requests on every port of the device. Storage
    /// and held references stay in place until [`TableRegistry::detach`].
    pub fn deactivate(&self, id: &DeviceId) -> Result<()> {
        let entry = self.lookup(id).ok_or(CacheError::Unsupported)?;
        for table in entry.tables.iter() {
            table.set_active(false);
        }
        Ok(())
    }

    /// Removes the device's tables. The caller must have deactivated the
    /// device and drained any queued work targeting it first; the tables
    /// stop serving, then release every held interface reference.
    pub fn detach(&self, id: &DeviceId) -> Result<()> {
        let entry = {
            let mut devices = self.devices.write();
            devices.remove(id).ok_or(CacheError::Unsupported)?
        };
        for table in entry.tables.iter() {
            table.set_active(false);
        }
        for table in entry.tables.iter() {
            table.release_references();
        }
        debug!(device = %id, "detached GID tables");
        Ok(())
    }

    fn lookup(&self, id: &DeviceId) -> Option<Arc<DeviceTables>> {
        self.devices.read().get(id).cloned()
    }

    /// Snapshot of all attached devices.
    pub fn devices(&self) -> Vec<Arc<DeviceTables>> {
        self.devices.read().values().cloned().collect()
    }

    /// The tables of one device.
    pub fn device_tables(&self, id: &DeviceId) -> Option<Arc<DeviceTables>> {
        self.lookup(id)
    }

    /// True when the port's table exists and is serving.
    pub fn is_active(&self, id: &DeviceId, port: PortNum) -> bool {
        self.lookup(id)
            .and_then(|entry| entry.table(port).map(|t| t.is_active()))
            .unwrap_or(false)
    }

    /// Adds a GID on a port. See [`GidTable::add`].
    pub fn add_gid(
        &self,
        id: &DeviceId,
        port: PortNum,
        gid: &Gid,
        gid_type: GidType,
        ndev: Option<Arc<NetInterface>>,
    ) -> Result<()> {
        let entry = self.lookup(id).ok_or(CacheError::Unsupported)?;
        let table = entry.table(port).ok_or(CacheError::Unsupported)?;
        table.add(gid, gid_type, ndev)
    }

    /// Deletes a GID on a port. Succeeds as a no-op when the device has
    /// no tables at all. See [`GidTable::del`].
    pub fn del_gid(
        &self,
        id: &DeviceId,
        port: PortNum,
        gid: &Gid,
        gid_type: GidType,
        ndev: Option<&Arc<NetInterface>>,
    ) -> Result<()> {
        let Some(entry) = self.lookup(id) else {
            return Ok(());
        };
        let table = entry.table(port).ok_or(CacheError::Unsupported)?;
        table.del(gid, gid_type, ndev)
    }

    /// Clears every entry on the port owned by the interface. Succeeds
    /// as a no-op when the device has no tables.
    pub fn del_all_for_iface(
        &self,
        id: &DeviceId,
        port: PortNum,
        ndev: &NetInterface,
    ) -> Result<()> {
        let Some(entry) = self.lookup(id) else {
            return Ok(());
        };
        let table = entry.table(port).ok_or(CacheError::Unsupported)?;
        table.del_all_for_iface(ndev)
    }

    /// Snapshots a slot by (port, index). See [`GidTable::get`].
    pub fn get_gid(&self, id: &DeviceId, port: PortNum, index: usize) -> Result<GidEntry> {
        let entry = self.lookup(id).ok_or(CacheError::Unsupported)?;
        let table = entry.table(port).ok_or(CacheError::Unsupported)?;
        table.get(index)
    }

    /// Searches every Ethernet port of the device, in ascending order,
    /// for a (gid, filter) match. Ports whose link layer is not Ethernet
    /// and ports that are not serving are skipped.
    pub fn find_gid(
        &self,
        id: &DeviceId,
        gid: &Gid,
        filter: &GidFilter,
    ) -> Result<(PortNum, usize)> {
        let entry = self.lookup(id).ok_or(CacheError::Unsupported)?;
        for port in entry.ports() {
            if !entry.device.link_layer(port).is_ethernet() {
                continue;
            }
            let Some(table) = entry.table(port) else {
                continue;
            };
            if !table.is_active() {
                continue;
            }
            if let Some(index) = table.find(gid, filter) {
                return Ok((port, index));
            }
        }
        Err(CacheError::NotFound)
    }

    /// Installs default GIDs for the interface on a port. See
    /// [`GidTable::set_default_gids`].
    pub fn set_default_gids(
        &self,
        id: &DeviceId,
        port: PortNum,
        ndev: &Arc<NetInterface>,
        mask: GidTypeMask,
    ) -> Result<()> {
        let entry = self.lookup(id).ok_or(CacheError::Unsupported)?;
        let table = entry.table(port).ok_or(CacheError::Unsupported)?;
        table.set_default_gids(ndev, mask)
    }

    /// Flushes every table's deferred-release queue. Called at grace
    /// points by the serialized worker.
    pub fn flush_deferred(&self) {
        for entry in self.devices() {
            for table in entry.tables.iter() {
                table.flush_deferred();
            }
        }
    }
}

impl Default for TableRegistry {
    fn default() -> Self {
        Self::new()
    }
}
