//! Per-port GID table with a sentinel-sequence read/write protocol.
//!
//! Writers are serialized by an exclusive lock and publish each slot
//! update through a sequence counter: the counter is parked at a sentinel
//! for the duration of the write, so a reader can always tell a settled
//! slot from one that is mid-update. Readers never take the lock; they
//! copy the slot and revalidate the sequence, retrying or skipping on a
//! mismatch. All slot content is plain data — the owning-interface
//! reference lives in writer-only state and readers compare interfaces by
//! index identity.

use std::sync::atomic::{fence, AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::device::{GidChangeSink, RoceDevice};
use crate::error::{CacheError, Result};
use crate::mapper;
use crate::netdev::NetInterface;
use crate::types::{DeviceId, Gid, GidAttr, GidEntry, GidFilter, GidType, GidTypeMask, PortNum};

/// Reserved sequence value marking a slot as mid-write.
const SEQ_SENTINEL: u32 = u32::MAX;

/// Advances a slot sequence past the sentinel.
fn next_seq(seq: u32) -> u32 {
    let next = seq.wrapping_add(1);
    if next == SEQ_SENTINEL {
        0
    } else {
        next
    }
}

/// One table slot. Every field is atomic so concurrent readers race the
/// writer without undefined behavior; the sequence counter decides
/// whether a copy was consistent.
struct Slot {
    seq: AtomicU32,
    gid_hi: AtomicU64,
    gid_lo: AtomicU64,
    gid_type: AtomicU32,
    ifindex: AtomicU32,
    hw_ctx: AtomicU64,
}

impl Slot {
    fn new() -> Self {
        Slot {
            seq: AtomicU32::new(0),
            gid_hi: AtomicU64::new(0),
            gid_lo: AtomicU64::new(0),
            gid_type: AtomicU32::new(0),
            ifindex: AtomicU32::new(0),
            hw_ctx: AtomicU64::new(0),
        }
    }

    /// One bounded pass of the read protocol.
    ///
    /// Returns `Retry` if the slot was mid-write or changed underneath
    /// the copy; the content of the copy must not be trusted in that
    /// case.
    fn snapshot(&self) -> Result<GidEntry> {
        let seq = self.seq.load(Ordering::Acquire);
        if seq == SEQ_SENTINEL {
            return Err(CacheError::Retry);
        }
        let hi = self.gid_hi.load(Ordering::Relaxed);
        let lo = self.gid_lo.load(Ordering::Relaxed);
        let ty = self.gid_type.load(Ordering::Relaxed);
        let ifindex = self.ifindex.load(Ordering::Relaxed);
        fence(Ordering::Acquire);
        if self.seq.load(Ordering::Relaxed) != seq {
            return Err(CacheError::Retry);
        }
        let gid_type = GidType::from_index(ty).unwrap_or(GidAttr::EMPTY.gid_type);
        Ok(GidEntry {
            gid: Gid::from_words(hi, lo),
            attr: GidAttr::new(gid_type, ifindex),
        })
    }
}

/// State only the lock-holding writer touches.
struct WriterState {
    /// The interface reference each slot holds, when its attributes name
    /// one.
    ndevs: Box<[Option<Arc<NetInterface>>]>,
    /// Replaced references awaiting a grace point. Dropping is deferred
    /// so a release never happens while a reader may still be validating
    /// the slot the reference came from.
    deferred: Vec<Arc<NetInterface>>,
}

/// Fixed-capacity GID table for one (device, port).
pub struct GidTable {
    device: Arc<dyn RoceDevice>,
    device_id: DeviceId,
    port: PortNum,
    slots: Box<[Slot]>,
    active: AtomicBool,
    writer: Mutex<WriterState>,
    sink: Option<Arc<dyn GidChangeSink>>,
}

impl GidTable {
    pub(crate) fn new(
        device: Arc<dyn RoceDevice>,
        port: PortNum,
        capacity: usize,
        sink: Option<Arc<dyn GidChangeSink>>,
    ) -> Self {
        let device_id = device.id();
        GidTable {
            device,
            device_id,
            port,
            slots: (0..capacity).map(|_| Slot::new()).collect(),
            active: AtomicBool::new(false),
            writer: Mutex::new(WriterState {
                ndevs: (0..capacity).map(|_| None).collect(),
                deferred: Vec::new(),
            }),
            sink,
        }
    }

    pub fn port(&self) -> PortNum {
        self.port
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn set_active(&self, active: bool) {
        debug!(device = %self.device_id, port = self.port, active, "GID table activity change");
        self.active.store(active, Ordering::Release);
    }

    /// Writes one slot through the full protocol: park the sequence at
    /// the sentinel, program hardware, defer the replaced interface
    /// reference, publish the effective content, advance the sequence.
    /// Hardware failure degrades the slot to empty and is returned to the
    /// caller; the change notification is emitted only on success.
    fn write_gid_locked(
        &self,
        state: &mut WriterState,
        ix: usize,
        gid: &Gid,
        gid_type: GidType,
        ndev: Option<Arc<NetInterface>>,
    ) -> Result<()> {
        let slot = &self.slots[ix];
        let orig_seq = slot.seq.load(Ordering::Relaxed);
        slot.seq.store(SEQ_SENTINEL, Ordering::Relaxed);
        // Publish "slot invalid" before any content changes.
        fence(Ordering::Release);

        let requested_ifindex = ndev.as_ref().map(|n| n.index()).unwrap_or(0);
        let attr = GidAttr::new(gid_type, requested_ifindex);
        let programmed = self.device.program_gid(self.port, ix, gid, &attr);

        // Release the slot's previous reference only if the request names
        // a different interface. The drop itself waits for a grace point.
        let release_old = matches!(&state.ndevs[ix], Some(old) if old.index() != requested_ifindex);
        if release_old {
            if let Some(old) = state.ndevs[ix].take() {
                state.deferred.push(old);
            }
        }

        // Failure degrades to a clear, never a partial write.
        let (eff_gid, eff_attr, eff_ndev, eff_ctx) = match &programmed {
            Ok(ctx) => (*gid, attr, ndev, ctx.0),
            Err(err) => {
                warn!(
                    device = %self.device_id,
                    port = self.port,
                    index = ix,
                    %err,
                    "GID programming failed, clearing slot"
                );
                (Gid::ZERO, GidAttr::EMPTY, None, 0)
            }
        };

        let (hi, lo) = eff_gid.to_words();
        slot.gid_hi.store(hi, Ordering::Relaxed);
        slot.gid_lo.store(lo, Ordering::Relaxed);
        slot.gid_type.store(eff_attr.gid_type.index(), Ordering::Relaxed);
        slot.ifindex.store(eff_attr.ifindex, Ordering::Relaxed);
        slot.hw_ctx.store(eff_ctx, Ordering::Relaxed);

        if eff_attr.has_iface() && state.ndevs[ix].is_none() {
            state.ndevs[ix] = eff_ndev;
        }

        // Publish the content before marking the slot valid again.
        fence(Ordering::Release);
        slot.seq.store(next_seq(orig_seq), Ordering::Release);

        match programmed {
            Ok(_) => {
                if let Some(sink) = &self.sink {
                    sink.gid_table_changed(&self.device_id, self.port);
                }
                Ok(())
            }
            Err(err) => Err(CacheError::Hardware(err)),
        }
    }

    /// Linear filtered scan. Slots that are mid-write or tear during the
    /// copy are treated as non-matching; first qualifying index wins.
    pub fn find(&self, gid: &Gid, filter: &GidFilter) -> Option<usize> {
        self.slots.iter().position(|slot| match slot.snapshot() {
            Ok(entry) => entry.gid == *gid && filter.matches(&entry.attr),
            Err(_) => false,
        })
    }

    /// Snapshots one slot by index. Never blocks: a slot that is being
    /// written (or that changed during the copy) yields `Retry`.
    pub fn get(&self, index: usize) -> Result<GidEntry> {
        if !self.is_active() {
            return Err(CacheError::NotActive);
        }
        if index >= self.capacity() {
            return Err(CacheError::OutOfRange {
                index,
                capacity: self.capacity(),
            });
        }
        self.slots[index].snapshot()
    }

    /// Adds a GID. Idempotent: an existing (gid, type) entry is a no-op
    /// success. Fails `NoSpace` when no empty slot remains.
    pub fn add(
        &self,
        gid: &Gid,
        gid_type: GidType,
        ndev: Option<Arc<NetInterface>>,
    ) -> Result<()> {
        if !self.is_active() {
            return Err(CacheError::NotActive);
        }
        let mut state = self.writer.lock();
        if self.find(gid, &GidFilter::by_type(gid_type)).is_some() {
            return Ok(());
        }
        let Some(ix) = self.find(&Gid::ZERO, &GidFilter::any()) else {
            return Err(CacheError::NoSpace);
        };
        self.write_gid_locked(&mut state, ix, gid, gid_type, ndev)
    }

    /// Deletes a (gid, type, interface) entry. A miss is a no-op success.
    /// The owning interface's link-local default GID is never deletable.
    pub fn del(
        &self,
        gid: &Gid,
        gid_type: GidType,
        ndev: Option<&Arc<NetInterface>>,
    ) -> Result<()> {
        if !self.is_active() {
            return Err(CacheError::NotActive);
        }
        if let Some(ndev) = ndev {
            if *gid == mapper::default_gid(&ndev.mac()) {
                return Err(CacheError::PermissionDenied);
            }
        }
        let mut state = self.writer.lock();
        let filter =
            GidFilter::by_type_and_iface(gid_type, ndev.map(|n| n.index()).unwrap_or(0));
        match self.find(gid, &filter) {
            None => Ok(()),
            Some(ix) => {
                self.write_gid_locked(&mut state, ix, &Gid::ZERO, GidAttr::EMPTY.gid_type, None)
            }
        }
    }

    /// Clears every slot owned by the given interface.
    pub fn del_all_for_iface(&self, ndev: &NetInterface) -> Result<()> {
        if !self.is_active() {
            return Err(CacheError::NotActive);
        }
        let mut state = self.writer.lock();
        for ix in 0..self.capacity() {
            let owned = matches!(&state.ndevs[ix], Some(dev) if dev.index() == ndev.index());
            if owned {
                // A clear can only fail in the driver; the slot still
                // degrades to empty, so keep going.
                if let Err(err) = self.write_gid_locked(
                    &mut state,
                    ix,
                    &Gid::ZERO,
                    GidAttr::EMPTY.gid_type,
                    None,
                ) {
                    warn!(
                        device = %self.device_id,
                        port = self.port,
                        index = ix,
                        %err,
                        "failed to clear GID owned by departing interface"
                    );
                }
            }
        }
        Ok(())
    }

    /// Installs the interface's default GID once per supported type, in
    /// ascending type order, into the table's reserved leading slots.
    /// Per-type failures are logged and skipped; the reserved position
    /// advances only on success.
    pub fn set_default_gids(&self, ndev: &Arc<NetInterface>, mask: GidTypeMask) -> Result<()> {
        if !self.is_active() {
            return Err(CacheError::NotActive);
        }
        let gid = mapper::default_gid(&ndev.mac());
        let mut state = self.writer.lock();
        let mut reserved = 0usize;
        for gid_type in mask.iter() {
            if reserved >= self.capacity() {
                warn!(
                    device = %self.device_id,
                    port = self.port,
                    "no table slot left for default GID {gid}"
                );
                break;
            }
            if let Err(err) = self.write_gid_locked(
                &mut state,
                reserved,
                &Gid::ZERO,
                GidAttr::EMPTY.gid_type,
                None,
            ) {
                warn!(
                    device = %self.device_id,
                    port = self.port,
                    index = reserved,
                    %err,
                    "can't clear slot for default GID {gid}"
                );
                continue;
            }
            match self.write_gid_locked(
                &mut state,
                reserved,
                &gid,
                gid_type,
                Some(ndev.clone()),
            ) {
                Ok(()) => reserved += 1,
                Err(err) => warn!(
                    device = %self.device_id,
                    port = self.port,
                    %gid_type,
                    %err,
                    "unable to add default GID {gid}"
                ),
            }
        }
        Ok(())
    }

    /// Drops references queued for deferred release. Called at grace
    /// points: between serialized mutation tasks and before teardown.
    pub fn flush_deferred(&self) {
        let drained = {
            let mut state = self.writer.lock();
            std::mem::take(&mut state.deferred)
        };
        if !drained.is_empty() {
            debug!(
                device = %self.device_id,
                port = self.port,
                count = drained.len(),
                "releasing deferred interface references"
            );
        }
        drop(drained);
    }

    /// Releases every held interface reference. Only called on the
    /// destruction path, after the table has stopped serving.
    pub(crate) fn release_references(&self) {
        let drained: Vec<_> = {
            let mut state = self.writer.lock();
            let mut held: Vec<_> = state.ndevs.iter_mut().filter_map(|n| n.take()).collect();
            held.append(&mut state.deferred);
            held
        };
        drop(drained);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::LinkLayer;
    use crate::error::DeviceError;
    use crate::types::{HwContext, MacAddr};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;

    struct TestDevice {
        programmed: Mutex<Vec<(usize, Gid, GidAttr)>>,
        fail_next: AtomicBool,
    }

    impl TestDevice {
        fn new() -> Arc<Self> {
            Arc::new(TestDevice {
                programmed: Mutex::new(Vec::new()),
                fail_next: AtomicBool::new(false),
            })
        }
    }

    impl RoceDevice for TestDevice {
        fn id(&self) -> DeviceId {
            DeviceId::new("test0")
        }

        fn port_count(&self) -> PortNum {
            1
        }

        fn gid_table_len(&self, _port: PortNum) -> usize {
            4
        }

        fn link_layer(&self, _port: PortNum) -> LinkLayer {
            LinkLayer::Ethernet
        }

        fn supported_gid_types(
            &self,
            _port: PortNum,
        ) -> std::result::Result<GidTypeMask, DeviceError> {
            Ok(GidTypeMask::all())
        }

        fn netdev(&self, _port: PortNum) -> Option<Arc<NetInterface>> {
            None
        }

        fn program_gid(
            &self,
            _port: PortNum,
            index: usize,
            gid: &Gid,
            attr: &GidAttr,
        ) -> std::result::Result<HwContext, DeviceError> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(DeviceError::Program("injected".to_string()));
            }
            self.programmed.lock().push((index, *gid, *attr));
            Ok(HwContext(index as u64 + 1))
        }
    }

    struct CountingSink(AtomicUsize);

    impl GidChangeSink for CountingSink {
        fn gid_table_changed(&self, _device: &DeviceId, _port: PortNum) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn table_with(capacity: usize) -> (Arc<TestDevice>, GidTable, Arc<CountingSink>) {
        let device = TestDevice::new();
        let sink = Arc::new(CountingSink(AtomicUsize::new(0)));
        let table = GidTable::new(device.clone(), 1, capacity, Some(sink.clone()));
        table.set_active(true);
        (device, table, sink)
    }

    fn gid(n: u8) -> Gid {
        let mut raw = [0u8; 16];
        raw[0] = 0x20;
        raw[15] = n;
        Gid::from_bytes(raw)
    }

    fn iface(index: u32) -> Arc<NetInterface> {
        Arc::new(NetInterface::new(
            index,
            format!("eth{index}"),
            MacAddr::new([0, 0x11, 0x22, 0x33, 0x44, index as u8]),
        ))
    }

    #[test]
    fn test_next_seq_skips_sentinel() {
        assert_eq!(next_seq(5), 6);
        assert_eq!(next_seq(SEQ_SENTINEL - 1), 0);
    }

    #[test]
    fn test_add_then_get() {
        let (_, table, _) = table_with(4);
        table.add(&gid(1), GidType::RoceV1, None).unwrap();
        let entry = table.get(0).unwrap();
        assert_eq!(entry.gid, gid(1));
        assert_eq!(entry.attr.gid_type, GidType::RoceV1);
    }

    #[test]
    fn test_add_is_idempotent() {
        let (device, table, _) = table_with(4);
        table.add(&gid(1), GidType::RoceV1, None).unwrap();
        table.add(&gid(1), GidType::RoceV1, None).unwrap();
        assert_eq!(device.programmed.lock().len(), 1);
        assert_eq!(table.find(&gid(1), &GidFilter::by_type(GidType::RoceV1)), Some(0));
        assert!(table.get(1).unwrap().is_empty());
    }

    #[test]
    fn test_same_gid_different_type_occupies_two_slots() {
        let (_, table, _) = table_with(4);
        table.add(&gid(1), GidType::RoceV1, None).unwrap();
        table.add(&gid(1), GidType::RoceV2, None).unwrap();
        assert_eq!(table.find(&gid(1), &GidFilter::by_type(GidType::RoceV1)), Some(0));
        assert_eq!(table.find(&gid(1), &GidFilter::by_type(GidType::RoceV2)), Some(1));
    }

    #[test]
    fn test_table_capacity_is_hard_bound() {
        let (_, table, _) = table_with(2);
        table.add(&gid(1), GidType::RoceV1, None).unwrap();
        table.add(&gid(2), GidType::RoceV1, None).unwrap();
        assert_eq!(
            table.add(&gid(3), GidType::RoceV1, None),
            Err(CacheError::NoSpace)
        );
        // Deleting frees the slot for reuse.
        table.del(&gid(1), GidType::RoceV1, None).unwrap();
        table.add(&gid(3), GidType::RoceV1, None).unwrap();
        assert_eq!(table.find(&gid(3), &GidFilter::by_type(GidType::RoceV1)), Some(0));
    }

    #[test]
    fn test_del_missing_is_noop() {
        let (_, table, _) = table_with(4);
        assert_eq!(table.del(&gid(9), GidType::RoceV1, None), Ok(()));
    }

    #[test]
    fn test_del_requires_matching_iface() {
        let (_, table, _) = table_with(4);
        let eth = iface(3);
        table.add(&gid(1), GidType::RoceV1, Some(eth)).unwrap();
        // Delete with no owning interface does not match the entry.
        table.del(&gid(1), GidType::RoceV1, None).unwrap();
        assert_eq!(table.find(&gid(1), &GidFilter::by_type(GidType::RoceV1)), Some(0));
    }

    #[test]
    fn test_default_gid_not_deletable() {
        let (_, table, _) = table_with(4);
        let eth = iface(3);
        let default = mapper::default_gid(&eth.mac());
        table.set_default_gids(&eth, GidTypeMask::all()).unwrap();
        assert_eq!(
            table.del(&default, GidType::RoceV1, Some(&eth)),
            Err(CacheError::PermissionDenied)
        );
        // Still fails even when the table holds no matching entry.
        let other = iface(5);
        let other_default = mapper::default_gid(&other.mac());
        assert_eq!(
            table.del(&other_default, GidType::RoceV1, Some(&other)),
            Err(CacheError::PermissionDenied)
        );
    }

    #[test]
    fn test_set_default_gids_reserves_leading_slots() {
        let (_, table, _) = table_with(4);
        let eth = iface(3);
        table.set_default_gids(&eth, GidTypeMask::all()).unwrap();
        let default = mapper::default_gid(&eth.mac());
        let first = table.get(0).unwrap();
        let second = table.get(1).unwrap();
        assert_eq!(first.gid, default);
        assert_eq!(first.attr.gid_type, GidType::RoceV1);
        assert_eq!(second.gid, default);
        assert_eq!(second.attr.gid_type, GidType::RoceV2);
    }

    #[test]
    fn test_del_all_for_iface_clears_only_owned() {
        let (_, table, _) = table_with(4);
        let eth3 = iface(3);
        let eth4 = iface(4);
        table.add(&gid(1), GidType::RoceV1, Some(eth3.clone())).unwrap();
        table.add(&gid(2), GidType::RoceV2, Some(eth3.clone())).unwrap();
        table.add(&gid(3), GidType::RoceV1, Some(eth4.clone())).unwrap();
        table.del_all_for_iface(&eth3).unwrap();
        assert_eq!(table.find(&gid(1), &GidFilter::any()), None);
        assert_eq!(table.find(&gid(2), &GidFilter::any()), None);
        assert!(table.find(&gid(3), &GidFilter::any()).is_some());
        // Re-running when nothing remains is a no-op.
        table.del_all_for_iface(&eth3).unwrap();
        assert!(table.find(&gid(3), &GidFilter::any()).is_some());
    }

    #[test]
    fn test_hw_failure_degrades_to_empty() {
        let (device, table, sink) = table_with(4);
        device.fail_next.store(true, Ordering::SeqCst);
        let err = table.add(&gid(1), GidType::RoceV1, None).unwrap_err();
        assert!(matches!(err, CacheError::Hardware(_)));
        assert!(table.get(0).unwrap().is_empty());
        // The change notification is suppressed on failure.
        assert_eq!(sink.0.load(Ordering::SeqCst), 0);
        // The slot remains usable.
        table.add(&gid(1), GidType::RoceV1, None).unwrap();
        assert_eq!(sink.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_inactive_table_rejects_operations() {
        let (_, table, _) = table_with(4);
        table.set_active(false);
        assert_eq!(
            table.add(&gid(1), GidType::RoceV1, None),
            Err(CacheError::NotActive)
        );
        assert_eq!(table.get(0), Err(CacheError::NotActive));
        assert_eq!(
            table.del(&gid(1), GidType::RoceV1, None),
            Err(CacheError::NotActive)
        );
    }

    #[test]
    fn test_get_out_of_range() {
        let (_, table, _) = table_with(2);
        assert_eq!(
            table.get(2),
            Err(CacheError::OutOfRange {
                index: 2,
                capacity: 2
            })
        );
    }

    #[test]
    fn test_replaced_iface_reference_is_deferred() {
        let (_, table, _) = table_with(4);
        let eth3 = iface(3);
        table.add(&gid(1), GidType::RoceV1, Some(eth3.clone())).unwrap();
        assert_eq!(Arc::strong_count(&eth3), 2);
        table.del(&gid(1), GidType::RoceV1, Some(&eth3)).unwrap();
        // Still held by the grace queue until the next flush.
        assert_eq!(Arc::strong_count(&eth3), 2);
        table.flush_deferred();
        assert_eq!(Arc::strong_count(&eth3), 1);
    }

    #[test]
    fn test_release_references_drops_everything() {
        let (_, table, _) = table_with(4);
        let eth3 = iface(3);
        table.add(&gid(1), GidType::RoceV1, Some(eth3.clone())).unwrap();
        table.set_active(false);
        table.release_references();
        assert_eq!(Arc::strong_count(&eth3), 1);
    }
}
