//! Per-port RoCE GID tables for the host's RDMA devices.
//!
//! This crate owns the bounded table that maps network-layer addresses to
//! hardware-programmed GIDs, one table per (device, port):
//!
//! - [`GidTable`]: fixed-capacity slot array with a wait-free read
//!   protocol and an exclusive, hardware-programming write protocol
//! - [`TableRegistry`]: table ownership and lifecycle per attached device
//! - [`mapper`]: deterministic address-to-GID and default-GID derivation
//! - [`RoceDevice`] / [`GidChangeSink`]: the seams to the device driver
//!   and to change-notification subscribers
//!
//! # Concurrency
//!
//! Any number of readers may run lookups concurrently with one writer per
//! table. Readers never block: a slot that is mid-write is skipped by
//! scans and reported as [`CacheError::Retry`] by indexed reads. Writers
//! serialize on the table's write lock and are expected to arrive through
//! a single ordered queue when driven by interface events (see the
//! `gid-mgmt` crate).

mod device;
mod error;
pub mod mapper;
mod netdev;
mod registry;
mod table;
mod types;

pub use device::{GidChangeSink, LinkLayer, RoceDevice};
pub use error::{CacheError, DeviceError, Result};
pub use netdev::{same_underlying_link, NetInterface};
pub use registry::{DeviceTables, TableRegistry};
pub use table::GidTable;
pub use types::{
    DeviceId, Gid, GidAttr, GidEntry, GidFilter, GidType, GidTypeMask, HwContext, MacAddr,
    PortNum,
};
