//! Event-driven management of RoCE GID tables.
//!
//! This crate keeps the per-port GID tables owned by `gid-cache`
//! consistent with the live state of the host's network interfaces:
//!
//! 1. Interface and address lifecycle notifications arrive at the
//!    [`GidEventManager`] entry points (three independent sources:
//!    interface events, family-A addresses, family-B addresses)
//! 2. Each notification is translated into a deep-copied task and pushed
//!    onto one globally-ordered queue
//! 3. A single worker drains the queue in enqueue order; it alone
//!    enumerates interfaces (via [`IfaceSource`]) and drives the tables'
//!    exclusive write protocol on behalf of events
//!
//! Serializing every event-sourced mutation through one worker keeps
//! blocking work out of the notification contexts and bounds pile-up;
//! per-table correctness is already guaranteed by each table's write
//! lock.
//!
//! Teardown drains the queue to completion before any table storage is
//! released: [`GidEventManager::detach_device`] deactivates, flushes,
//! then detaches.

mod config;
mod error;
mod event;
mod manager;
mod source;
mod task;

pub use config::{LinkDownPolicy, MgmtConfig};
pub use error::{MgmtError, Result};
pub use event::{AddrEvent, NetdevEvent};
pub use manager::GidEventManager;
pub use source::IfaceSource;
