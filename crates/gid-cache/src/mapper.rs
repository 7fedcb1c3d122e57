//! Deterministic address-to-GID derivation.

use std::net::IpAddr;

use tracing::warn;

use crate::device::RoceDevice;
use crate::types::{Gid, GidTypeMask, MacAddr, PortNum};

/// Maps a network-layer address to its GID value.
///
/// IPv6 addresses map to their raw bytes; IPv4 addresses take the
/// IPv4-mapped IPv6 form (`::ffff:a.b.c.d`).
pub fn ip_to_gid(addr: &IpAddr) -> Gid {
    match addr {
        IpAddr::V4(v4) => {
            let mut raw = [0u8; 16];
            raw[10] = 0xff;
            raw[11] = 0xff;
            raw[12..].copy_from_slice(&v4.octets());
            Gid::from_bytes(raw)
        }
        IpAddr::V6(v6) => Gid::from_bytes(v6.octets()),
    }
}

/// Derives an interface's link-local default GID from its hardware
/// address: the `fe80::/64` prefix followed by the EUI-64 expansion of
/// the MAC (universal/local bit inverted, `ff:fe` inserted).
pub fn default_gid(mac: &MacAddr) -> Gid {
    let o = mac.octets();
    let mut raw = [0u8; 16];
    raw[0] = 0xfe;
    raw[1] = 0x80;
    raw[8] = o[0] ^ 0x02;
    raw[9] = o[1];
    raw[10] = o[2];
    raw[11] = 0xff;
    raw[12] = 0xfe;
    raw[13] = o[3];
    raw[14] = o[4];
    raw[15] = o[5];
    Gid::from_bytes(raw)
}

/// Queries the GID types a port supports. A failed capability query is
/// logged and treated as "no types supported".
pub fn supported_gid_types(device: &dyn RoceDevice, port: PortNum) -> GidTypeMask {
    match device.supported_gid_types(port) {
        Ok(mask) => mask,
        Err(err) => {
            warn!(device = %device.id(), port, %err, "port capability query failed");
            GidTypeMask::EMPTY
        }
    }
}
