//! Platform timestamps and interface identity helpers.
//!
//! PTP compares wall-clock time against master timestamps, so the time source
//! here is epoch-based rather than a monotonic tick counter.

use crate::messages::ClockIdentity;

/// Current wall-clock time in nanoseconds since the Unix epoch.
pub fn wall_clock_ns() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => duration.as_nanos() as u64,
        Err(_) => 0,
    }
}

/// Read the MAC address of a named interface.
#[cfg(target_os = "linux")]
pub fn interface_mac(name: &str) -> Option<[u8; 6]> {
    let path = format!("/sys/class/net/{}/address", name);
    let text = std::fs::read_to_string(path).ok()?;
    parse_mac(text.trim())
}

#[cfg(not(target_os = "linux"))]
pub fn interface_mac(_name: &str) -> Option<[u8; 6]> {
    None
}

fn parse_mac(text: &str) -> Option<[u8; 6]> {
    let mut mac = [0u8; 6];
    let mut parts = text.split(':');
    for byte in mac.iter_mut() {
        *byte = u8::from_str_radix(parts.next()?, 16).ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(mac)
}

/// Build the local clock identity for an interface.
///
/// Uses the interface MAC (EUI-64 with FF FE inserted) when it can be read;
/// otherwise falls back to a time-derived identity so the port is still
/// unique on the wire.
pub fn local_clock_identity(interface: Option<&str>) -> ClockIdentity {
    if let Some(name) = interface {
        if let Some(mac) = interface_mac(name) {
            return ClockIdentity::from_mac(mac);
        }
    }

    let now = wall_clock_ns();
    ClockIdentity(now.to_be_bytes())
}
