//! SAP/SDP session announcement and discovery (RFC 2974 / RFC 4566).

pub mod announce;
pub mod discovery;
pub mod sdp;

pub use announce::{build_sap_packet, StreamDescription};
pub use discovery::DiscoveredSessions;
pub use sdp::SdpSession;

use std::net::Ipv4Addr;

/// SAP multicast group
pub const SAP_MULTICAST_ADDR: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 255);
/// SAP port
pub const SAP_PORT: u16 = 9875;
/// Announcement interval in seconds
pub const SAP_INTERVAL_SECONDS: u32 = 30;
