//! SAP announcement of the engine's transmit streams.
//!
//! Every interval, one SAP packet per stream goes to 239.255.255.255:9875:
//! 4-byte SAP header, 4-byte originating IPv4 source, SDP payload. Shutdown
//! sends matching deletion packets (T=1) so peers expire the sessions.

use std::io;
use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info};
use socket2::{Domain, Protocol, Socket, Type};

use super::sdp::SdpSession;
use super::{SAP_MULTICAST_ADDR, SAP_PORT};

/// SAP protocol version (V field)
const SAP_VERSION: u8 = 1;
/// Message-type bit: 0 = announcement, 1 = deletion
const SAP_FLAG_DELETION: u8 = 0x04;

/// One advertised stream.
#[derive(Debug, Clone)]
pub struct StreamDescription {
    pub stream_index: u32,
    pub name: String,
    pub multicast_addr: String,
    pub port: u16,
    pub channels: u8,
    pub sample_rate: u32,
    pub packet_time_us: u32,
}

impl StreamDescription {
    /// Build the session description advertised for this stream.
    pub fn to_sdp(&self, origin_ip: Ipv4Addr, ptp_ref_clock: &str) -> SdpSession {
        let session_id = 3_928_736_891u64 + self.stream_index as u64;
        SdpSession {
            origin: format!("aes67-vsc {} {} IN IP4 {}", session_id, session_id, origin_ip),
            session_name: self.name.clone(),
            info: format!("{}-channel L24 audio stream", self.channels),
            connection_addr: self.multicast_addr.clone(),
            port: self.port,
            payload_type: crate::rtp::PAYLOAD_TYPE_L24,
            rtpmap: format!("L24/{}/{}", self.sample_rate, self.channels),
            sample_rate: self.sample_rate,
            channels: self.channels,
            packet_time_us: self.packet_time_us,
            ptp_ref_clock: ptp_ref_clock.to_string(),
            media_clk: "direct=0".to_string(),
        }
    }
}

/// Assemble a SAP packet.
///
/// Byte 0 is `V(3)|A(1)|R(1)|T(1)|E(1)|C(1)`; byte 1 the authentication
/// length in words; bytes 2-3 the message id hash.
pub fn build_sap_packet(msg_id: u16, deletion: bool, origin: Ipv4Addr, sdp: &str) -> Vec<u8> {
    let mut packet = Vec::with_capacity(8 + sdp.len());
    let mut flags = SAP_VERSION << 5;
    if deletion {
        flags |= SAP_FLAG_DELETION;
    }
    packet.push(flags);
    packet.push(0); // no authentication
    packet.extend_from_slice(&msg_id.to_be_bytes());
    packet.extend_from_slice(&origin.octets());
    packet.extend_from_slice(sdp.as_bytes());
    packet
}

/// Announcer send socket: multicast TTL 32, loopback off so the engine's own
/// discovery thread does not re-ingest its announcements.
pub(crate) fn announce_socket(interface: Ipv4Addr) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_multicast_ttl_v4(32)?;
    socket.set_multicast_loop_v4(false)?;
    if interface != Ipv4Addr::UNSPECIFIED {
        socket.set_multicast_if_v4(&interface)?;
    }
    socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0).into())?;
    Ok(socket.into())
}

pub(crate) fn spawn_announce_thread(
    socket: UdpSocket,
    running: Arc<AtomicBool>,
    streams: Vec<StreamDescription>,
    origin_ip: Ipv4Addr,
    ptp_ref_clock: String,
    interval_seconds: u32,
) -> JoinHandle<()> {
    thread::spawn(move || {
        announce_loop(socket, running, streams, origin_ip, ptp_ref_clock, interval_seconds);
    })
}

fn announce_loop(
    socket: UdpSocket,
    running: Arc<AtomicBool>,
    streams: Vec<StreamDescription>,
    origin_ip: Ipv4Addr,
    ptp_ref_clock: String,
    interval_seconds: u32,
) {
    let dest = SocketAddrV4::new(SAP_MULTICAST_ADDR, SAP_PORT);
    info!("SAP announcer: {} streams every {} s", streams.len(), interval_seconds);

    while running.load(Ordering::SeqCst) {
        for stream in &streams {
            let sdp = stream.to_sdp(origin_ip, &ptp_ref_clock).generate();
            let packet = build_sap_packet(stream.stream_index as u16, false, origin_ip, &sdp);
            if let Err(e) = socket.send_to(&packet, dest) {
                debug!("SAP announce send failed: {}", e);
            }
        }

        // Sleep in 1 s slices so shutdown is prompt
        for _ in 0..interval_seconds {
            if !running.load(Ordering::SeqCst) {
                break;
            }
            thread::sleep(Duration::from_secs(1));
        }
    }

    // Deletion packets carry the same body with T=1
    for stream in &streams {
        let sdp = stream.to_sdp(origin_ip, &ptp_ref_clock).generate();
        let packet = build_sap_packet(stream.stream_index as u16, true, origin_ip, &sdp);
        let _ = socket.send_to(&packet, dest);
    }
}
