//! SAP discovery: listen for announcements and keep a session table.

use std::collections::HashMap;
use std::io;
use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info};
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};

use super::sdp::SdpSession;
use super::{SAP_MULTICAST_ADDR, SAP_PORT};

/// Sessions discovered on the SAP group, keyed by session name (or origin
/// when the name is empty). The mutex is held only for map access.
pub type DiscoveredSessions = Arc<Mutex<HashMap<String, SdpSession>>>;

/// Discovery receive socket: shared bind on 9875 (other listeners on the host
/// may coexist), joined to the SAP group, 1 s timeout.
pub(crate) fn discovery_socket(interface: Ipv4Addr) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, SAP_PORT).into())?;

    let socket: UdpSocket = socket.into();
    socket.join_multicast_v4(&SAP_MULTICAST_ADDR, &interface)?;
    socket.set_read_timeout(Some(Duration::from_secs(1)))?;
    Ok(socket)
}

pub(crate) fn spawn_discovery_thread(
    socket: UdpSocket,
    running: Arc<AtomicBool>,
    sessions: DiscoveredSessions,
) -> JoinHandle<()> {
    thread::spawn(move || {
        discovery_loop(socket, running, sessions);
    })
}

fn discovery_loop(socket: UdpSocket, running: Arc<AtomicBool>, sessions: DiscoveredSessions) {
    let mut buf = [0u8; 2048];

    while running.load(Ordering::SeqCst) {
        match socket.recv(&mut buf) {
            Ok(len) => {
                if let Some((session, deletion)) = parse_sap_datagram(&buf[..len]) {
                    let key = if session.session_name.is_empty() {
                        session.origin.clone()
                    } else {
                        session.session_name.clone()
                    };
                    if key.is_empty() {
                        continue;
                    }

                    let mut map = sessions.lock();
                    if deletion {
                        if map.remove(&key).is_some() {
                            info!("SAP deletion: {}", key);
                        }
                    } else if map.insert(key.clone(), session).is_none() {
                        info!("SAP discovered: {}", key);
                    }
                }
            }
            Err(ref e) if is_timeout(e) => continue,
            Err(e) => {
                debug!("SAP discovery socket error: {}", e);
                break;
            }
        }
    }
}

/// Validate the SAP header and decode the SDP payload. Returns the session
/// and whether the packet is a deletion.
fn parse_sap_datagram(data: &[u8]) -> Option<(SdpSession, bool)> {
    if data.len() < 8 {
        return None;
    }

    let flags = data[0];
    let version = flags >> 5;
    if version != 1 {
        return None;
    }
    // IPv6 origin (A), encrypted (E), or compressed (C): not supported
    if flags & 0x10 != 0 || flags & 0x02 != 0 || flags & 0x01 != 0 {
        return None;
    }
    let deletion = flags & 0x04 != 0;

    let auth_len = data[1] as usize;
    let payload_start = 8 + auth_len * 4;
    if data.len() <= payload_start {
        return None;
    }

    let sdp_text = std::str::from_utf8(&data[payload_start..]).ok()?;
    let session = SdpSession::parse(sdp_text)?;
    Some((session, deletion))
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

#[cfg(test)]
mod tests {
    use super::super::announce::build_sap_packet;
    use super::*;

    fn sample_sdp() -> String {
        "v=0\r\ns=Stream-1\r\nc=IN IP4 239.69.1.1/32\r\nt=0 0\r\n\
         m=audio 5004 RTP/AVP 96\r\na=rtpmap:96 L24/48000/8\r\na=ptime:0.00025\r\n"
            .to_string()
    }

    #[test]
    fn announcement_roundtrip() {
        let packet = build_sap_packet(1, false, Ipv4Addr::new(10, 0, 0, 1), &sample_sdp());
        let (session, deletion) = parse_sap_datagram(&packet).unwrap();

        assert!(!deletion);
        assert_eq!(session.session_name, "Stream-1");
        assert_eq!(session.port, 5004);
        assert_eq!(session.packet_time_us, 250);
    }

    #[test]
    fn deletion_flag_detected() {
        let packet = build_sap_packet(1, true, Ipv4Addr::new(10, 0, 0, 1), &sample_sdp());
        let (_, deletion) = parse_sap_datagram(&packet).unwrap();
        assert!(deletion);
    }

    #[test]
    fn wrong_version_rejected() {
        let mut packet = build_sap_packet(1, false, Ipv4Addr::UNSPECIFIED, &sample_sdp());
        packet[0] = 2 << 5;
        assert!(parse_sap_datagram(&packet).is_none());
    }

    #[test]
    fn auth_words_are_skipped() {
        let sdp = sample_sdp();
        let mut packet = vec![0x20u8, 1, 0, 1]; // one auth word
        packet.extend_from_slice(&[10, 0, 0, 1]); // origin
        packet.extend_from_slice(&[0xAA; 4]); // auth data
        packet.extend_from_slice(sdp.as_bytes());

        let (session, _) = parse_sap_datagram(&packet).unwrap();
        assert_eq!(session.session_name, "Stream-1");
    }

    #[test]
    fn truncated_datagram_rejected() {
        assert!(parse_sap_datagram(&[0x20, 0, 0]).is_none());
        assert!(parse_sap_datagram(&build_sap_packet(0, false, Ipv4Addr::UNSPECIFIED, "")).is_none());
    }
}
