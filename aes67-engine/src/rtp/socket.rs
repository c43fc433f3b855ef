//! Multicast UDP socket construction for audio streams.
//!
//! Everything `std::net::UdpSocket` cannot set before bind (address reuse,
//! buffer sizes, DSCP, outbound interface) goes through `socket2`.

use std::io;
use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};

/// DSCP EF (Expedited Forwarding) in the IP TOS byte
pub const DSCP_EF_TOS: u32 = 0xB8;
/// Receive buffer for audio sockets
pub const RX_BUFFER_BYTES: usize = 256 * 1024;
/// TTL for outgoing audio multicast
pub const AUDIO_TTL: u32 = 32;

/// Interpret a configured interface string as an IPv4 address. Interface
/// names cannot be resolved portably without ioctls; they fall back to
/// INADDR_ANY and the OS picks the route.
pub fn resolve_interface(value: &str) -> Ipv4Addr {
    value.parse().unwrap_or(Ipv4Addr::UNSPECIFIED)
}

/// Receive socket for one RX stream: reusable bind on the audio port, large
/// receive buffer, DSCP EF, joined to `group`, 1 s receive timeout so the
/// thread observes shutdown.
pub fn rx_socket(port: u16, group: Ipv4Addr, interface: Ipv4Addr) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    let _ = socket.set_recv_buffer_size(RX_BUFFER_BYTES);
    let _ = socket.set_tos(DSCP_EF_TOS);
    socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port).into())?;

    let socket: UdpSocket = socket.into();
    socket.join_multicast_v4(&group, &interface)?;
    socket.set_read_timeout(Some(Duration::from_secs(1)))?;

    Ok(socket)
}

/// Transmit socket for one TX stream: TTL 32, DSCP EF, outbound interface
/// selected when one is configured.
pub fn tx_socket(interface: Ipv4Addr) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_multicast_ttl_v4(AUDIO_TTL)?;
    let _ = socket.set_tos(DSCP_EF_TOS);
    if interface != Ipv4Addr::UNSPECIFIED {
        socket.set_multicast_if_v4(&interface)?;
    }
    socket.bind(&SocketAddrV4::new(interface, 0).into())?;

    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interface_parsing() {
        assert_eq!(
            resolve_interface("192.168.1.10"),
            Ipv4Addr::new(192, 168, 1, 10)
        );
        assert_eq!(resolve_interface("en0"), Ipv4Addr::UNSPECIFIED);
        assert_eq!(resolve_interface(""), Ipv4Addr::UNSPECIFIED);
    }

    #[test]
    fn tx_socket_binds_ephemeral() {
        let socket = tx_socket(Ipv4Addr::UNSPECIFIED).unwrap();
        assert_ne!(socket.local_addr().unwrap().port(), 0);
    }
}
