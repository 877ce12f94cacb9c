use std::io;
use std::net::{IpAddr, SocketAddr, UdpSocket};

/// Outward-facing local IP, for display only
///
/// Connecting a UDP socket sends nothing; it just makes the OS pick a route.
pub fn local_ip() -> io::Result<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.connect("8.8.8.8:80")?;
    Ok(socket.local_addr()?.ip())
}

/// Address a peer on the LAN should send to
pub fn display_addr(listen: SocketAddr) -> SocketAddr {
    if !listen.ip().is_unspecified() {
        return listen;
    }
    match local_ip() {
        Ok(ip) => SocketAddr::new(ip, listen.port()),
        Err(_) => listen,
    }
}
