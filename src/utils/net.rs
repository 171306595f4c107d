use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::net::SocketAddr;
use std::net::TcpListener;
use std::net::UdpSocket;

use crate::NetworkError;
use crate::Result;

/// accept ip either like 127.0.0.1 or docker host name: node1
pub(crate) fn address_str(addr: &str) -> String {
    // Strip existing "http://" or "https://" prefixes if duplicated.
    let normalized = addr.trim_start_matches("http://").trim_start_matches("https://");
    format!("http://{}", normalized)
}

/// Outbound IPv4 address of this host.
///
/// Connecting a UDP socket sends no packet; it only makes the kernel pick the
/// interface it would route through.
pub fn local_ip() -> Result<IpAddr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).map_err(NetworkError::LocalAddress)?;
    socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80)).map_err(NetworkError::LocalAddress)?;
    let ip = socket.local_addr().map_err(NetworkError::LocalAddress)?.ip();

    if ip.is_unspecified() || ip.is_loopback() {
        return Err(NetworkError::NoLocalAddress.into());
    }
    Ok(ip)
}

/// Asks the kernel for a TCP port that is free on `ip` right now
pub fn free_port(ip: IpAddr) -> Result<u16> {
    let addr = SocketAddr::new(ip, 0);
    let listener = TcpListener::bind(addr).map_err(|source| NetworkError::Bind {
        address: addr.to_string(),
        source,
    })?;
    let port = listener.local_addr().map_err(NetworkError::LocalAddress)?.port();
    Ok(port)
}
