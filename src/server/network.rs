//! Discovery of the address phones on the local network should connect to.

use std::net::Ipv4Addr;

/// Placeholder reported when no usable address is found
pub const UNKNOWN_IP: &str = "unknown";

/// First IPv4 address of the first interface that is up and not loopback,
/// or `"unknown"`.
pub fn local_ipv4() -> String {
    match first_lan_ipv4() {
        Some(ip) => ip.to_string(),
        None => UNKNOWN_IP.to_string(),
    }
}

#[cfg(unix)]
fn first_lan_ipv4() -> Option<Ipv4Addr> {
    use nix::ifaddrs::getifaddrs;
    use nix::net::if_::InterfaceFlags;
    use std::net::SocketAddrV4;

    let addrs = match getifaddrs() {
        Ok(addrs) => addrs,
        Err(e) => {
            tracing::error!(error = %e, "Failed to enumerate network interfaces");
            return None;
        }
    };

    addrs
        .filter(|ifaddr| {
            ifaddr.flags.contains(InterfaceFlags::IFF_UP)
                && !ifaddr.flags.contains(InterfaceFlags::IFF_LOOPBACK)
        })
        .find_map(|ifaddr| {
            let sin = ifaddr.address.as_ref()?.as_sockaddr_in()?;
            let ip = *SocketAddrV4::from(*sin).ip();
            tracing::debug!(interface = %ifaddr.interface_name, %ip, "Using local address");
            Some(ip)
        })
}

#[cfg(not(unix))]
fn first_lan_ipv4() -> Option<Ipv4Addr> {
    None
}
