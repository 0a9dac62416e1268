// Copyright (c) 2024 The dep2p Authors

//! Address classification.
//!
//! Pure, total helpers that turn arbitrary address strings into routable
//! facts: which IP they carry, whether that IP is LAN-reachable, how suitable
//! it is for LAN discovery, and what shape of address the string is. All
//! classification happens here; the CIDR and virtual-interface lists below
//! are the single source of truth for every consumer in the workspace.
//!
//! No function in this module performs I/O or fails.

use crate::multiaddr::{Multiaddr, Protocol};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Ranges that are locally addressable but unreachable across machines:
/// benchmarking (198.18.0.0/15), documentation (198.51.100.0/24,
/// 203.0.113.0/24) and CGNAT (100.64.0.0/10). Addresses in these ranges are
/// typically VPN or carrier artifacts and must never be advertised for LAN
/// discovery.
const NON_ROUTABLE_V4: &[(Ipv4Addr, u8)] = &[
    (Ipv4Addr::new(198, 18, 0, 0), 15),
    (Ipv4Addr::new(198, 51, 100, 0), 24),
    (Ipv4Addr::new(203, 0, 113, 0), 24),
    (Ipv4Addr::new(100, 64, 0, 0), 10),
];

/// Interface-name prefixes belonging to tunnels, bridges and container
/// networks. Case-insensitive prefix match.
const VIRTUAL_INTERFACE_PREFIXES: &[&str] = &[
    "utun", "ipsec", "awdl", "llw", "ap", "docker", "br-", "veth", "virbr", "vboxnet", "vmnet",
    "tun", "tap", "vlan", "bond", "dummy", "tailscale", "wg", "cni", "flannel", "calico", "weave",
    "lxcbr", "lxdbr", "docker_gwbridge",
];

/// The shape of an address string.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Classification {
    /// A multiaddr without a terminal peer id, e.g. `/ip4/1.2.3.4/udp/4001`.
    DialAddr,
    /// A multiaddr carrying `/p2p/<id>`.
    FullAddr,
    /// A relayed address containing `/p2p-circuit/`.
    RelayCircuit,
    /// Anything else (`host:port`, bare IPs, garbage).
    Unknown,
}

/// Classify the shape of an address string.
pub fn classify(addr: &str) -> Classification {
    if addr.contains("/p2p-circuit") {
        Classification::RelayCircuit
    } else if addr.contains("/p2p/") {
        Classification::FullAddr
    } else if addr.starts_with('/') {
        Classification::DialAddr
    } else {
        Classification::Unknown
    }
}

/// Extract the IP carried by an address string.
///
/// Accepts `/ip4/x/...` and `/ip6/x/...` multiaddrs, `host:port`,
/// `[ipv6]:port` and plain IP forms. DNS-only addresses yield `None`.
pub fn extract_ip(addr: &str) -> Option<IpAddr> {
    if let Some(rest) = addr.strip_prefix('/') {
        // Lenient multiaddr scan so malformed tails don't hide a leading IP.
        let mut segments = rest.split('/');
        while let Some(name) = segments.next() {
            match name {
                "ip4" | "ip6" => return segments.next()?.parse().ok(),
                "dns" | "dns4" | "dns6" => return None,
                _ => continue,
            }
        }
        return None;
    }

    // Plain IP (including bare IPv6).
    if let Ok(ip) = addr.parse::<IpAddr>() {
        return Some(ip);
    }

    // `[ipv6]:port`
    if let Some(stripped) = addr.strip_prefix('[') {
        let end = stripped.find(']')?;
        return stripped[..end].parse().ok();
    }

    // `host:port`
    let (host, _port) = addr.rsplit_once(':')?;
    host.parse().ok()
}

/// Split an address into host and port, accepting `host:port`, `[v6]:port`
/// and multiaddr forms. Returns `None` when no port component exists.
pub fn split_host_port(addr: &str) -> Option<(String, u16)> {
    if addr.starts_with('/') {
        let ma: Multiaddr = addr.parse().ok()?;
        let mut host = None;
        let mut port = None;
        for component in ma.iter() {
            match component.protocol {
                Protocol::Ip4 | Protocol::Ip6 | Protocol::Dns | Protocol::Dns4 | Protocol::Dns6 => {
                    host = component.value.clone()
                }
                Protocol::Tcp | Protocol::Udp => {
                    port = component.value.as_deref().and_then(|v| v.parse().ok())
                }
                _ => {}
            }
        }
        return Some((host?, port?));
    }

    if let Some(stripped) = addr.strip_prefix('[') {
        let end = stripped.find(']')?;
        let host = &stripped[..end];
        let port = stripped[end + 1..].strip_prefix(':')?.parse().ok()?;
        return Some((host.to_string(), port));
    }

    let (host, port) = addr.rsplit_once(':')?;
    // A bare IPv6 address contains colons but has no port.
    if host.contains(':') && addr.parse::<Ipv6Addr>().is_ok() {
        return None;
    }
    Some((host.to_string(), port.parse().ok()?))
}

fn in_v4_net(ip: Ipv4Addr, net: Ipv4Addr, prefix: u8) -> bool {
    let mask = if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    };
    (u32::from(ip) & mask) == (u32::from(net) & mask)
}

fn is_ula_v6(ip: &Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xfe00) == 0xfc00
}

fn is_link_local_v6(ip: &Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xffc0) == 0xfe80
}

fn ip_is_link_local(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_link_local(),
        IpAddr::V6(v6) => is_link_local_v6(v6),
    }
}

fn ip_is_private(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private(),
        IpAddr::V6(v6) => is_ula_v6(v6),
    }
}

/// True when the IP sits in one of the non-routable VPN/CGNAT/documentation
/// ranges listed at the top of this module.
pub fn is_non_routable_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => NON_ROUTABLE_V4
            .iter()
            .any(|(net, prefix)| in_v4_net(*v4, *net, *prefix)),
        IpAddr::V6(_) => false,
    }
}

/// True when the IP is usable for LAN discovery: private (RFC 1918 / ULA)
/// or link-local, and not in a non-routable range.
pub fn is_lan_ip(ip: &IpAddr) -> bool {
    (ip_is_private(ip) || ip_is_link_local(ip)) && !is_non_routable_ip(ip)
}

/// True when the address string carries a loopback IP.
pub fn is_loopback(addr: &str) -> bool {
    extract_ip(addr).is_some_and(|ip| ip.is_loopback())
}

/// True when the address string carries a private (RFC 1918 / ULA) or
/// link-local IP.
pub fn is_private(addr: &str) -> bool {
    extract_ip(addr).is_some_and(|ip| ip_is_private(&ip) || ip_is_link_local(&ip))
}

/// True when the address string carries a globally routable IP.
pub fn is_public(addr: &str) -> bool {
    extract_ip(addr).is_some_and(|ip| {
        !ip.is_loopback()
            && !ip.is_unspecified()
            && !ip.is_multicast()
            && !ip_is_private(&ip)
            && !ip_is_link_local(&ip)
            && !is_non_routable_ip(&ip)
            && match ip {
                IpAddr::V4(v4) => !v4.is_broadcast(),
                IpAddr::V6(_) => true,
            }
    })
}

/// True when the interface name belongs to a tunnel, bridge or container
/// network that must be skipped during interface enumeration.
pub fn is_virtual_interface(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    VIRTUAL_INTERFACE_PREFIXES
        .iter()
        .any(|prefix| lower.starts_with(prefix))
}

/// Score an IP's suitability for LAN discovery. Higher is better; zero means
/// unsuitable (public, loopback, unspecified or non-routable).
pub fn score_lan_ip(ip: &IpAddr) -> u32 {
    if !is_lan_ip(ip) {
        return 0;
    }
    match ip {
        IpAddr::V4(v4) => {
            let bonus = if in_v4_net(*v4, Ipv4Addr::new(192, 168, 0, 0), 16) {
                300
            } else if in_v4_net(*v4, Ipv4Addr::new(10, 0, 0, 0), 8) {
                200
            } else if in_v4_net(*v4, Ipv4Addr::new(172, 16, 0, 0), 12) {
                100
            } else if v4.is_link_local() {
                10
            } else {
                50
            };
            1000 + bonus
        }
        IpAddr::V6(v6) => {
            let bonus = if is_link_local_v6(v6) { 10 } else { 50 };
            100 + bonus
        }
    }
}

/// Score an address string by the LAN suitability of its IP. Addresses
/// without an extractable IP score zero.
pub fn score_addr_string(addr: &str) -> u32 {
    extract_ip(addr).map_or(0, |ip| score_lan_ip(&ip))
}

/// Sort addresses best-LAN-first. The sort is stable, so zero-scored
/// addresses keep their relative order at the tail.
pub fn sort_addrs_by_reachability(addrs: &[String]) -> Vec<String> {
    let mut out: Vec<String> = addrs.to_vec();
    out.sort_by_key(|addr| core::cmp::Reverse(score_addr_string(addr)));
    out
}

/// Filter a list down to addresses worth publishing for LAN discovery:
/// drops unspecified and loopback hosts, `localhost`, zero ports and any IP
/// that is not LAN-reachable.
pub fn filter_dialable_addrs(addrs: &[String]) -> Vec<String> {
    addrs
        .iter()
        .filter(|addr| {
            let Some((host, port)) = split_host_port(addr) else {
                return false;
            };
            if port == 0 || host.eq_ignore_ascii_case("localhost") {
                return false;
            }
            let Some(ip) = extract_ip(addr) else {
                return false;
            };
            !ip.is_unspecified() && !ip.is_loopback() && is_lan_ip(&ip)
        })
        .cloned()
        .collect()
}

/// Infer a listen port from a set of local addresses: the first non-zero
/// port found in `host:port` or `/tcp/` / `/udp/` components. Zero when no
/// address carries one.
pub fn infer_port(addrs: &[String]) -> u16 {
    addrs
        .iter()
        .filter_map(|addr| split_host_port(addr).map(|(_, port)| port))
        .find(|port| *port != 0)
        .unwrap_or(0)
}
