// Copyright (c) 2024 The dep2p Authors

//! Local network interface enumeration.
//!
//! Wraps `netdev` so the rest of the workspace never touches raw interface
//! flags: interfaces that are down, loopback or virtual-by-name are skipped,
//! and only IPs that score for LAN discovery survive.

use crate::classifier::{is_virtual_interface, score_lan_ip};
use std::net::IpAddr;

/// An interface that passed the physical-and-up filter.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LanInterface {
    /// Kernel interface name, e.g. `eth0`.
    pub name: String,
    /// LAN-scored addresses of the interface, best first.
    pub ips: Vec<IpAddr>,
}

/// Enumerate LAN-usable interfaces.
///
/// Skips interfaces that are down, loopback or virtual; keeps only IPs with
/// a positive LAN score; sorts each interface's IPs best-first. When
/// `interface` is set, only that named interface is considered.
pub fn lan_interfaces(interface: Option<&str>) -> Vec<LanInterface> {
    let mut out = Vec::new();
    for iface in netdev::get_interfaces() {
        if let Some(wanted) = interface {
            if iface.name != wanted {
                continue;
            }
        }
        if !iface.is_up() || iface.is_loopback() || is_virtual_interface(&iface.name) {
            continue;
        }

        let mut ips: Vec<IpAddr> = iface
            .ipv4
            .iter()
            .map(|net| IpAddr::V4(net.addr()))
            .chain(iface.ipv6.iter().map(|net| IpAddr::V6(net.addr())))
            .filter(|ip| score_lan_ip(ip) > 0)
            .collect();
        if ips.is_empty() {
            continue;
        }
        ips.sort_by_key(|ip| core::cmp::Reverse(score_lan_ip(ip)));

        out.push(LanInterface {
            name: iface.name,
            ips,
        });
    }
    out
}

/// All LAN-usable IPs across interfaces, best-scored first.
pub fn lan_ips(interface: Option<&str>) -> Vec<IpAddr> {
    let mut ips: Vec<IpAddr> = lan_interfaces(interface)
        .into_iter()
        .flat_map(|iface| iface.ips)
        .collect();
    ips.sort_by_key(|ip| core::cmp::Reverse(score_lan_ip(ip)));
    ips.dedup();
    ips
}

#[cfg(test)]
mod tests {
    use super::*;

    // Enumeration output depends on the host, so assertions are structural.

    #[test]
    fn enumeration_never_yields_unscored_ips() {
        for iface in lan_interfaces(None) {
            assert!(!iface.ips.is_empty());
            for ip in &iface.ips {
                assert!(score_lan_ip(ip) > 0, "{ip} on {} scored 0", iface.name);
            }
        }
    }

    #[test]
    fn named_filter_restricts_results() {
        let all = lan_interfaces(None);
        if let Some(first) = all.first() {
            let only = lan_interfaces(Some(&first.name));
            assert!(only.iter().all(|iface| iface.name == first.name));
        }
        assert!(lan_interfaces(Some("no-such-interface-zz")).is_empty());
    }

    #[test]
    fn lan_ips_are_sorted_descending() {
        let ips = lan_ips(None);
        let scores: Vec<u32> = ips.iter().map(score_lan_ip).collect();
        let mut sorted = scores.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(scores, sorted);
    }
}
