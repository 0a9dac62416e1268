// Copyright (c) 2024 The dep2p Authors

//! Multiaddr parsing and manipulation.
//!
//! A multiaddr is an ordered sequence of `(protocol, value)` components,
//! written `/ip4/1.2.3.4/udp/4001/quic-v1/p2p/<node-id>`. The type here is a
//! plain tagged sequence with pure helpers; interpretation of the components
//! (public/private, dialable, relay) lives in the classifier.

use crate::node_id::NodeId;
use core::{
    fmt::{Display, Formatter, Result as FmtResult},
    str::FromStr,
};
use displaydoc::Display as DisplayDoc;
use std::net::{Ipv4Addr, Ipv6Addr};
use thiserror::Error;

/// Protocols understood by the address layer.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Protocol {
    /// `ip4`
    Ip4,
    /// `ip6`
    Ip6,
    /// `dns` (resolver picks the family)
    Dns,
    /// `dns4`
    Dns4,
    /// `dns6`
    Dns6,
    /// `tcp`
    Tcp,
    /// `udp`
    Udp,
    /// `quic-v1`
    QuicV1,
    /// `p2p` (terminal node id)
    P2p,
    /// `p2p-circuit` (relay hop marker, no value)
    P2pCircuit,
    /// `ws`
    Ws,
    /// `wss`
    Wss,
}

impl Protocol {
    /// The wire name of the protocol.
    pub const fn name(&self) -> &'static str {
        match self {
            Protocol::Ip4 => "ip4",
            Protocol::Ip6 => "ip6",
            Protocol::Dns => "dns",
            Protocol::Dns4 => "dns4",
            Protocol::Dns6 => "dns6",
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::QuicV1 => "quic-v1",
            Protocol::P2p => "p2p",
            Protocol::P2pCircuit => "p2p-circuit",
            Protocol::Ws => "ws",
            Protocol::Wss => "wss",
        }
    }

    /// Look a protocol up by its wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "ip4" => Protocol::Ip4,
            "ip6" => Protocol::Ip6,
            "dns" => Protocol::Dns,
            "dns4" => Protocol::Dns4,
            "dns6" => Protocol::Dns6,
            "tcp" => Protocol::Tcp,
            "udp" => Protocol::Udp,
            "quic-v1" => Protocol::QuicV1,
            "p2p" => Protocol::P2p,
            "p2p-circuit" => Protocol::P2pCircuit,
            "ws" => Protocol::Ws,
            "wss" => Protocol::Wss,
            _ => return None,
        })
    }

    /// Whether the component carries a value segment.
    pub const fn has_value(&self) -> bool {
        !matches!(
            self,
            Protocol::QuicV1 | Protocol::P2pCircuit | Protocol::Ws | Protocol::Wss
        )
    }
}

/// One `(protocol, value)` element of a multiaddr.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Component {
    /// The protocol tag.
    pub protocol: Protocol,
    /// The value segment, absent for valueless protocols.
    pub value: Option<String>,
}

/// Errors produced when parsing a multiaddr string.
#[derive(Clone, Debug, DisplayDoc, Error, Eq, PartialEq)]
pub enum MultiaddrError {
    /// The address string is empty
    Empty,
    /// Multiaddrs must begin with '/'
    MissingLeadingSlash,
    /// Unknown protocol name: {0}
    UnknownProtocol(String),
    /// Protocol {0} requires a value segment
    MissingValue(&'static str),
    /// Invalid value for protocol {0}: {1}
    InvalidValue(&'static str, String),
}

/// An ordered sequence of protocol components.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct Multiaddr {
    components: Vec<Component>,
}

impl Multiaddr {
    /// An empty address.
    pub fn empty() -> Self {
        Self::default()
    }

    /// True when the address has no components.
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Number of components.
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// The first component, if any.
    pub fn first(&self) -> Option<&Component> {
        self.components.first()
    }

    /// Iterate over the components in order.
    pub fn iter(&self) -> impl Iterator<Item = &Component> {
        self.components.iter()
    }

    /// Append a component.
    pub fn push(&mut self, protocol: Protocol, value: Option<&str>) {
        self.components.push(Component {
            protocol,
            value: value.map(str::to_string),
        });
    }

    /// Return a copy with a trailing `/p2p/<id>` component.
    pub fn with_p2p(&self, id: &NodeId) -> Self {
        let mut out = self.clone();
        out.push(Protocol::P2p, Some(&id.to_base58()));
        out
    }

    /// True when the address routes through a relay circuit.
    pub fn is_relay_circuit(&self) -> bool {
        self.components
            .iter()
            .any(|c| c.protocol == Protocol::P2pCircuit)
    }

    /// Split the address around the first `p2p-circuit` component.
    ///
    /// Returns `(relay, target)` where `relay` is everything before the
    /// marker and `target` everything after it; `None` when the address has
    /// no circuit component.
    pub fn split_circuit(&self) -> Option<(Multiaddr, Multiaddr)> {
        let idx = self
            .components
            .iter()
            .position(|c| c.protocol == Protocol::P2pCircuit)?;
        let relay = Multiaddr {
            components: self.components[..idx].to_vec(),
        };
        let target = Multiaddr {
            components: self.components[idx + 1..].to_vec(),
        };
        Some((relay, target))
    }

    /// Extract the terminal node id from the last `p2p` component.
    pub fn peer_id(&self) -> Option<NodeId> {
        self.components
            .iter()
            .rev()
            .find(|c| c.protocol == Protocol::P2p)
            .and_then(|c| c.value.as_deref())
            .and_then(|v| NodeId::from_base58(v).ok())
    }

    fn check_value(protocol: Protocol, value: &str) -> Result<(), MultiaddrError> {
        let ok = match protocol {
            Protocol::Ip4 => value.parse::<Ipv4Addr>().is_ok(),
            Protocol::Ip6 => value.parse::<Ipv6Addr>().is_ok(),
            Protocol::Tcp | Protocol::Udp => value.parse::<u16>().is_ok(),
            _ => !value.is_empty(),
        };
        if ok {
            Ok(())
        } else {
            Err(MultiaddrError::InvalidValue(
                protocol.name(),
                value.to_string(),
            ))
        }
    }
}

impl Display for Multiaddr {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        for component in &self.components {
            write!(f, "/{}", component.protocol.name())?;
            if let Some(value) = &component.value {
                write!(f, "/{value}")?;
            }
        }
        Ok(())
    }
}

impl FromStr for Multiaddr {
    type Err = MultiaddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(MultiaddrError::Empty);
        }
        if !s.starts_with('/') {
            return Err(MultiaddrError::MissingLeadingSlash);
        }

        let mut segments = s.split('/').skip(1).peekable();
        let mut components = Vec::new();
        while let Some(name) = segments.next() {
            if name.is_empty() {
                // Tolerate a trailing slash.
                continue;
            }
            let protocol = Protocol::from_name(name)
                .ok_or_else(|| MultiaddrError::UnknownProtocol(name.to_string()))?;
            let value = if protocol.has_value() {
                let value = segments
                    .next()
                    .ok_or(MultiaddrError::MissingValue(protocol.name()))?;
                Multiaddr::check_value(protocol, value)?;
                Some(value.to_string())
            } else {
                None
            };
            components.push(Component { protocol, value });
        }
        if components.is_empty() {
            return Err(MultiaddrError::Empty);
        }
        Ok(Multiaddr { components })
    }
}
