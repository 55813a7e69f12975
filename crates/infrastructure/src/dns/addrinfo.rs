//! Resolved address lists in the shape a system resolver hands back.

use super::message::DnsResponse;
use socket2::{Domain, Protocol, SockAddr, Type};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// One resolved stream endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddrInfo {
    family: Domain,
    socket_type: Type,
    protocol: Protocol,
    canonical_name: Option<String>,
    addr: SocketAddr,
}

impl AddrInfo {
    fn new(ip: IpAddr, port: u16, canonical_name: Option<String>) -> Self {
        let addr = SocketAddr::new(ip, port);
        Self {
            family: Domain::for_address(addr),
            socket_type: Type::STREAM,
            protocol: Protocol::TCP,
            canonical_name,
            addr,
        }
    }

    pub fn family(&self) -> Domain {
        self.family
    }

    pub fn socket_type(&self) -> Type {
        self.socket_type
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Only the first entry of a list carries the canonical name.
    pub fn canonical_name(&self) -> Option<&str> {
        self.canonical_name.as_deref()
    }

    pub fn socket_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn is_ipv6(&self) -> bool {
        self.addr.is_ipv6()
    }

    /// Native socket address, sized for the entry's family.
    pub fn sockaddr(&self) -> SockAddr {
        SockAddr::from(self.addr)
    }
}

/// `localhost` and `*.localhost` never leave the host (RFC 6761 §6.3).
pub fn is_localhost(host: &str) -> bool {
    host == "localhost" || host.ends_with(".localhost")
}

pub fn addrinfo_loopback(is_ipv6: bool, port: u16) -> Vec<AddrInfo> {
    let ip = if is_ipv6 {
        IpAddr::V6(Ipv6Addr::LOCALHOST)
    } else {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    };
    vec![AddrInfo::new(ip, port, None)]
}

/// Builds one entry per A (or AAAA when `is_ipv6`) record of `response`.
pub fn addrinfo_dup(is_ipv6: bool, response: &DnsResponse, port: u16) -> Vec<AddrInfo> {
    let ips: Vec<IpAddr> = if is_ipv6 {
        response.aaaa().iter().copied().map(IpAddr::V6).collect()
    } else {
        response.a().iter().copied().map(IpAddr::V4).collect()
    };

    let mut canonical_name = response.cname().first().cloned();
    ips.into_iter()
        .map(|ip| AddrInfo::new(ip, port, canonical_name.take()))
        .collect()
}

pub fn to_socket_addrs(list: &[AddrInfo]) -> Vec<SocketAddr> {
    list.iter().map(AddrInfo::socket_addr).collect()
}
