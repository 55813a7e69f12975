use super::HEADER_LEN;
use std::net::{Ipv4Addr, Ipv6Addr};

/// Decoded 12-byte DNS header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DnsHeader {
    pub id: u16,
    pub qr: bool,
    pub opcode: u8,
    pub aa: bool,
    pub tc: bool,
    pub rd: bool,
    pub ra: bool,
    pub z: u8,
    pub rcode: u8,
    pub qdcount: u16,
    pub ancount: u16,
    pub nscount: u16,
    pub arcount: u16,
}

impl DnsHeader {
    pub fn decode(buf: &[u8; HEADER_LEN]) -> Self {
        let flags = u16::from_be_bytes([buf[2], buf[3]]);
        Self {
            id: u16::from_be_bytes([buf[0], buf[1]]),
            qr: flags & 0x8000 != 0,
            opcode: ((flags >> 11) & 0x0f) as u8,
            aa: flags & 0x0400 != 0,
            tc: flags & 0x0200 != 0,
            rd: flags & 0x0100 != 0,
            ra: flags & 0x0080 != 0,
            z: ((flags >> 4) & 0x07) as u8,
            rcode: (flags & 0x0f) as u8,
            qdcount: u16::from_be_bytes([buf[4], buf[5]]),
            ancount: u16::from_be_bytes([buf[6], buf[7]]),
            nscount: u16::from_be_bytes([buf[8], buf[9]]),
            arcount: u16::from_be_bytes([buf[10], buf[11]]),
        }
    }
}

/// Addresses and CNAME chain extracted from a DNS response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DnsResponse {
    pub(super) header: DnsHeader,
    pub(super) a: Vec<Ipv4Addr>,
    pub(super) aaaa: Vec<Ipv6Addr>,
    pub(super) cname: Vec<String>,
}

impl DnsResponse {
    pub fn header(&self) -> &DnsHeader {
        &self.header
    }

    pub fn id(&self) -> u16 {
        self.header.id
    }

    pub fn a(&self) -> &[Ipv4Addr] {
        &self.a
    }

    pub fn aaaa(&self) -> &[Ipv6Addr] {
        &self.aaaa
    }

    /// CNAME targets in answer order.
    pub fn cname(&self) -> &[String] {
        &self.cname
    }

    pub fn is_empty(&self) -> bool {
        self.a.is_empty() && self.aaaa.is_empty()
    }
}
