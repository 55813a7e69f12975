use super::{CLASS_IN, HEADER_LEN};
use ferrous_tunnel_domain::RecordType;
use std::io::IoSlice;
use thiserror::Error;

/// RFC 1035 name limit plus header/question slack.
const MAX_QUERY_LEN: usize = 272;
const MAX_LABEL_LEN: usize = 63;

/// Header with id 0, RD set and QDCOUNT 1, already in network order.
const QUERY_HEADER: [u8; HEADER_LEN] = [0x00, 0x00, 0x01, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("empty host name")]
    EmptyHost,

    #[error("empty label in '{0}'")]
    EmptyLabel(String),

    #[error("label longer than 63 bytes in '{0}'")]
    LabelTooLong(String),

    #[error("encoded query for '{0}' exceeds 272 bytes")]
    TooLong(String),
}

/// A single-question DNS query, immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsRequest {
    header: [u8; HEADER_LEN],
    body: Vec<u8>,
    record_type: RecordType,
}

impl DnsRequest {
    pub fn new(host: &str, record_type: RecordType) -> Result<Self, RequestError> {
        if host.is_empty() {
            return Err(RequestError::EmptyHost);
        }

        let name = host.strip_suffix('.').unwrap_or(host);
        // length octet for the first label plus the root terminator
        let qname_len = name.len() + 2;
        if HEADER_LEN + qname_len + 4 > MAX_QUERY_LEN {
            return Err(RequestError::TooLong(host.to_string()));
        }

        let mut body = Vec::with_capacity(qname_len + 4);
        for label in name.split('.') {
            if label.is_empty() {
                return Err(RequestError::EmptyLabel(host.to_string()));
            }
            if label.len() > MAX_LABEL_LEN {
                return Err(RequestError::LabelTooLong(host.to_string()));
            }
            body.push(label.len() as u8);
            body.extend_from_slice(label.as_bytes());
        }
        body.push(0);
        body.extend_from_slice(&record_type.code().to_be_bytes());
        body.extend_from_slice(&CLASS_IN.to_be_bytes());

        Ok(Self {
            header: QUERY_HEADER,
            body,
            record_type,
        })
    }

    pub fn header(&self) -> &[u8] {
        &self.header
    }

    /// Question section: QNAME, QTYPE, QCLASS.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn record_type(&self) -> RecordType {
        self.record_type
    }

    /// Encoded size in bytes; never zero.
    pub fn wire_len(&self) -> usize {
        self.header.len() + self.body.len()
    }

    /// Header and body as two buffers for vectored writes.
    pub fn buffers(&self) -> [IoSlice<'_>; 2] {
        [IoSlice::new(&self.header), IoSlice::new(&self.body)]
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.wire_len());
        out.extend_from_slice(&self.header);
        out.extend_from_slice(&self.body);
        out
    }
}
