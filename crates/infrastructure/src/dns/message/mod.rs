//! Hand-rolled DNS wire codec: query encoding and response parsing.
//!
//! Only what a stub resolver needs is understood: one question per query,
//! A/AAAA/CNAME answers (DNAME is tolerated and skipped), and authority and
//! additional sections are walked over without being decoded.

pub mod request;
pub mod response;
pub mod response_parser;

pub use request::{DnsRequest, RequestError};
pub use response::{DnsHeader, DnsResponse};
pub use response_parser::{ParseStatus, ResponseParser};

pub const HEADER_LEN: usize = 12;

/// QCLASS IN
pub const CLASS_IN: u16 = 1;
