//! DNS-over-HTTPS (RFC 8484) over HTTP/1.1.

pub mod request;
pub mod resolver;

pub use request::DohRequest;
pub use resolver::{DohEndpoint, DohResolver};
