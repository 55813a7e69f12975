//! DNS-over-TLS (RFC 7858).

pub mod request;
pub mod resolver;

pub use request::DotRequest;
pub use resolver::{parse_dot_host, DotResolver, DEFAULT_DOT_PORT};
