//! Connection plumbing shared by the DoH and DoT requests.

pub mod resolver;
pub mod tcp;
pub mod tls;

pub use resolver::resolve_all;
