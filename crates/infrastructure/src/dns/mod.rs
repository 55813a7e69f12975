pub mod addrinfo;
pub mod doh;
pub mod dot;
pub mod message;
pub mod resolver;
pub mod transport;

pub use addrinfo::AddrInfo;
pub use doh::DohResolver;
pub use dot::DotResolver;
pub use resolver::{Resolver, ResolverOptions};
