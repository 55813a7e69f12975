pub mod core;
pub mod facade;
mod ipv6;

pub use core::{MultiQueryResolver, QueryTransport, Strategy, DEFAULT_TIMEOUT};
pub use facade::{Resolver, ResolverOptions};
pub use ipv6::ipv6_works;
