use std::net::{Ipv6Addr, SocketAddr, TcpListener};
use std::sync::LazyLock;
use tracing::debug;

static IPV6_WORKS: LazyLock<bool> = LazyLock::new(|| {
    let works = TcpListener::bind(SocketAddr::from((Ipv6Addr::LOCALHOST, 0))).is_ok();
    debug!(ipv6 = works, "IPv6 capability probed");
    works
});

/// Whether this host can open IPv6 sockets at all. Probed once per process.
pub fn ipv6_works() -> bool {
    *IPV6_WORKS
}
