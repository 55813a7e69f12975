use ferrous_tunnel_domain::config::NetworkConfig;
use socket2::{Domain, Protocol, SockRef, Socket, TcpKeepalive, Type};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeepAlive {
    pub idle: Duration,
    pub interval: Duration,
    pub count: u32,
}

/// Socket tuning for listeners and accepted connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketOptions {
    pub reuse_port: bool,
    pub tcp_fastopen: bool,
    pub tcp_nodelay: bool,
    pub keep_alive: Option<KeepAlive>,
    /// Linux only; empty keeps the kernel default.
    pub congestion_algorithm: String,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            reuse_port: true,
            tcp_fastopen: false,
            tcp_nodelay: true,
            keep_alive: None,
            congestion_algorithm: String::new(),
        }
    }
}

impl SocketOptions {
    pub fn from_config(network: &NetworkConfig) -> Self {
        Self {
            reuse_port: network.reuse_port,
            tcp_fastopen: network.tcp_fastopen,
            tcp_nodelay: network.tcp_nodelay,
            keep_alive: network.tcp_keep_alive.then(|| KeepAlive {
                idle: Duration::from_secs(network.tcp_keep_alive_idle),
                interval: Duration::from_secs(network.tcp_keep_alive_interval),
                count: network.tcp_keep_alive_cnt,
            }),
            congestion_algorithm: network.congestion_algorithm.clone(),
        }
    }
}

pub(crate) fn create_tcp_listener(
    addr: SocketAddr,
    backlog: i32,
    options: &SocketOptions,
) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    if addr.is_ipv6() {
        socket.set_only_v6(false)?;
    }
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    if options.reuse_port {
        socket.set_reuse_port(true)?;
    }
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;
    if options.tcp_fastopen {
        set_tcp_fastopen(&socket);
    }
    socket.set_nonblocking(true)?;
    let std_listener: std::net::TcpListener = socket.into();
    TcpListener::from_std(std_listener)
}

/// Applies per-connection options; failures are logged, never fatal.
pub(crate) fn tune_accepted(stream: &TcpStream, options: &SocketOptions) {
    if options.tcp_nodelay {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Failed to set TCP_NODELAY");
        }
    }

    let sock = SockRef::from(stream);
    if let Some(keep_alive) = &options.keep_alive {
        let params = TcpKeepalive::new()
            .with_time(keep_alive.idle)
            .with_interval(keep_alive.interval);
        #[cfg(target_os = "linux")]
        let params = params.with_retries(keep_alive.count);
        if let Err(e) = sock.set_tcp_keepalive(&params) {
            debug!(error = %e, "Failed to enable TCP keep-alive");
        }
    }

    if !options.congestion_algorithm.is_empty() {
        set_congestion_algorithm(&sock, &options.congestion_algorithm);
    }
}

#[cfg(target_os = "linux")]
fn set_tcp_fastopen(socket: &Socket) {
    use std::os::unix::io::AsRawFd;

    // pending TFO handshakes queued per listener
    let qlen: libc::c_int = 5;
    let fd = socket.as_raw_fd();
    let ret = unsafe {
        libc::setsockopt(
            fd,
            libc::IPPROTO_TCP,
            libc::TCP_FASTOPEN,
            &qlen as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret != 0 {
        warn!(error = %io::Error::last_os_error(), "TCP Fast Open not available");
    }
}

#[cfg(not(target_os = "linux"))]
fn set_tcp_fastopen(_socket: &Socket) {
    debug!("TCP Fast Open not supported on this platform");
}

#[cfg(any(target_os = "linux", target_os = "freebsd"))]
fn set_congestion_algorithm(sock: &SockRef<'_>, algorithm: &str) {
    if let Err(e) = sock.set_tcp_congestion(algorithm.as_bytes()) {
        debug!(algorithm = %algorithm, error = %e, "Failed to set congestion algorithm");
    }
}

#[cfg(not(any(target_os = "linux", target_os = "freebsd")))]
fn set_congestion_algorithm(_sock: &SockRef<'_>, algorithm: &str) {
    debug!(algorithm = %algorithm, "Congestion algorithm selection not supported on this platform");
}
