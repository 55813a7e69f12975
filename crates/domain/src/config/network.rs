use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NetworkConfig {
    /// Resolve names to IPv6 addresses as well (only if the host supports it)
    #[serde(default = "default_true")]
    pub ipv6_mode: bool,

    #[serde(default = "default_true")]
    pub reuse_port: bool,

    #[serde(default)]
    pub tcp_fastopen: bool,

    #[serde(default = "default_true")]
    pub tcp_nodelay: bool,

    #[serde(default = "default_true")]
    pub tcp_keep_alive: bool,

    #[serde(default = "default_keep_alive_idle")]
    pub tcp_keep_alive_idle: u64,

    #[serde(default = "default_keep_alive_interval")]
    pub tcp_keep_alive_interval: u64,

    #[serde(default = "default_keep_alive_cnt")]
    pub tcp_keep_alive_cnt: u32,

    /// Linux only, applied best effort; empty keeps the kernel default
    #[serde(default)]
    pub congestion_algorithm: String,

    /// Connect timeout in seconds, 0 disables it
    #[serde(default)]
    pub connect_timeout: u64,

    /// Resolve host names over DoH, e.g. "https://1.1.1.1/dns-query"
    #[serde(default)]
    pub doh_url: String,

    /// Resolve host names over DoT, "host" or "host:port"
    #[serde(default)]
    pub dot_host: String,

    #[serde(default = "default_resolve_timeout_ms")]
    pub resolve_timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            ipv6_mode: true,
            reuse_port: true,
            tcp_fastopen: false,
            tcp_nodelay: true,
            tcp_keep_alive: true,
            tcp_keep_alive_idle: default_keep_alive_idle(),
            tcp_keep_alive_interval: default_keep_alive_interval(),
            tcp_keep_alive_cnt: default_keep_alive_cnt(),
            congestion_algorithm: String::new(),
            connect_timeout: 0,
            doh_url: String::new(),
            dot_host: String::new(),
            resolve_timeout_ms: default_resolve_timeout_ms(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_keep_alive_idle() -> u64 {
    7200
}

fn default_keep_alive_interval() -> u64 {
    75
}

fn default_keep_alive_cnt() -> u32 {
    9
}

fn default_resolve_timeout_ms() -> u64 {
    10_000
}
