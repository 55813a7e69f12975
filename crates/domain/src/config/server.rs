use serde::{Deserialize, Serialize};

/// Which side of the tunnel this process plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Accepts plain local connections and carries them to the remote server over TLS.
    #[default]
    Client,
    /// Terminates TLS from clients and relays to the forward target.
    Server,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Server => "server",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "client" => Ok(Role::Client),
            "server" => Ok(Role::Server),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub role: Role,

    /// Remote tunnel server (client role) or TLS listen address (server role)
    #[serde(default = "default_server_host")]
    pub server_host: String,

    #[serde(default = "default_server_port")]
    pub server_port: u16,

    /// SNI sent by the client role and enforced by the server role; empty means server_host
    #[serde(default)]
    pub server_sni: String,

    #[serde(default = "default_local_host")]
    pub local_host: String,

    #[serde(default = "default_local_port")]
    pub local_port: u16,

    /// Where the server role relays decrypted traffic
    #[serde(default)]
    pub forward_host: String,

    #[serde(default)]
    pub forward_port: u16,

    /// Maximum concurrency for parallel connections
    #[serde(default = "default_parallel_max")]
    pub parallel_max: usize,

    #[serde(default = "default_backlog")]
    pub backlog: i32,
}

impl ServerConfig {
    /// Name presented in (client) or expected from (server) the TLS ClientHello.
    pub fn effective_sni(&self) -> &str {
        if self.server_sni.is_empty() {
            &self.server_host
        } else {
            &self.server_sni
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            role: Role::default(),
            server_host: default_server_host(),
            server_port: default_server_port(),
            server_sni: String::new(),
            local_host: default_local_host(),
            local_port: default_local_port(),
            forward_host: String::new(),
            forward_port: 0,
            parallel_max: default_parallel_max(),
            backlog: default_backlog(),
        }
    }
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    443
}

fn default_local_host() -> String {
    "127.0.0.1".to_string()
}

fn default_local_port() -> u16 {
    1080
}

fn default_parallel_max() -> usize {
    512
}

fn default_backlog() -> i32 {
    1024
}
