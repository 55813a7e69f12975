use serde::{Deserialize, Serialize};

use super::errors::ConfigError;
use super::logging::LoggingConfig;
use super::network::NetworkConfig;
use super::server::{Role, ServerConfig};
use super::tls::TlsConfig;

/// Main configuration structure for Ferrous Tunnel
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    /// Listen/remote endpoints and concurrency
    #[serde(default)]
    pub server: ServerConfig,

    /// Socket options and name resolution
    #[serde(default)]
    pub network: NetworkConfig,

    /// Certificates and verification
    #[serde(default)]
    pub tls: TlsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file or use defaults
    ///
    /// Priority order:
    /// 1. Explicitly provided path
    /// 2. ferrous-tunnel.toml in current directory
    /// 3. /etc/ferrous-tunnel/config.toml
    /// 4. Default configuration
    pub fn load(path: Option<&str>, cli_overrides: CliOverrides) -> Result<Self, ConfigError> {
        let mut config = if let Some(path) = path {
            Self::from_file(path)?
        } else if std::path::Path::new("ferrous-tunnel.toml").exists() {
            Self::from_file("ferrous-tunnel.toml")?
        } else if std::path::Path::new("/etc/ferrous-tunnel/config.toml").exists() {
            Self::from_file("/etc/ferrous-tunnel/config.toml")?
        } else {
            Self::default()
        };

        config.apply_cli_overrides(cli_overrides);
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(path.to_string(), e.to_string()))?;
        toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    fn apply_cli_overrides(&mut self, overrides: CliOverrides) {
        if let Some(role) = overrides.role {
            self.server.role = role;
        }
        if let Some(host) = overrides.server_host {
            self.server.server_host = host;
        }
        if let Some(port) = overrides.server_port {
            self.server.server_port = port;
        }
        if let Some(port) = overrides.local_port {
            self.server.local_port = port;
        }
        if let Some(max) = overrides.parallel_max {
            self.server.parallel_max = max;
        }
        if let Some(url) = overrides.doh_url {
            self.network.doh_url = url;
        }
        if let Some(host) = overrides.dot_host {
            self.network.dot_host = host;
        }
        if overrides.insecure_mode {
            self.tls.insecure_mode = true;
        }
        if let Some(level) = overrides.log_level {
            self.logging.level = level;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.server_port == 0 {
            return Err(ConfigError::Validation(
                "Server port cannot be 0".to_string(),
            ));
        }

        if self.server.parallel_max == 0 {
            return Err(ConfigError::Validation(
                "parallel_max must be at least 1".to_string(),
            ));
        }

        if !self.network.doh_url.is_empty() && !self.network.doh_url.starts_with("https://") {
            return Err(ConfigError::Validation(format!(
                "DoH URL '{}' must use the https scheme",
                self.network.doh_url
            )));
        }

        if self.tls.certificate_chain_file.is_empty() != self.tls.private_key_file.is_empty() {
            return Err(ConfigError::Validation(
                "certificate_chain_file and private_key_file must be set together".to_string(),
            ));
        }

        if self.server.role == Role::Server
            && (self.server.forward_host.is_empty() || self.server.forward_port == 0)
        {
            return Err(ConfigError::Validation(
                "Server role requires forward_host and forward_port".to_string(),
            ));
        }

        if self.server.role == Role::Client && self.server.local_port == 0 {
            return Err(ConfigError::Validation(
                "Client role requires a local port".to_string(),
            ));
        }

        Ok(())
    }
}

/// Command-line overrides for configuration
#[derive(Debug, Default)]
pub struct CliOverrides {
    pub role: Option<Role>,
    pub server_host: Option<String>,
    pub server_port: Option<u16>,
    pub local_port: Option<u16>,
    pub parallel_max: Option<usize>,
    pub doh_url: Option<String>,
    pub dot_host: Option<String>,
    pub insecure_mode: bool,
    pub log_level: Option<String>,
}
