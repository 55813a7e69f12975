pub mod errors;
pub mod logging;
pub mod network;
pub mod root;
pub mod server;
pub mod tls;

pub use errors::ConfigError;
pub use logging::LoggingConfig;
pub use network::NetworkConfig;
pub use root::{CliOverrides, Config};
pub use server::{Role, ServerConfig};
pub use tls::TlsConfig;
