mod logging;

pub use logging::init_logging;

use ferrous_tunnel_domain::{CliOverrides, Config};

pub fn load_config(path: Option<&str>, overrides: CliOverrides) -> anyhow::Result<Config> {
    let config = Config::load(path, overrides)
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrous_tunnel_domain::Role;
    use std::io::Write;

    #[test]
    fn test_load_config_applies_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nrole = \"server\"\nforward_host = \"10.0.0.2\"\nforward_port = 8080").unwrap();

        let overrides = CliOverrides {
            server_port: Some(8443),
            ..CliOverrides::default()
        };
        let config = load_config(file.path().to_str(), overrides).unwrap();

        assert_eq!(config.server.role, Role::Server);
        assert_eq!(config.server.server_port, 8443);
        assert_eq!(config.server.forward_port, 8080);
    }

    #[test]
    fn test_load_config_rejects_invalid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nrole = \"server\"").unwrap();

        let err = load_config(file.path().to_str(), CliOverrides::default()).unwrap_err();
        assert!(err.to_string().contains("forward_host"));
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config(Some("/nonexistent/ferrous-tunnel.toml"), CliOverrides::default())
            .unwrap_err();
        assert!(err.to_string().starts_with("Failed to load configuration"));
    }
}
