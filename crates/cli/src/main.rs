use clap::Parser;
use ferrous_tunnel_domain::{CliOverrides, Role};
use ferrous_tunnel_infrastructure::tls::CertificatePool;
use std::sync::Arc;
use tracing::info;

mod bootstrap;
mod server;

#[derive(Parser)]
#[command(name = "ferrous-tunnel")]
#[command(version)]
#[command(about = "Ferrous Tunnel - TLS tunnel with DoH/DoT name resolution")]
struct Cli {
    /// Configuration file path
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<String>,

    /// Tunnel side (client, server)
    #[arg(long)]
    role: Option<Role>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Remote tunnel server (client) or listen address (server)
    #[arg(long)]
    server_host: Option<String>,

    #[arg(long)]
    server_port: Option<u16>,

    /// Local listen port (client role)
    #[arg(long)]
    local_port: Option<u16>,

    /// DNS-over-HTTPS resolver URL
    #[arg(long)]
    doh_url: Option<String>,

    /// DNS-over-TLS resolver, host or host:port
    #[arg(long)]
    dot_host: Option<String>,

    /// Skip TLS certificate verification
    #[arg(short = 'k', long)]
    insecure: bool,

    /// Maximum number of open connections
    #[arg(long)]
    parallel_max: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cli_overrides = CliOverrides {
        role: cli.role,
        server_host: cli.server_host,
        server_port: cli.server_port,
        local_port: cli.local_port,
        parallel_max: cli.parallel_max,
        doh_url: cli.doh_url,
        dot_host: cli.dot_host,
        insecure_mode: cli.insecure,
        log_level: cli.log_level,
    };

    let config = bootstrap::load_config(cli.config.as_deref(), cli_overrides)?;

    bootstrap::init_logging(&config);

    info!("Starting Ferrous Tunnel v{}", env!("CARGO_PKG_VERSION"));

    let pool = Arc::new(CertificatePool::new());
    server::start_tunnel(&config, pool).await?;

    info!("Tunnel shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_parses_flags() {
        let cli = Cli::parse_from([
            "ferrous-tunnel",
            "--role",
            "server",
            "-k",
            "--doh-url",
            "https://1.1.1.1/dns-query",
            "--parallel-max",
            "64",
        ]);
        assert_eq!(cli.role, Some(Role::Server));
        assert!(cli.insecure);
        assert_eq!(cli.doh_url.as_deref(), Some("https://1.1.1.1/dns-query"));
        assert_eq!(cli.parallel_max, Some(64));
        assert!(cli.config.is_none());
    }
}
