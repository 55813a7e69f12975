use super::relay::RelayFactory;
use ferrous_tunnel_domain::{Config, Role};
use ferrous_tunnel_infrastructure::server::{
    ConnectionFactory, ConnectionId, ContentServer, ContentServerOptions, Delegate,
};
use ferrous_tunnel_infrastructure::tls::CertificatePool;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::signal;
use tracing::{debug, info, warn};

struct ConnectionLog;

impl Delegate for ConnectionLog {
    fn on_connect(&self, id: ConnectionId) {
        debug!(conn_id = id, "Tunnel connection opened");
    }

    fn on_disconnect(&self, id: ConnectionId) {
        debug!(conn_id = id, "Tunnel connection closed");
    }
}

/// Listens for the configured role and runs until the server stops.
///
/// The first Ctrl-C stops accepting and waits for open connections to drain;
/// a second one closes them.
pub async fn start_tunnel(config: &Config, pool: Arc<CertificatePool>) -> anyhow::Result<()> {
    let factory = RelayFactory::from_config(config, &pool)?;
    let target = factory.target().clone();
    let server = ContentServer::new(
        factory,
        ContentServerOptions::from_config(config),
        pool,
        Some(Arc::new(ConnectionLog)),
    );

    let (endpoint, server_name) = listen_endpoint(config).await?;
    let local_addr = server.listen(endpoint, &server_name, config.server.backlog)?;
    info!(
        role = server.role().as_str(),
        listen = %local_addr,
        target = %format_args!("{}:{}", target.host, target.port),
        "Tunnel ready"
    );

    run_until_stopped(&server).await
}

async fn run_until_stopped<F: ConnectionFactory>(server: &ContentServer<F>) -> anyhow::Result<()> {
    tokio::select! {
        _ = server.wait_stopped() => return Ok(()),
        result = signal::ctrl_c() => result?,
    }

    info!(
        open = server.num_of_connections(),
        "Shutting down, waiting for open connections (Ctrl-C again to stop now)"
    );
    server.shutdown();

    tokio::select! {
        _ = server.wait_stopped() => {}
        result = signal::ctrl_c() => {
            result?;
            warn!(open = server.num_of_connections(), "Closing open connections");
            server.stop();
            server.wait_stopped().await;
        }
    }

    info!("Tunnel stopped");
    Ok(())
}

/// Client role listens locally in the clear; server role listens on the
/// public endpoint and pins the SNI.
async fn listen_endpoint(config: &Config) -> anyhow::Result<(SocketAddr, String)> {
    let server = &config.server;
    match server.role {
        Role::Client => {
            let addr = bind_address(&server.local_host, server.local_port).await?;
            Ok((addr, String::new()))
        }
        Role::Server => {
            let addr = bind_address(&server.server_host, server.server_port).await?;
            Ok((addr, server.effective_sni().to_string()))
        }
    }
}

async fn bind_address(host: &str, port: u16) -> anyhow::Result<SocketAddr> {
    let literal = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = literal.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }

    tokio::net::lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| anyhow::anyhow!("No address to listen on for '{}'", host))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_address_literals() {
        assert_eq!(
            bind_address("127.0.0.1", 1080).await.unwrap(),
            "127.0.0.1:1080".parse().unwrap()
        );
        assert_eq!(
            bind_address("[::1]", 443).await.unwrap(),
            "[::1]:443".parse().unwrap()
        );
    }

    #[tokio::test]
    async fn test_listen_endpoint_by_role() {
        let mut config = Config::default();
        config.server.local_port = 1081;
        let (addr, name) = listen_endpoint(&config).await.unwrap();
        assert_eq!(addr, "127.0.0.1:1081".parse().unwrap());
        assert!(name.is_empty());

        config.server.role = Role::Server;
        config.server.server_host = "0.0.0.0".to_string();
        config.server.server_port = 8443;
        config.server.server_sni = "tunnel.example".to_string();
        let (addr, name) = listen_endpoint(&config).await.unwrap();
        assert_eq!(addr, "0.0.0.0:8443".parse().unwrap());
        assert_eq!(name, "tunnel.example");
    }
}
