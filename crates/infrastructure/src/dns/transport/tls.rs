use ferrous_tunnel_domain::ResolveError;
use rustls::pki_types::ServerName;
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

/// Runs the client handshake; any handshake failure is reported as
/// `ConnectionRefused`.
pub(crate) async fn handshake(
    connector: &TlsConnector,
    hostname: &str,
    server_addr: SocketAddr,
    tcp_stream: TcpStream,
) -> Result<TlsStream<TcpStream>, ResolveError> {
    let server_name = ServerName::try_from(hostname.to_string()).map_err(|e| {
        ResolveError::TlsConfig(format!("Invalid TLS hostname '{}': {}", hostname, e))
    })?;

    let tls_stream = connector
        .connect(server_name, tcp_stream)
        .await
        .map_err(|e| {
            debug!(server = %server_addr, hostname = %hostname, error = %e, "TLS handshake failed");
            ResolveError::ConnectionRefused
        })?;

    debug!(server = %server_addr, hostname = %hostname, "TLS connection established");
    Ok(tls_stream)
}
