use crate::dns::addrinfo::{addrinfo_dup, addrinfo_loopback, is_localhost, AddrInfo};
use crate::dns::message::{DnsRequest, ResponseParser};
use crate::dns::transport::{tcp, tls};
use ferrous_tunnel_domain::{RecordType, ResolveError};
use std::net::SocketAddr;
use tokio_rustls::TlsConnector;
use tracing::debug;

/// One DoT exchange (RFC 7858): length-prefixed query and response over TLS.
#[derive(Clone)]
pub struct DotRequest {
    connector: TlsConnector,
    hostname: String,
}

impl DotRequest {
    pub fn new(connector: TlsConnector, hostname: String) -> Self {
        Self {
            connector,
            hostname,
        }
    }

    pub async fn do_request(
        &self,
        endpoints: &[SocketAddr],
        record_type: RecordType,
        host: &str,
        port: u16,
    ) -> Result<Vec<AddrInfo>, ResolveError> {
        let is_ipv6 = record_type == RecordType::AAAA;
        if is_localhost(host) {
            debug!(host = %host, "Localhost shortcut, no DoT exchange");
            return Ok(addrinfo_loopback(is_ipv6, port));
        }

        let query = DnsRequest::new(host, record_type).map_err(|e| {
            debug!(host = %host, error = %e, "Failed to build DNS query");
            ResolveError::HostUnreachable
        })?;

        let (tcp_stream, server_addr) = tcp::connect(endpoints).await?;
        let mut stream =
            tls::handshake(&self.connector, &self.hostname, server_addr, tcp_stream).await?;

        tcp::send_with_length_prefix(&mut stream, &query.to_bytes()).await?;
        let message = tcp::read_with_length_prefix(&mut stream).await?;

        let response = ResponseParser::parse_message(&message).map_err(|status| {
            debug!(server = %server_addr, host = %host, ?status, "Bad DNS response");
            ResolveError::OperationNotSupported
        })?;

        let list = addrinfo_dup(is_ipv6, &response, port);
        debug!(
            server = %server_addr,
            host = %host,
            record_type = %record_type,
            addresses = list.len(),
            "DoT query answered"
        );
        Ok(list)
    }
}
