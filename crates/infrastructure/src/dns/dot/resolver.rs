use super::request::DotRequest;
use crate::dns::addrinfo::AddrInfo;
use crate::dns::resolver::{MultiQueryResolver, QueryTransport, Strategy};
use crate::tls::TlsClientContext;
use async_trait::async_trait;
use ferrous_tunnel_domain::{RecordType, ResolveError};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;

pub const DEFAULT_DOT_PORT: u16 = 853;

/// Splits `host`, `host:port`, `v6` or `[v6]:port`.
pub fn parse_dot_host(dot_host: &str) -> Result<(String, u16), ResolveError> {
    let invalid = |why: &str| ResolveError::InvalidUrl(format!("'{}': {}", dot_host, why));

    if dot_host.is_empty() {
        return Err(invalid("empty DoT host"));
    }

    if let Some(rest) = dot_host.strip_prefix('[') {
        let (host, tail) = rest.split_once(']').ok_or_else(|| invalid("unclosed '['"))?;
        let port = match tail {
            "" => DEFAULT_DOT_PORT,
            _ => tail
                .strip_prefix(':')
                .and_then(|p| p.parse().ok())
                .ok_or_else(|| invalid("bad port"))?,
        };
        return Ok((host.to_string(), port));
    }

    match dot_host.rsplit_once(':') {
        // a bare IPv6 literal has more than one colon
        Some((host, port)) if !host.contains(':') => {
            let port = port.parse().map_err(|_| invalid("bad port"))?;
            Ok((host.to_string(), port))
        }
        _ => Ok((dot_host.to_string(), DEFAULT_DOT_PORT)),
    }
}

pub struct DotTransport {
    host: String,
    port: u16,
    request: DotRequest,
}

#[async_trait]
impl QueryTransport for DotTransport {
    fn protocol_name(&self) -> &'static str {
        "DoT"
    }

    fn server_host(&self) -> &str {
        &self.host
    }

    fn server_port(&self) -> u16 {
        self.port
    }

    async fn query(
        &self,
        endpoints: &[SocketAddr],
        record_type: RecordType,
        host: &str,
        port: u16,
    ) -> Result<Vec<AddrInfo>, ResolveError> {
        self.request.do_request(endpoints, record_type, host, port).await
    }
}

/// Resolves names over DNS-over-TLS. Waits for both the A and AAAA answers
/// and returns the IPv4 entries ahead of the IPv6 ones. Only one resolve may
/// run at a time.
pub struct DotResolver {
    inner: MultiQueryResolver<DotTransport>,
}

impl DotResolver {
    pub fn new(dot_host: &str, timeout_ms: u64, tls: TlsClientContext) -> Result<Self, ResolveError> {
        let (host, port) = parse_dot_host(dot_host)?;
        let request = DotRequest::new(tls.connector(), host.clone());

        info!(host = %host, port, "DoT resolver configured");

        Ok(Self {
            inner: MultiQueryResolver::new(
                DotTransport {
                    host,
                    port,
                    request,
                },
                Strategy::MergeAll,
                Duration::from_millis(timeout_ms),
            )
            .exclusive(),
        })
    }

    pub fn with_ipv6(mut self, enabled: bool) -> Self {
        self.inner = self.inner.with_ipv6(enabled);
        self
    }

    pub fn server(&self) -> (&str, u16) {
        let transport = self.inner.transport();
        (&transport.host, transport.port)
    }

    pub fn timeout(&self) -> Duration {
        self.inner.timeout()
    }

    pub async fn resolve(&self, host: &str, port: u16) -> Result<Vec<AddrInfo>, ResolveError> {
        self.inner.resolve(host, port).await
    }

    pub fn cancel(&self) {
        self.inner.cancel();
    }
}
