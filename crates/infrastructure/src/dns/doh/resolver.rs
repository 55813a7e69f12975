use super::request::DohRequest;
use crate::dns::addrinfo::AddrInfo;
use crate::dns::resolver::{MultiQueryResolver, QueryTransport, Strategy};
use crate::tls::TlsClientContext;
use async_trait::async_trait;
use ferrous_tunnel_domain::{RecordType, ResolveError};
use http::Uri;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;

const DEFAULT_HTTPS_PORT: u16 = 443;

/// The parts of a DoH URL the requests need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DohEndpoint {
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl DohEndpoint {
    pub fn parse(url: &str) -> Result<Self, ResolveError> {
        let uri: Uri = url
            .parse()
            .map_err(|e| ResolveError::InvalidUrl(format!("'{}': {}", url, e)))?;

        if uri.scheme_str() != Some("https") {
            return Err(ResolveError::InvalidUrl(format!(
                "'{}': scheme must be https",
                url
            )));
        }

        let host = uri
            .host()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ResolveError::InvalidUrl(format!("'{}': missing host", url)))?;
        let host = host.trim_start_matches('[').trim_end_matches(']').to_string();

        let path = match uri.path_and_query() {
            Some(pq) if !pq.as_str().is_empty() => pq.as_str().to_string(),
            _ => "/".to_string(),
        };

        Ok(Self {
            host,
            port: uri.port_u16().unwrap_or(DEFAULT_HTTPS_PORT),
            path,
        })
    }
}

pub struct DohTransport {
    endpoint: DohEndpoint,
    request: DohRequest,
}

#[async_trait]
impl QueryTransport for DohTransport {
    fn protocol_name(&self) -> &'static str {
        "DoH"
    }

    fn server_host(&self) -> &str {
        &self.endpoint.host
    }

    fn server_port(&self) -> u16 {
        self.endpoint.port
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

/// Resolves names over DNS-over-HTTPS. The A and AAAA queries race and the
/// first one to finish decides the outcome.
pub struct DohResolver {
    inner: MultiQueryResolver<DohTransport>,
}

impl DohResolver {
    /// `timeout_ms` of 0 selects the 300 second default.
    pub fn new(doh_url: &str, timeout_ms: u64, tls: TlsClientContext) -> Result<Self, ResolveError> {
        let endpoint = DohEndpoint::parse(doh_url)?;
        let request = DohRequest::new(
            tls.connector(),
            endpoint.host.clone(),
            endpoint.port,
            endpoint.path.clone(),
        );

        info!(
            host = %endpoint.host,
            port = endpoint.port,
            path = %endpoint.path,
            "DoH resolver configured"
        );

        Ok(Self {
            inner: MultiQueryResolver::new(
                DohTransport { endpoint, request },
                Strategy::RaceToFirst,
                Duration::from_millis(timeout_ms),
            ),
        })
    }

    pub fn with_ipv6(mut self, enabled: bool) -> Self {
        self.inner = self.inner.with_ipv6(enabled);
        self
    }

    pub fn endpoint(&self) -> &DohEndpoint {
        &self.inner.transport().endpoint
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
