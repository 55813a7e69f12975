use super::{ipv6_works, DEFAULT_TIMEOUT};
use crate::dns::addrinfo::to_socket_addrs;
use crate::dns::doh::DohResolver;
use crate::dns::dot::DotResolver;
use crate::dns::transport::resolve_all;
use crate::tls::client::session_cache;
use crate::tls::{CertificatePool, ClientTlsOptions, TlsClientContext};
use ferrous_tunnel_domain::config::{NetworkConfig, TlsConfig};
use ferrous_tunnel_domain::ResolveError;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone, Default)]
pub struct ResolverOptions {
    pub doh_url: String,
    pub dot_host: String,
    pub timeout_ms: u64,
    pub ipv6_mode: bool,
    pub insecure: bool,
    pub ca_file: Option<String>,
}

impl ResolverOptions {
    pub fn from_config(network: &NetworkConfig, tls: &TlsConfig) -> Self {
        Self {
            doh_url: network.doh_url.clone(),
            dot_host: network.dot_host.clone(),
            timeout_ms: network.resolve_timeout_ms,
            ipv6_mode: network.ipv6_mode,
            insecure: tls.insecure_mode,
            ca_file: Some(tls.cacert.clone()).filter(|s| !s.is_empty()),
        }
    }

    /// IPv6 answers are only asked for when the host can use them.
    pub fn ipv6_enabled(&self) -> bool {
        self.ipv6_mode && ipv6_works()
    }
}

/// Host name resolution as the tunnel sees it: DoH if configured, else DoT,
/// else the system resolver.
pub enum Resolver {
    Doh(DohResolver),
    Dot(DotResolver),
    System(SystemResolver),
}

impl Resolver {
    pub fn new(options: &ResolverOptions, pool: &CertificatePool) -> Result<Self, ResolveError> {
        let ipv6 = options.ipv6_enabled();
        let client_options = |base: ClientTlsOptions| ClientTlsOptions {
            insecure: options.insecure,
            ca_file: options.ca_file.clone(),
            ..base
        };

        if !options.doh_url.is_empty() {
            let tls = TlsClientContext::new(&client_options(ClientTlsOptions::doh()), pool, session_cache())?;
            let resolver = DohResolver::new(&options.doh_url, options.timeout_ms, tls)?.with_ipv6(ipv6);
            return Ok(Resolver::Doh(resolver));
        }

        if !options.dot_host.is_empty() {
            let tls = TlsClientContext::new(&client_options(ClientTlsOptions::dot()), pool, session_cache())?;
            let resolver = DotResolver::new(&options.dot_host, options.timeout_ms, tls)?.with_ipv6(ipv6);
            return Ok(Resolver::Dot(resolver));
        }

        info!("Using the system resolver");
        Ok(Resolver::System(SystemResolver::new(
            Duration::from_millis(options.timeout_ms),
            ipv6,
        )))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Resolver::Doh(_) => "DoH",
            Resolver::Dot(_) => "DoT",
            Resolver::System(_) => "system",
        }
    }

    pub async fn resolve(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>, ResolveError> {
        let literal = host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = literal.parse::<IpAddr>() {
            return Ok(vec![SocketAddr::new(ip, port)]);
        }

        let addrs = match self {
            Resolver::Doh(r) => to_socket_addrs(&r.resolve(host, port).await?),
            Resolver::Dot(r) => to_socket_addrs(&r.resolve(host, port).await?),
            Resolver::System(r) => r.resolve(host, port).await?,
        };

        debug!(resolver = self.name(), host = %host, addresses = addrs.len(), "Host resolved");
        Ok(addrs)
    }

    pub fn cancel(&self) {
        match self {
            Resolver::Doh(r) => r.cancel(),
            Resolver::Dot(r) => r.cancel(),
            Resolver::System(r) => r.cancel(),
        }
    }
}

/// `getaddrinfo` through tokio, bounded by the same deadline and cancel
/// semantics as the encrypted resolvers.
pub struct SystemResolver {
    timeout: Duration,
    ipv6: bool,
    cancel: CancellationToken,
}

impl SystemResolver {
    pub fn new(timeout: Duration, ipv6: bool) -> Self {
        Self {
            timeout: if timeout.is_zero() {
                DEFAULT_TIMEOUT
            } else {
                timeout
            },
            ipv6,
            cancel: CancellationToken::new(),
        }
    }

    pub async fn resolve(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>, ResolveError> {
        let lookup = async {
            let mut addrs = resolve_all(host, port).await?;
            if !self.ipv6 {
                addrs.retain(SocketAddr::is_ipv4);
            }
            if addrs.is_empty() {
                return Err(ResolveError::HostNotFound);
            }
            Ok(addrs)
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ResolveError::Cancelled),
            result = tokio::time::timeout(self.timeout, lookup) => {
                result.map_err(|_| ResolveError::TimedOut)?
            }
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}
