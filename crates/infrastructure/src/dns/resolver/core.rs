use crate::dns::addrinfo::AddrInfo;
use crate::dns::transport::resolve_all;
use async_trait::async_trait;
use ferrous_tunnel_domain::{RecordType, ResolveError};
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// How the A and AAAA sub-queries of one resolve are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// The first sub-query to finish, successfully or not, decides the result.
    RaceToFirst,
    /// Wait for every sub-query; IPv4 entries come before IPv6 entries.
    MergeAll,
}

/// One encrypted DNS exchange for a single record type.
#[async_trait]
pub trait QueryTransport: Send + Sync {
    fn protocol_name(&self) -> &'static str;

    /// Host of the DNS server itself, resolved once through the system resolver.
    fn server_host(&self) -> &str;

    fn server_port(&self) -> u16;

    /// Looks up `server_host` when it is not an IP literal.
    async fn lookup_server(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>, ResolveError> {
        resolve_all(host, port).await
    }

    async fn query(
        &self,
        endpoints: &[SocketAddr],
        record_type: RecordType,
        host: &str,
        port: u16,
    ) -> Result<Vec<AddrInfo>, ResolveError>;
}

/// Issues the A (and, with IPv6 enabled, AAAA) queries for a name against a
/// cached server endpoint list, bounded by one deadline.
pub struct MultiQueryResolver<T: QueryTransport> {
    transport: T,
    strategy: Strategy,
    timeout: Duration,
    ipv6: bool,
    allow_concurrent: bool,
    endpoints: OnceCell<Arc<[SocketAddr]>>,
    in_progress: AtomicBool,
    cancel: CancellationToken,
}

impl<T: QueryTransport> MultiQueryResolver<T> {
    pub fn new(transport: T, strategy: Strategy, timeout: Duration) -> Self {
        Self {
            transport,
            strategy,
            timeout: if timeout.is_zero() {
                DEFAULT_TIMEOUT
            } else {
                timeout
            },
            ipv6: super::ipv6_works(),
            allow_concurrent: true,
            endpoints: OnceCell::new(),
            in_progress: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_ipv6(mut self, enabled: bool) -> Self {
        self.ipv6 = enabled;
        self
    }

    /// Reject overlapping `resolve` calls with `ResolveInProgress`.
    pub fn exclusive(mut self) -> Self {
        self.allow_concurrent = false;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn ipv6_enabled(&self) -> bool {
        self.ipv6
    }

    pub async fn resolve(&self, host: &str, port: u16) -> Result<Vec<AddrInfo>, ResolveError> {
        let _guard = if self.allow_concurrent {
            None
        } else {
            if self.in_progress.swap(true, Ordering::AcqRel) {
                return Err(ResolveError::ResolveInProgress);
            }
            Some(InProgressGuard(&self.in_progress))
        };

        if self.cancel.is_cancelled() {
            return Err(ResolveError::Cancelled);
        }

        // dropping the losing branch closes every in-flight sub-query
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                debug!(protocol = self.transport.protocol_name(), host = %host, "Resolve cancelled");
                Err(ResolveError::Cancelled)
            }
            result = tokio::time::timeout(self.timeout, self.run(host, port)) => {
                result.unwrap_or_else(|_| {
                    debug!(
                        protocol = self.transport.protocol_name(),
                        host = %host,
                        timeout_ms = self.timeout.as_millis() as u64,
                        "Resolve timed out"
                    );
                    Err(ResolveError::TimedOut)
                })
            }
        }
    }

    /// Cancels every in-flight and future resolve. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    async fn server_endpoints(&self) -> Result<Arc<[SocketAddr]>, ResolveError> {
        self.endpoints
            .get_or_try_init(|| async {
                let host = self.transport.server_host();
                let port = self.transport.server_port();
                let addrs = match host.parse::<IpAddr>() {
                    Ok(ip) => vec![SocketAddr::new(ip, port)],
                    Err(_) => self.transport.lookup_server(host, port).await?,
                };
                debug!(
                    protocol = self.transport.protocol_name(),
                    server = %host,
                    endpoints = addrs.len(),
                    "Server endpoints resolved"
                );
                Ok(addrs.into())
            })
            .await
            .cloned()
    }

    async fn run(&self, host: &str, port: u16) -> Result<Vec<AddrInfo>, ResolveError> {
        let endpoints = self.server_endpoints().await?;

        let mut record_types = vec![RecordType::A];
        if self.ipv6 {
            record_types.push(RecordType::AAAA);
        }

        let mut pending: FuturesUnordered<_> = record_types
            .iter()
            .enumerate()
            .map(|(index, &record_type)| {
                let endpoints = endpoints.clone();
                async move {
                    let result = self
                        .transport
                        .query(&endpoints, record_type, host, port)
                        .await;
                    (index, record_type, result)
                }
            })
            .collect();

        match self.strategy {
            Strategy::RaceToFirst => match pending.next().await {
                Some((_, record_type, result)) => {
                    debug!(
                        protocol = self.transport.protocol_name(),
                        host = %host,
                        record_type = %record_type,
                        ok = result.is_ok(),
                        "First sub-query finished"
                    );
                    match result {
                        Ok(list) if list.is_empty() => Err(ResolveError::HostNotFound),
                        other => other,
                    }
                }
                None => Err(ResolveError::HostNotFound),
            },
            Strategy::MergeAll => {
                let mut slots: Vec<Vec<AddrInfo>> = vec![Vec::new(); record_types.len()];
                while let Some((index, record_type, result)) = pending.next().await {
                    match result {
                        Ok(list) => slots[index] = list,
                        Err(e) => {
                            debug!(
                                protocol = self.transport.protocol_name(),
                                host = %host,
                                record_type = %record_type,
                                error = %e,
                                "Sub-query failed, closing the rest"
                            );
                            return Err(e);
                        }
                    }
                }

                let merged: Vec<AddrInfo> = slots.into_iter().flatten().collect();
                if merged.is_empty() {
                    return Err(ResolveError::HostNotFound);
                }
                Ok(merged)
            }
        }
    }
}

struct InProgressGuard<'a>(&'a AtomicBool);

impl Drop for InProgressGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
