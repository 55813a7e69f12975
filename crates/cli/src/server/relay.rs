use async_trait::async_trait;
use ferrous_tunnel_domain::{Config, ResolveError, Role};
use ferrous_tunnel_infrastructure::dns::{Resolver, ResolverOptions};
use ferrous_tunnel_infrastructure::server::{
    Connection, ConnectionContext, ConnectionFactory, ConnectionId, ServerStream,
};
use ferrous_tunnel_infrastructure::tls::{CertificatePool, TlsClientContext, ALPN_HTTP11};
use rustls::pki_types::ServerName;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{copy_bidirectional, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("resolve failed: {0}")]
    Resolve(#[from] ResolveError),

    #[error("connect to {addr} failed: {source}")]
    Connect { addr: SocketAddr, source: io::Error },

    #[error("connect to {0} timed out")]
    ConnectTimeout(SocketAddr),

    #[error("invalid TLS server name '{0}'")]
    ServerName(String),

    #[error("no upstream TLS context")]
    MissingUpstreamTls,

    #[error("TLS handshake failed: {0}")]
    Handshake(io::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Where accepted connections are carried to.
#[derive(Debug, Clone)]
pub struct RelayTarget {
    pub host: String,
    pub port: u16,
    /// SNI presented upstream; only used by the client role.
    pub server_name: String,
}

impl RelayTarget {
    pub fn from_config(config: &Config) -> Self {
        let server = &config.server;
        match server.role {
            Role::Client => Self {
                host: server.server_host.clone(),
                port: server.server_port,
                server_name: server.effective_sni().to_string(),
            },
            Role::Server => Self {
                host: server.forward_host.clone(),
                port: server.forward_port,
                server_name: server.forward_host.clone(),
            },
        }
    }
}

struct Shared {
    target: RelayTarget,
    /// Shared by every connection so the DNS server endpoints and TLS
    /// sessions stay cached.
    resolver: Resolver,
    /// DoT resolves one name at a time; connections queue here.
    resolve_queue: Mutex<()>,
    connect_timeout: Option<Duration>,
}

/// Builds one [`RelayConnection`] per accepted socket.
pub struct RelayFactory {
    role: Role,
    shared: Arc<Shared>,
}

impl RelayFactory {
    pub fn new(
        role: Role,
        target: RelayTarget,
        resolver: Resolver,
        connect_timeout: Option<Duration>,
    ) -> Self {
        Self {
            role,
            shared: Arc::new(Shared {
                target,
                resolver,
                resolve_queue: Mutex::new(()),
                connect_timeout,
            }),
        }
    }

    pub fn from_config(config: &Config, pool: &CertificatePool) -> Result<Self, ResolveError> {
        let options = ResolverOptions::from_config(&config.network, &config.tls);
        let resolver = Resolver::new(&options, pool)?;
        info!(resolver = resolver.name(), "Relay resolver ready");

        let connect_timeout =
            Some(Duration::from_secs(config.network.connect_timeout)).filter(|d| !d.is_zero());
        Ok(Self::new(
            config.server.role,
            RelayTarget::from_config(config),
            resolver,
            connect_timeout,
        ))
    }

    pub fn target(&self) -> &RelayTarget {
        &self.shared.target
    }
}

impl ConnectionFactory for RelayFactory {
    type Conn = RelayConnection;

    fn role(&self) -> Role {
        self.role
    }

    fn create(&self, ctx: ConnectionContext) -> Arc<RelayConnection> {
        Arc::new(RelayConnection {
            id: ctx.id,
            peer: ctx.peer,
            role: self.role,
            shared: self.shared.clone(),
            upstream_tls: ctx.upstream_tls,
            https_fallback: AtomicBool::new(ctx.https_fallback),
            closed: CancellationToken::new(),
        })
    }
}

/// Copies bytes between an accepted socket and the relay target.
///
/// The client role wraps the upstream leg in TLS; the server role receives
/// an already TLS-terminated stream and forwards in the clear.
pub struct RelayConnection {
    id: ConnectionId,
    peer: SocketAddr,
    role: Role,
    shared: Arc<Shared>,
    upstream_tls: Option<TlsClientContext>,
    https_fallback: AtomicBool,
    closed: CancellationToken,
}

impl RelayConnection {
    pub fn https_fallback(&self) -> bool {
        self.https_fallback.load(Ordering::Relaxed)
    }

    async fn relay(&self, inbound: &mut ServerStream) -> Result<(u64, u64), RelayError> {
        let target = &self.shared.target;
        let addrs = self.resolve_target().await?;
        let tcp = self.connect(&addrs).await?;

        match self.role {
            Role::Server => {
                let mut outbound = tcp;
                Ok(copy_bidirectional(inbound, &mut outbound).await?)
            }
            Role::Client => {
                let tls = self
                    .upstream_tls
                    .as_ref()
                    .ok_or(RelayError::MissingUpstreamTls)?;
                let server_name = ServerName::try_from(target.server_name.clone())
                    .map_err(|_| RelayError::ServerName(target.server_name.clone()))?;
                let mut outbound = tls
                    .connector()
                    .connect(server_name, tcp)
                    .await
                    .map_err(RelayError::Handshake)?;

                let negotiated = outbound.get_ref().1.alpn_protocol() == Some(ALPN_HTTP11);
                self.set_https_fallback(negotiated);

                Ok(copy_bidirectional(inbound, &mut outbound).await?)
            }
        }
    }

    async fn resolve_target(&self) -> Result<Vec<SocketAddr>, ResolveError> {
        let shared = &self.shared;
        let _queued = match shared.resolver {
            Resolver::Dot(_) => Some(shared.resolve_queue.lock().await),
            _ => None,
        };
        shared
            .resolver
            .resolve(&shared.target.host, shared.target.port)
            .await
    }

    async fn connect(&self, addrs: &[SocketAddr]) -> Result<TcpStream, RelayError> {
        let mut last_err = RelayError::Resolve(ResolveError::HostNotFound);
        for &addr in addrs {
            let attempt = TcpStream::connect(addr);
            let result = match self.shared.connect_timeout {
                Some(limit) => match tokio::time::timeout(limit, attempt).await {
                    Ok(result) => result,
                    Err(_) => {
                        last_err = RelayError::ConnectTimeout(addr);
                        continue;
                    }
                },
                None => attempt.await,
            };

            match result {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    return Ok(stream);
                }
                Err(e) => {
                    debug!(conn_id = self.id, target = %addr, error = %e, "Connect failed");
                    last_err = RelayError::Connect { addr, source: e };
                }
            }
        }
        Err(last_err)
    }
}

#[async_trait]
impl Connection for RelayConnection {
    fn connection_id(&self) -> ConnectionId {
        self.id
    }

    fn set_https_fallback(&self, enabled: bool) {
        self.https_fallback.store(enabled, Ordering::Relaxed);
    }

    async fn serve(self: Arc<Self>, mut stream: ServerStream) {
        debug!(
            conn_id = self.id,
            peer = %self.peer,
            role = self.role.as_str(),
            "Relay started"
        );

        let outcome = tokio::select! {
            biased;
            _ = self.closed.cancelled() => {
                debug!(conn_id = self.id, "Relay closed");
                return;
            }
            outcome = self.relay(&mut stream) => outcome,
        };

        match outcome {
            Ok((sent, received)) => {
                debug!(conn_id = self.id, sent, received, "Relay finished")
            }
            Err(e) => warn!(conn_id = self.id, peer = %self.peer, error = %e, "Relay failed"),
        }
        let _ = stream.shutdown().await;
    }

    fn close(&self) {
        self.closed.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrous_tunnel_infrastructure::server::{ContentServer, ContentServerOptions};
    use ferrous_tunnel_infrastructure::tls::client::session_cache;
    use ferrous_tunnel_infrastructure::tls::ClientTlsOptions;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    async fn echo_backend() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut tcp, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let (mut rd, mut wr) = tcp.split();
                    let _ = tokio::io::copy(&mut rd, &mut wr).await;
                });
            }
        });
        addr
    }

    fn system_resolver() -> Resolver {
        Resolver::new(&ResolverOptions::default(), &CertificatePool::new()).unwrap()
    }

    fn factory(role: Role, target: SocketAddr, server_name: &str) -> RelayFactory {
        RelayFactory::new(
            role,
            RelayTarget {
                host: target.ip().to_string(),
                port: target.port(),
                server_name: server_name.to_string(),
            },
            system_resolver(),
            Some(Duration::from_secs(2)),
        )
    }

    fn context(id: ConnectionId) -> ConnectionContext {
        ConnectionContext {
            id,
            listen_index: 0,
            peer: any_port(),
            https_fallback: false,
            upstream_tls: None,
        }
    }

    fn options(insecure: bool) -> ContentServerOptions {
        ContentServerOptions {
            insecure,
            ..ContentServerOptions::default()
        }
    }

    fn any_port() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    async fn round_trip(local: SocketAddr, payload: &[u8]) -> Vec<u8> {
        let mut client = TcpStream::connect(local).await.unwrap();
        client.write_all(payload).await.unwrap();
        let mut echoed = vec![0u8; payload.len()];
        tokio::time::timeout(Duration::from_secs(5), client.read_exact(&mut echoed))
            .await
            .unwrap()
            .unwrap();
        echoed
    }

    #[test]
    fn test_target_from_config() {
        let mut config = Config::default();
        config.server.server_host = "tunnel.example".to_string();
        config.server.server_port = 8443;
        assert_eq!(RelayTarget::from_config(&config).server_name, "tunnel.example");

        config.server.server_sni = "front.example".to_string();
        let target = RelayTarget::from_config(&config);
        assert_eq!(target.host, "tunnel.example");
        assert_eq!(target.port, 8443);
        assert_eq!(target.server_name, "front.example");

        config.server.role = Role::Server;
        config.server.forward_host = "10.0.0.2".to_string();
        config.server.forward_port = 8080;
        let target = RelayTarget::from_config(&config);
        assert_eq!((target.host.as_str(), target.port), ("10.0.0.2", 8080));
    }

    #[test]
    fn test_factory_from_config_connect_timeout() {
        let mut config = Config::default();
        let pool = CertificatePool::new();
        let factory = RelayFactory::from_config(&config, &pool).unwrap();
        assert!(factory.shared.connect_timeout.is_none());
        assert_eq!(factory.shared.resolver.name(), "system");

        config.network.connect_timeout = 3;
        config.network.dot_host = "127.0.0.1".to_string();
        let factory = RelayFactory::from_config(&config, &pool).unwrap();
        assert_eq!(factory.shared.connect_timeout, Some(Duration::from_secs(3)));
        assert_eq!(factory.shared.resolver.name(), "DoT");
    }

    #[test]
    fn test_factory_rejects_bad_doh_url() {
        let mut config = Config::default();
        config.network.doh_url = "http://dns.example/dns-query".to_string();
        assert!(RelayFactory::from_config(&config, &CertificatePool::new()).is_err());
    }

    #[tokio::test]
    async fn test_connections_share_one_queued_dot_resolver() {
        // accepts and never answers, so every DoT resolve runs into its timeout
        let silent = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dot_host = silent.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((tcp, _)) = silent.accept().await {
                held.push(tcp);
            }
        });

        let options = ResolverOptions {
            dot_host,
            timeout_ms: 300,
            insecure: true,
            ..ResolverOptions::default()
        };
        let factory = RelayFactory::new(
            Role::Server,
            RelayTarget {
                host: "backend.example".to_string(),
                port: 8080,
                server_name: String::new(),
            },
            Resolver::new(&options, &CertificatePool::new()).unwrap(),
            None,
        );

        let first = factory.create(context(1));
        let second = factory.create(context(2));
        assert!(Arc::ptr_eq(&first.shared, &second.shared));

        // without the queue the second resolve would fail with ResolveInProgress
        let (a, b) = tokio::join!(first.resolve_target(), second.resolve_target());
        assert_eq!(a, Err(ResolveError::TimedOut));
        assert_eq!(b, Err(ResolveError::TimedOut));
    }

    #[tokio::test]
    async fn test_tunnel_end_to_end() {
        let backend = echo_backend().await;

        let remote = ContentServer::new(
            factory(Role::Server, backend, ""),
            options(false),
            Arc::new(CertificatePool::new()),
            None,
        );
        let remote_addr = remote.listen(any_port(), "localhost", 16).unwrap();

        let local = ContentServer::new(
            factory(Role::Client, remote_addr, "localhost"),
            options(true),
            Arc::new(CertificatePool::new()),
            None,
        );
        let local_addr = local.listen(any_port(), "", 16).unwrap();

        assert_eq!(round_trip(local_addr, b"hello tunnel").await, b"hello tunnel");
        assert_eq!(round_trip(local_addr, b"second").await, b"second");

        local.stop();
        remote.stop();
        local.wait_stopped().await;
        remote.wait_stopped().await;
    }

    #[tokio::test]
    async fn test_wrong_sni_closes_local_side() {
        let backend = echo_backend().await;

        let remote = ContentServer::new(
            factory(Role::Server, backend, ""),
            options(false),
            Arc::new(CertificatePool::new()),
            None,
        );
        let remote_addr = remote.listen(any_port(), "localhost", 16).unwrap();

        let local = ContentServer::new(
            factory(Role::Client, remote_addr, "other.example"),
            options(true),
            Arc::new(CertificatePool::new()),
            None,
        );
        let local_addr = local.listen(any_port(), "", 16).unwrap();

        let mut client = TcpStream::connect(local_addr).await.unwrap();
        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        let read = tokio::time::timeout(Duration::from_secs(5), client.read(&mut buf))
            .await
            .unwrap();
        assert!(matches!(read, Ok(0) | Err(_)));

        local.stop();
        remote.stop();
    }

    #[tokio::test]
    async fn test_unreachable_target_closes_connection() {
        let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead = closed.local_addr().unwrap();
        drop(closed);

        let local = ContentServer::new(
            factory(Role::Server, dead, ""),
            ContentServerOptions::default(),
            Arc::new(CertificatePool::new()),
            None,
        );
        let local_addr = local.listen(any_port(), "localhost", 16).unwrap();

        let client_tls = TlsClientContext::new(
            &ClientTlsOptions {
                insecure: true,
                alpn: vec![ALPN_HTTP11.to_vec()],
                ..ClientTlsOptions::default()
            },
            &CertificatePool::new(),
            session_cache(),
        )
        .unwrap();
        let tcp = TcpStream::connect(local_addr).await.unwrap();
        let mut tls = client_tls
            .connector()
            .connect(ServerName::try_from("localhost").unwrap(), tcp)
            .await
            .unwrap();

        let mut buf = [0u8; 1];
        let read = tokio::time::timeout(Duration::from_secs(5), tls.read(&mut buf))
            .await
            .unwrap();
        assert!(matches!(read, Ok(0) | Err(_)));

        local.shutdown();
        tokio::time::timeout(Duration::from_secs(5), local.wait_stopped())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_close_ends_serve() {
        let backend = echo_backend().await;
        let factory = factory(Role::Server, backend, "");
        let conn = factory.create(ConnectionContext {
            https_fallback: true,
            ..context(7)
        });
        assert_eq!(conn.connection_id(), 7);
        assert!(conn.https_fallback());
        conn.set_https_fallback(false);
        assert!(!conn.https_fallback());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let _client = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (accepted, _) = listener.accept().await.unwrap();

        let serving = tokio::spawn(conn.clone().serve(ServerStream::Plain(accepted)));
        conn.close();
        tokio::time::timeout(Duration::from_secs(5), serving)
            .await
            .unwrap()
            .unwrap();
    }
}
