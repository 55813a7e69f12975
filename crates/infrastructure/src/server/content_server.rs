use super::connection::{Connection, ConnectionContext, ConnectionFactory, ConnectionId, Delegate};
use super::listener::{create_tcp_listener, tune_accepted, SocketOptions};
use super::stream::ServerStream;
use crate::tls::client::session_cache;
use crate::tls::server::{select_alpn, AlpnChoice, ListenTlsConfigs};
use crate::tls::{
    upstream_alpn, CertificatePool, ClientTlsOptions, ServerIdentity, ServerTlsContext,
    TlsClientContext,
};
use ferrous_tunnel_domain::{Config, Role, ServerError};
use rustls::server::Acceptor;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, Notify};
use tokio::task::AbortHandle;
use tokio_rustls::LazyConfigAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const MAX_LISTEN_ADDRESSES: usize = 30;
pub const DEFAULT_BACKLOG: i32 = 1024;

/// Where the server role gets its certificate from.
#[derive(Debug, Clone, Default)]
pub enum IdentitySource {
    /// Generated on first listen for the listen slot's server name.
    #[default]
    SelfSigned,
    Files {
        certificate_chain: String,
        private_key: String,
    },
    Pem {
        certificate_chain: Vec<u8>,
        private_key: Vec<u8>,
    },
}

#[derive(Debug, Clone)]
pub struct ContentServerOptions {
    /// Accepting pauses once this many connections are open.
    pub parallel_max: usize,
    pub socket: SocketOptions,
    pub https_fallback: bool,
    pub insecure: bool,
    pub ca_file: Option<String>,
    pub identity: IdentitySource,
}

impl Default for ContentServerOptions {
    fn default() -> Self {
        Self {
            parallel_max: 512,
            socket: SocketOptions::default(),
            https_fallback: false,
            insecure: false,
            ca_file: None,
            identity: IdentitySource::default(),
        }
    }
}

impl ContentServerOptions {
    pub fn from_config(config: &Config) -> Self {
        let tls = &config.tls;
        let identity = if tls.certificate_chain_file.is_empty() {
            IdentitySource::SelfSigned
        } else {
            IdentitySource::Files {
                certificate_chain: tls.certificate_chain_file.clone(),
                private_key: tls.private_key_file.clone(),
            }
        };

        Self {
            parallel_max: config.server.parallel_max.max(1),
            socket: SocketOptions::from_config(&config.network),
            https_fallback: tls.https_fallback,
            insecure: tls.insecure_mode,
            ca_file: Some(tls.cacert.clone()).filter(|s| !s.is_empty()),
            identity,
        }
    }
}

struct ListenSlot {
    endpoint: SocketAddr,
    resume: Arc<Notify>,
    acceptor: AbortHandle,
}

struct State<C> {
    slots: Vec<ListenSlot>,
    connections: HashMap<ConnectionId, (Arc<C>, AbortHandle)>,
    /// Listen slots waiting for capacity, oldest first.
    paused: VecDeque<usize>,
    in_shutdown: bool,
    server_tls: Option<Arc<ServerTlsContext>>,
    upstream_tls: Option<TlsClientContext>,
}

struct Inner<F: ConnectionFactory> {
    factory: F,
    options: ContentServerOptions,
    pool: Arc<CertificatePool>,
    delegate: Option<Arc<dyn Delegate>>,
    state: Mutex<State<F::Conn>>,
    open: AtomicUsize,
    next_id: AtomicU64,
    work_guard: CancellationToken,
}

/// Accepts plain or TLS connections on up to 30 endpoints and hands each one
/// to a connection built by the factory.
pub struct ContentServer<F: ConnectionFactory> {
    inner: Arc<Inner<F>>,
}

impl<F: ConnectionFactory> ContentServer<F> {
    pub fn new(
        factory: F,
        options: ContentServerOptions,
        pool: Arc<CertificatePool>,
        delegate: Option<Arc<dyn Delegate>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                factory,
                options,
                pool,
                delegate,
                state: Mutex::new(State {
                    slots: Vec::new(),
                    connections: HashMap::new(),
                    paused: VecDeque::new(),
                    in_shutdown: false,
                    server_tls: None,
                    upstream_tls: None,
                }),
                open: AtomicUsize::new(0),
                next_id: AtomicU64::new(1),
                work_guard: CancellationToken::new(),
            }),
        }
    }

    pub fn role(&self) -> Role {
        self.inner.factory.role()
    }

    /// Binds `endpoint` and starts accepting on it. `server_name` is the SNI
    /// every TLS client must present on this endpoint (server role only, empty
    /// accepts any). Returns the bound address.
    pub fn listen(
        &self,
        endpoint: SocketAddr,
        server_name: &str,
        backlog: i32,
    ) -> Result<SocketAddr, ServerError> {
        if self.inner.state().slots.len() >= MAX_LISTEN_ADDRESSES {
            return Err(ServerError::AlreadyStarted);
        }

        let listener = create_tcp_listener(endpoint, backlog, &self.inner.options.socket)?;
        let local_addr = listener.local_addr()?;
        let tls = self.inner.listen_tls(server_name)?;

        let mut state = self.inner.state();
        if state.slots.len() >= MAX_LISTEN_ADDRESSES {
            return Err(ServerError::AlreadyStarted);
        }
        let index = state.slots.len();
        let resume = Arc::new(Notify::new());
        let acceptor = tokio::spawn(accept_loop(
            self.inner.clone(),
            index,
            listener,
            tls,
            resume.clone(),
        ));
        state.slots.push(ListenSlot {
            endpoint: local_addr,
            resume,
            acceptor: acceptor.abort_handle(),
        });
        drop(state);

        info!(
            listen_index = index,
            address = %local_addr,
            role = self.role().as_str(),
            server_name = %server_name,
            "Listening"
        );
        Ok(local_addr)
    }

    pub fn listen_addrs(&self) -> Vec<SocketAddr> {
        self.inner.state().slots.iter().map(|s| s.endpoint).collect()
    }

    pub fn num_of_connections(&self) -> usize {
        self.inner.open.load(Ordering::Acquire)
    }

    /// Upstream TLS context, available for the client role after the first listen.
    pub fn upstream_tls(&self) -> Option<TlsClientContext> {
        self.inner.state().upstream_tls.clone()
    }

    /// Closes every acceptor and lets open connections finish on their own.
    pub fn shutdown(&self) {
        let mut state = self.inner.state();
        close_acceptors(&mut state);
        state.in_shutdown = true;
        let remaining = state.connections.len();
        drop(state);

        info!(connections = remaining, "Content server shutting down");
        if remaining == 0 {
            self.inner.work_guard.cancel();
        }
    }

    /// Closes every acceptor and every open connection right away.
    pub fn stop(&self) {
        let mut state = self.inner.state();
        close_acceptors(&mut state);
        state.in_shutdown = true;
        let connections: Vec<_> = state.connections.drain().collect();
        self.inner.open.store(0, Ordering::Release);
        drop(state);

        info!(connections = connections.len(), "Content server stopping");
        for (id, (conn, task)) in connections {
            conn.close();
            task.abort();
            if let Some(delegate) = &self.inner.delegate {
                delegate.on_disconnect(id);
            }
        }
        self.inner.work_guard.cancel();
    }

    /// Resolves once the server has nothing left to do: after `stop()`, after
    /// `shutdown()` once the last connection closed, or after a fatal accept error.
    pub async fn wait_stopped(&self) {
        self.inner.work_guard.cancelled().await;
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.work_guard.is_cancelled()
    }
}

fn close_acceptors<C>(state: &mut State<C>) {
    for slot in &state.slots {
        slot.acceptor.abort();
    }
    state.paused.clear();
}

impl<F: ConnectionFactory> Inner<F> {
    fn state(&self) -> MutexGuard<'_, State<F::Conn>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Builds the role's TLS contexts on first use and returns the configs for
    /// a new server-role listen slot.
    fn listen_tls(&self, server_name: &str) -> Result<Option<ListenTlsConfigs>, ServerError> {
        let mut state = self.state();
        match self.factory.role() {
            Role::Client => {
                if state.upstream_tls.is_none() {
                    let options = ClientTlsOptions {
                        alpn: upstream_alpn(self.options.https_fallback),
                        insecure: self.options.insecure,
                        ca_file: self.options.ca_file.clone(),
                        ca_pem: None,
                    };
                    state.upstream_tls =
                        Some(TlsClientContext::new(&options, &self.pool, session_cache())?);
                    debug!(insecure = self.options.insecure, "Upstream TLS context ready");
                }
                Ok(None)
            }
            Role::Server => {
                let ctx = match &state.server_tls {
                    Some(ctx) => ctx.clone(),
                    None => {
                        let ctx = Arc::new(ServerTlsContext::new(self.identity(server_name)?)?);
                        state.server_tls = Some(ctx.clone());
                        debug!("Server TLS context ready");
                        ctx
                    }
                };
                let pinned = Some(server_name).filter(|s| !s.is_empty());
                Ok(Some(ctx.listen_configs(pinned, !self.options.https_fallback)?))
            }
        }
    }

    fn identity(&self, server_name: &str) -> Result<ServerIdentity, ServerError> {
        let identity = match &self.options.identity {
            IdentitySource::Files {
                certificate_chain,
                private_key,
            } => ServerIdentity::from_files(certificate_chain, private_key, &self.pool)?,
            IdentitySource::Pem {
                certificate_chain,
                private_key,
            } => ServerIdentity::from_pem(certificate_chain, private_key, &self.pool)?,
            IdentitySource::SelfSigned => {
                let name = if server_name.is_empty() {
                    "localhost"
                } else {
                    server_name
                };
                warn!(name = %name, "No certificate configured, using a self-signed one");
                ServerIdentity::self_signed(vec![name.to_string()])?
            }
        };
        Ok(identity)
    }

    /// Queues `index` for resumption when the server is at capacity.
    fn pause_if_full(&self, index: usize) -> bool {
        let mut state = self.state();
        if state.connections.len() < self.options.parallel_max {
            return false;
        }
        debug!(
            listen_index = index,
            connections = state.connections.len(),
            "Connection limit reached, pausing accept"
        );
        state.paused.push_back(index);
        true
    }

    fn start_connection(
        self: &Arc<Self>,
        index: usize,
        socket: TcpStream,
        peer: SocketAddr,
        tls: Option<ListenTlsConfigs>,
    ) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let upstream_tls = self.state().upstream_tls.clone();
        let conn = self.factory.create(ConnectionContext {
            id,
            listen_index: index,
            peer,
            https_fallback: self.options.https_fallback,
            upstream_tls,
        });

        let (start_tx, start_rx) = oneshot::channel::<()>();
        let task = {
            let inner = self.clone();
            let conn = conn.clone();
            let allow_h2 = !self.options.https_fallback;
            tokio::spawn(async move {
                let _disconnect = DisconnectGuard { inner, id };
                if start_rx.await.is_err() {
                    return;
                }
                let stream = match tls {
                    None => ServerStream::Plain(socket),
                    Some(configs) => match accept_tls(socket, &configs, &*conn, allow_h2).await {
                        Ok(stream) => stream,
                        Err(e) => {
                            debug!(conn_id = id, peer = %peer, error = %e, "TLS handshake failed");
                            return;
                        }
                    },
                };
                conn.serve(stream).await;
            })
        };

        let mut state = self.state();
        state.connections.insert(id, (conn, task.abort_handle()));
        let open = self.open.fetch_add(1, Ordering::AcqRel) + 1;
        debug_assert_eq!(open, state.connections.len());
        drop(state);

        debug!(conn_id = id, peer = %peer, listen_index = index, open, "Connection accepted");
        if let Some(delegate) = &self.delegate {
            delegate.on_connect(id);
        }
        let _ = start_tx.send(());
    }

    fn on_disconnect(&self, id: ConnectionId) {
        let mut state = self.state();
        let Some((conn, _)) = state.connections.remove(&id) else {
            return;
        };
        let open = self.open.fetch_sub(1, Ordering::AcqRel) - 1;
        debug_assert_eq!(open, state.connections.len());

        let resume = state
            .paused
            .pop_front()
            .and_then(|index| state.slots.get(index))
            .map(|slot| slot.resume.clone());
        let drained = state.in_shutdown && state.connections.is_empty();
        drop(state);
        drop(conn);

        debug!(conn_id = id, open, "Connection closed");
        if let Some(delegate) = &self.delegate {
            delegate.on_disconnect(id);
        }
        if let Some(resume) = resume {
            resume.notify_one();
        }
        if drained {
            info!("Last connection closed, content server stopped");
            self.work_guard.cancel();
        }
    }
}

struct DisconnectGuard<F: ConnectionFactory> {
    inner: Arc<Inner<F>>,
    id: ConnectionId,
}

impl<F: ConnectionFactory> Drop for DisconnectGuard<F> {
    fn drop(&mut self) {
        self.inner.on_disconnect(self.id);
    }
}

async fn accept_loop<F: ConnectionFactory>(
    inner: Arc<Inner<F>>,
    index: usize,
    listener: TcpListener,
    tls: Option<ListenTlsConfigs>,
    resume: Arc<Notify>,
) {
    loop {
        if inner.pause_if_full(index) {
            resume.notified().await;
            debug!(listen_index = index, "Resuming accept");
            continue;
        }

        match listener.accept().await {
            Ok((socket, peer)) => {
                tune_accepted(&socket, &inner.options.socket);
                inner.start_connection(index, socket, peer, tls.clone());
            }
            Err(e) if is_transient_accept_error(&e) => {
                debug!(listen_index = index, error = %e, "Transient accept error");
            }
            Err(e) => {
                error!(listen_index = index, error = %e, "Accept failed, no longer accepting");
                inner.work_guard.cancel();
                return;
            }
        }
    }
}

fn is_transient_accept_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

/// Server-side handshake: ALPN is settled from the raw ClientHello before the
/// matching config is applied.
async fn accept_tls<C: Connection>(
    socket: TcpStream,
    configs: &ListenTlsConfigs,
    conn: &C,
    allow_h2: bool,
) -> io::Result<ServerStream> {
    let start = LazyConfigAcceptor::new(Acceptor::default(), socket).await?;
    let choice = select_alpn(start.client_hello().alpn(), allow_h2);
    match choice {
        AlpnChoice::H2 => conn.set_https_fallback(false),
        AlpnChoice::Http11 => conn.set_https_fallback(true),
        AlpnChoice::NotOffered | AlpnChoice::NoOverlap => {}
    }
    let stream = start.into_stream(configs.for_choice(choice)).await?;
    Ok(ServerStream::Tls(Box::new(stream)))
}
