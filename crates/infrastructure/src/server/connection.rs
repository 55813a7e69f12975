use super::stream::ServerStream;
use crate::tls::TlsClientContext;
use async_trait::async_trait;
use ferrous_tunnel_domain::Role;
use std::net::SocketAddr;
use std::sync::Arc;

pub type ConnectionId = u64;

/// What the server knows about a connection when it asks the factory for one.
#[derive(Clone)]
pub struct ConnectionContext {
    pub id: ConnectionId,
    pub listen_index: usize,
    pub peer: SocketAddr,
    pub https_fallback: bool,
    /// Upstream TLS settings, present for the client role.
    pub upstream_tls: Option<TlsClientContext>,
}

/// One proxied connection, owned by the content server while it is open.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    fn connection_id(&self) -> ConnectionId;

    /// Set by the server once ALPN settles: `http/1.1` turns it on, `h2` off.
    fn set_https_fallback(&self, enabled: bool);

    /// Drives the connection until either side closes.
    async fn serve(self: Arc<Self>, stream: ServerStream);

    /// Asks a running `serve` to finish early.
    fn close(&self);
}

pub trait ConnectionFactory: Send + Sync + 'static {
    type Conn: Connection;

    fn role(&self) -> Role;

    fn create(&self, ctx: ConnectionContext) -> Arc<Self::Conn>;
}

/// Observer for connection lifecycle events.
pub trait Delegate: Send + Sync {
    fn on_connect(&self, id: ConnectionId);

    fn on_disconnect(&self, id: ConnectionId);
}
