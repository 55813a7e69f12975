//! TLS-terminating content server with ALPN selection and accept backpressure.

pub mod connection;
pub mod content_server;
pub mod listener;
pub mod stream;

pub use connection::{Connection, ConnectionContext, ConnectionFactory, ConnectionId, Delegate};
pub use content_server::{
    ContentServer, ContentServerOptions, IdentitySource, DEFAULT_BACKLOG, MAX_LISTEN_ADDRESSES,
};
pub use listener::{KeepAlive, SocketOptions};
pub use stream::ServerStream;
