//! rustls context construction shared by the resolvers and the content server.

pub mod cert_pool;
pub mod client;
pub mod server;
mod verifier;

pub use cert_pool::CertificatePool;
pub use client::{ClientTlsOptions, TlsClientContext};
pub use server::{ServerIdentity, ServerTlsContext};

use ferrous_tunnel_domain::{ResolveError, ServerError};
use std::sync::Arc;
use thiserror::Error;

pub const ALPN_H2: &[u8] = b"h2";
pub const ALPN_HTTP11: &[u8] = b"http/1.1";

#[derive(Error, Debug)]
pub enum TlsError {
    #[error("failed to read {path}: {message}")]
    Read { path: String, message: String },

    #[error("invalid PEM data: {0}")]
    Pem(String),

    #[error("no certificates found")]
    NoCertificates,

    #[error("no private key found")]
    NoPrivateKey,

    #[error("certificate generation failed: {0}")]
    Generate(String),

    #[error(transparent)]
    Rustls(#[from] rustls::Error),
}

impl From<TlsError> for ResolveError {
    fn from(e: TlsError) -> Self {
        ResolveError::TlsConfig(e.to_string())
    }
}

impl From<TlsError> for ServerError {
    fn from(e: TlsError) -> Self {
        ServerError::Tls(e.to_string())
    }
}

/// TLS 1.2 and 1.3 only.
pub(crate) static PROTOCOL_VERSIONS: &[&rustls::SupportedProtocolVersion] =
    &[&rustls::version::TLS13, &rustls::version::TLS12];

/// The default aws-lc-rs suite list already leaves out anonymous, 3DES and
/// SHA1-signed ECDSA suites.
pub(crate) fn crypto_provider() -> Arc<rustls::crypto::CryptoProvider> {
    Arc::new(rustls::crypto::aws_lc_rs::default_provider())
}

/// ALPN offered upstream: h2 then http/1.1, or http/1.1 alone under fallback.
pub fn upstream_alpn(https_fallback: bool) -> Vec<Vec<u8>> {
    if https_fallback {
        vec![ALPN_HTTP11.to_vec()]
    } else {
        vec![ALPN_H2.to_vec(), ALPN_HTTP11.to_vec()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_alpn() {
        assert_eq!(
            upstream_alpn(false),
            vec![b"h2".to_vec(), b"http/1.1".to_vec()]
        );
        assert_eq!(upstream_alpn(true), vec![b"http/1.1".to_vec()]);
    }
}
