use super::verifier::InsecureVerifier;
use super::{crypto_provider, CertificatePool, TlsError, ALPN_HTTP11, PROTOCOL_VERSIONS};
use rustls::client::{ClientSessionMemoryCache, Resumption};
use rustls::{ClientConfig, RootCertStore};
use std::sync::Arc;
use tokio_rustls::TlsConnector;
use tracing::debug;

const SESSION_CACHE_SIZE: usize = 256;

#[derive(Debug, Clone, Default)]
pub struct ClientTlsOptions {
    pub alpn: Vec<Vec<u8>>,
    /// Disable certificate verification entirely.
    pub insecure: bool,
    /// PEM bundle file trusted in addition to the web PKI roots.
    pub ca_file: Option<String>,
    /// PEM bundle trusted in addition to the web PKI roots.
    pub ca_pem: Option<Vec<u8>>,
}

impl ClientTlsOptions {
    /// DoH is spoken as HTTP/1.1 only.
    pub fn doh() -> Self {
        Self {
            alpn: vec![ALPN_HTTP11.to_vec()],
            ..Self::default()
        }
    }

    pub fn dot() -> Self {
        Self::default()
    }
}

/// Session store shared by every client context that should resume
/// sessions from the same cache.
pub fn session_cache() -> Arc<ClientSessionMemoryCache> {
    Arc::new(ClientSessionMemoryCache::new(SESSION_CACHE_SIZE))
}

/// An immutable client-side rustls configuration.
#[derive(Clone)]
pub struct TlsClientContext {
    config: Arc<ClientConfig>,
}

impl TlsClientContext {
    pub fn new(
        options: &ClientTlsOptions,
        pool: &CertificatePool,
        sessions: Arc<ClientSessionMemoryCache>,
    ) -> Result<Self, TlsError> {
        let provider = crypto_provider();
        let builder = ClientConfig::builder_with_provider(provider.clone())
            .with_protocol_versions(PROTOCOL_VERSIONS)?;

        let mut config = if options.insecure {
            debug!("TLS peer verification disabled");
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(InsecureVerifier::new(provider)))
                .with_no_client_auth()
        } else {
            let mut roots = RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

            let mut extra = Vec::new();
            if let Some(path) = &options.ca_file {
                extra.push(pool.load_file(path)?);
            }
            if let Some(pem) = &options.ca_pem {
                extra.push(pool.load_pem(pem)?);
            }
            for chain in extra {
                for cert in chain.iter() {
                    roots.add(cert.clone())?;
                }
            }

            builder.with_root_certificates(roots).with_no_client_auth()
        };

        config.alpn_protocols = options.alpn.clone();
        config.resumption = Resumption::store(sessions);

        Ok(Self {
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> Arc<ClientConfig> {
        self.config.clone()
    }

    pub fn connector(&self) -> TlsConnector {
        TlsConnector::from(self.config.clone())
    }
}
