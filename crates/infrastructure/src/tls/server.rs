use super::{crypto_provider, CertificatePool, TlsError, ALPN_H2, ALPN_HTTP11, PROTOCOL_VERSIONS};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::server::{ClientHello, ResolvesServerCert, ServerSessionMemoryCache, StoresServerSessions};
use rustls::sign::CertifiedKey;
use rustls::ServerConfig;
use std::sync::Arc;
use tracing::{debug, warn};

const SESSION_CACHE_SIZE: usize = 1024;

/// Certificate chain and private key presented by the server role.
pub struct ServerIdentity {
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
}

impl ServerIdentity {
    pub fn from_pem(
        cert_pem: &[u8],
        key_pem: &[u8],
        pool: &CertificatePool,
    ) -> Result<Self, TlsError> {
        let chain = pool.load_pem(cert_pem)?.to_vec();
        let key = rustls_pemfile::private_key(&mut &key_pem[..])
            .map_err(|e| TlsError::Pem(e.to_string()))?
            .ok_or(TlsError::NoPrivateKey)?;
        Ok(Self { chain, key })
    }

    pub fn from_files(
        cert_path: &str,
        key_path: &str,
        pool: &CertificatePool,
    ) -> Result<Self, TlsError> {
        let read = |path: &str| {
            std::fs::read(path).map_err(|e| TlsError::Read {
                path: path.to_string(),
                message: e.to_string(),
            })
        };
        Self::from_pem(&read(cert_path)?, &read(key_path)?, pool)
    }

    /// Fallback identity when no certificate is configured.
    pub fn self_signed(names: Vec<String>) -> Result<Self, TlsError> {
        let certified = rcgen::generate_simple_self_signed(names)
            .map_err(|e| TlsError::Generate(e.to_string()))?;
        Ok(Self {
            chain: vec![certified.cert.der().clone()],
            key: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
                certified.key_pair.serialize_der(),
            )),
        })
    }

    pub fn chain(&self) -> &[CertificateDer<'static>] {
        &self.chain
    }
}

/// ALPN outcome for one ClientHello.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlpnChoice {
    H2,
    Http11,
    /// Client sent no ALPN extension.
    NotOffered,
    /// Client offered only protocols we do not speak.
    NoOverlap,
}

/// Walks the client's list in its preference order: `h2` is taken unless
/// `allow_h2` is false, `http/1.1` always is, anything else is skipped.
pub fn select_alpn<'a>(
    offered: Option<impl Iterator<Item = &'a [u8]>>,
    allow_h2: bool,
) -> AlpnChoice {
    let Some(offered) = offered else {
        return AlpnChoice::NotOffered;
    };
    for proto in offered {
        if allow_h2 && proto == ALPN_H2 {
            return AlpnChoice::H2;
        }
        if proto == ALPN_HTTP11 {
            return AlpnChoice::Http11;
        }
        warn!(alpn = %String::from_utf8_lossy(proto), "Unexpected ALPN offered");
    }
    AlpnChoice::NoOverlap
}

/// Server configs for one listen slot, one per ALPN outcome.
#[derive(Clone)]
pub struct ListenTlsConfigs {
    h2: Arc<ServerConfig>,
    http11: Arc<ServerConfig>,
    negotiate: Arc<ServerConfig>,
}

impl ListenTlsConfigs {
    /// With `NoOverlap` the negotiating config makes rustls abort the
    /// handshake with a `no_application_protocol` alert.
    pub fn for_choice(&self, choice: AlpnChoice) -> Arc<ServerConfig> {
        match choice {
            AlpnChoice::H2 => self.h2.clone(),
            AlpnChoice::Http11 => self.http11.clone(),
            AlpnChoice::NotOffered | AlpnChoice::NoOverlap => self.negotiate.clone(),
        }
    }
}

/// Server-role TLS state shared by every listen slot.
pub struct ServerTlsContext {
    provider: Arc<CryptoProvider>,
    certified_key: Arc<CertifiedKey>,
    sessions: Arc<dyn StoresServerSessions>,
}

impl ServerTlsContext {
    pub fn new(identity: ServerIdentity) -> Result<Self, TlsError> {
        let provider = crypto_provider();
        let signing_key = provider.key_provider.load_private_key(identity.key)?;
        let certified_key = Arc::new(CertifiedKey::new(identity.chain, signing_key));
        Ok(Self {
            provider,
            certified_key,
            sessions: ServerSessionMemoryCache::new(SESSION_CACHE_SIZE),
        })
    }

    /// Builds the configs for a listen slot. A non-empty `pinned_sni` makes
    /// the handshake fail unless the ClientHello names exactly that host.
    pub fn listen_configs(
        &self,
        pinned_sni: Option<&str>,
        allow_h2: bool,
    ) -> Result<ListenTlsConfigs, TlsError> {
        let resolver = Arc::new(PinnedSniResolver {
            expected: pinned_sni.filter(|s| !s.is_empty()).map(str::to_string),
            key: self.certified_key.clone(),
        });

        let mut negotiate = vec![ALPN_HTTP11.to_vec()];
        if allow_h2 {
            negotiate.insert(0, ALPN_H2.to_vec());
        }

        Ok(ListenTlsConfigs {
            h2: self.config(resolver.clone(), vec![ALPN_H2.to_vec()])?,
            http11: self.config(resolver.clone(), vec![ALPN_HTTP11.to_vec()])?,
            negotiate: self.config(resolver, negotiate)?,
        })
    }

    fn config(
        &self,
        resolver: Arc<PinnedSniResolver>,
        alpn: Vec<Vec<u8>>,
    ) -> Result<Arc<ServerConfig>, TlsError> {
        let mut config = ServerConfig::builder_with_provider(self.provider.clone())
            .with_protocol_versions(PROTOCOL_VERSIONS)?
            .with_no_client_auth()
            .with_cert_resolver(resolver);
        config.alpn_protocols = alpn;
        config.session_storage = self.sessions.clone();
        Ok(Arc::new(config))
    }
}

/// Hands out the single server certificate, refusing ClientHellos whose SNI
/// does not match the listen slot's expected name.
#[derive(Debug)]
struct PinnedSniResolver {
    expected: Option<String>,
    key: Arc<CertifiedKey>,
}

impl ResolvesServerCert for PinnedSniResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let Some(expected) = &self.expected else {
            return Some(self.key.clone());
        };
        match client_hello.server_name() {
            Some(name) if name.eq_ignore_ascii_case(expected) => {
                debug!(sni = %name, "SNI accepted");
                Some(self.key.clone())
            }
            got => {
                warn!(got = ?got, want = %expected, "SNI mismatch, rejecting handshake");
                None
            }
        }
    }
}
