#![allow(dead_code)]
use ferrous_tunnel_infrastructure::tls::client::session_cache;
use ferrous_tunnel_infrastructure::tls::{CertificatePool, ClientTlsOptions, TlsClientContext};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

/// Self-signed certificate valid for `localhost` and `127.0.0.1`.
pub struct TestCert {
    pub cert_pem: String,
    pub key_pem: String,
    pub cert_der: CertificateDer<'static>,
    key_der: Vec<u8>,
}

impl TestCert {
    pub fn localhost() -> Self {
        let generated = rcgen::generate_simple_self_signed(vec![
            "localhost".to_string(),
            "127.0.0.1".to_string(),
        ])
        .unwrap();

        Self {
            cert_pem: generated.cert.pem(),
            key_pem: generated.key_pair.serialize_pem(),
            cert_der: generated.cert.der().clone(),
            key_der: generated.key_pair.serialize_der(),
        }
    }

    pub fn key_der(&self) -> PrivateKeyDer<'static> {
        PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.key_der.clone()))
    }
}

pub struct ClientContextBuilder;

impl ClientContextBuilder {
    /// A context that trusts `cert` on top of the web PKI roots.
    pub fn trusting(cert: &TestCert, base: ClientTlsOptions) -> TlsClientContext {
        let options = ClientTlsOptions {
            ca_pem: Some(cert.cert_pem.clone().into_bytes()),
            ..base
        };
        TlsClientContext::new(&options, &CertificatePool::new(), session_cache()).unwrap()
    }

    pub fn insecure(base: ClientTlsOptions) -> TlsClientContext {
        let options = ClientTlsOptions {
            insecure: true,
            ..base
        };
        TlsClientContext::new(&options, &CertificatePool::new(), session_cache()).unwrap()
    }

    /// Web PKI roots only, so a self-signed peer is rejected.
    pub fn default_roots(base: ClientTlsOptions) -> TlsClientContext {
        TlsClientContext::new(&base, &CertificatePool::new(), session_cache()).unwrap()
    }
}
