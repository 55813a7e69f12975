use super::TlsError;
use dashmap::DashMap;
use rustls::pki_types::CertificateDer;
use std::sync::Arc;

pub type CertificateChain = Arc<[CertificateDer<'static>]>;

/// Parsed certificate chains keyed by their PEM text, so every context built
/// from the same bundle shares one decoded copy.
#[derive(Debug, Default)]
pub struct CertificatePool {
    chains: DashMap<Vec<u8>, CertificateChain>,
}

impl CertificatePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load_pem(&self, pem: &[u8]) -> Result<CertificateChain, TlsError> {
        if let Some(chain) = self.chains.get(pem) {
            return Ok(chain.clone());
        }

        let certs = rustls_pemfile::certs(&mut &pem[..])
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| TlsError::Pem(e.to_string()))?;
        if certs.is_empty() {
            return Err(TlsError::NoCertificates);
        }

        let chain: CertificateChain = certs.into();
        Ok(self
            .chains
            .entry(pem.to_vec())
            .or_insert(chain)
            .value()
            .clone())
    }

    pub fn load_file(&self, path: &str) -> Result<CertificateChain, TlsError> {
        let pem = std::fs::read(path).map_err(|e| TlsError::Read {
            path: path.to_string(),
            message: e.to_string(),
        })?;
        self.load_pem(&pem)
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn self_signed_pem(name: &str) -> String {
        rcgen::generate_simple_self_signed(vec![name.to_string()])
            .unwrap()
            .cert
            .pem()
    }

    #[test]
    fn test_same_pem_is_shared() {
        let pool = CertificatePool::new();
        let pem = self_signed_pem("localhost");

        let first = pool.load_pem(pem.as_bytes()).unwrap();
        let second = pool.load_pem(pem.as_bytes()).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.len(), 1);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_distinct_pem_is_separate() {
        let pool = CertificatePool::new();
        pool.load_pem(self_signed_pem("a.example").as_bytes()).unwrap();
        pool.load_pem(self_signed_pem("b.example").as_bytes()).unwrap();
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_pem_without_certificates() {
        let pool = CertificatePool::new();
        assert!(matches!(
            pool.load_pem(b"not a certificate"),
            Err(TlsError::NoCertificates)
        ));
        assert!(pool.is_empty());
    }
}
